//! Parser for `cec-client` scan output.
//!
//! The output is a sequence of blocks:
//!
//! ```text
//! device #4: Playback 1
//! address:       1.0.0.0
//! active source: yes
//! vendor:        Pulse Eight
//! osd string:    RaspberryPi
//! CEC version:   1.4
//! ```
//!
//! Only the prefixes enumerated in `ScanLine` are recognised. Anything else
//! (banners, `CEC version:`, `language:`, log noise) is skipped so newer
//! utility versions keep parsing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusDevice {
    /// Leading octet of the physical address; this is the HDMI input number.
    pub logical_number: u8,
    pub name: String,
    pub address: String,
    pub vendor: String,
    pub osd_string: String,
    pub active_source: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceScan {
    pub devices: Vec<BusDevice>,
    /// Input number of the device announcing itself with one of our OSD names.
    pub default_input: Option<u8>,
}

#[derive(Debug, PartialEq, Eq)]
enum ScanLine<'a> {
    Device { name: &'a str },
    Address(&'a str),
    Vendor(&'a str),
    OsdString(&'a str),
    ActiveSource,
    Other,
}

fn field<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let value = line.trim_start().strip_prefix(prefix)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn classify(line: &str) -> ScanLine<'_> {
    if let Some(rest) = line.strip_prefix("device #") {
        if let Some((num, name)) = rest.split_once(": ") {
            if !num.is_empty() && num.bytes().all(|b| b.is_ascii_digit()) && !name.trim().is_empty() {
                return ScanLine::Device { name: name.trim() };
            }
        }
        return ScanLine::Other;
    }

    if let Some(v) = field(line, "address:") {
        return ScanLine::Address(v);
    }
    if let Some(v) = field(line, "vendor:") {
        return ScanLine::Vendor(v);
    }
    if let Some(v) = field(line, "osd string:") {
        return ScanLine::OsdString(v);
    }
    if line.contains("active source: yes") {
        return ScanLine::ActiveSource;
    }
    ScanLine::Other
}

fn leading_octet(address: &str) -> Option<u8> {
    address.split('.').next()?.trim().parse().ok()
}

struct ScanParser<'a> {
    self_ids: &'a [String],
    open: Option<BusDevice>,
    out: DeviceScan,
}

impl<'a> ScanParser<'a> {
    fn new(self_ids: &'a [String]) -> Self {
        Self {
            self_ids,
            open: None,
            out: DeviceScan::default(),
        }
    }

    fn finalize(&mut self) {
        let Some(mut dev) = self.open.take() else {
            return;
        };

        match leading_octet(&dev.address) {
            Some(n) => {
                dev.logical_number = n;
                if self.self_ids.iter().any(|id| *id == dev.osd_string) {
                    self.out.default_input = Some(n);
                }
            }
            None => {
                tracing::debug!(device = %dev.name, address = %dev.address, "scan: device without usable address");
            }
        }
        self.out.devices.push(dev);
    }

    fn feed(&mut self, line: &str) {
        match classify(line) {
            ScanLine::Device { name } => {
                self.finalize();
                self.open = Some(BusDevice {
                    logical_number: 0,
                    name: name.to_string(),
                    address: String::new(),
                    vendor: String::new(),
                    osd_string: String::new(),
                    active_source: false,
                });
            }
            other => {
                let Some(dev) = self.open.as_mut() else {
                    return;
                };
                match other {
                    ScanLine::Address(v) => dev.address = v.to_string(),
                    ScanLine::Vendor(v) => dev.vendor = v.to_string(),
                    ScanLine::OsdString(v) => dev.osd_string = v.to_string(),
                    ScanLine::ActiveSource => dev.active_source = true,
                    ScanLine::Device { .. } | ScanLine::Other => {}
                }
            }
        }
    }

    fn finish(mut self) -> DeviceScan {
        self.finalize();
        self.out
    }
}

/// Parses full scan output. `self_ids` are the OSD strings that identify
/// this player on the bus.
pub fn parse_scan_output(output: &str, self_ids: &[String]) -> DeviceScan {
    let mut parser = ScanParser::new(self_ids);
    for line in output.lines() {
        parser.feed(line);
    }
    parser.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_DEVICES: &str = "\
opening a connection to the CEC adapter...
requesting CEC bus information ...
CEC bus information
===================
device #0: TV
address:       0.0.0.0
active source: no
vendor:        Samsung
osd string:    TV
CEC version:   1.4
power status:  on
language:      eng


device #1: Recorder 1
address:       2.0.0.0
active source: yes
vendor:        Pulse Eight
osd string:    RaspberryPi
CEC version:   1.4
power status:  on
language:      eng


device #4: Playback 1
address:       3.0.0.0
active source: no
vendor:        Sony
osd string:    BD Player
CEC version:   1.4
power status:  standby
language:      ???


currently active source: Recorder 1 (1)
";

    fn ids() -> Vec<String> {
        vec!["CECTester".into(), "RaspberryPi".into()]
    }

    #[test]
    fn parses_three_blocks_and_finds_self() {
        let scan = parse_scan_output(THREE_DEVICES, &ids());
        assert_eq!(scan.devices.len(), 3);
        assert_eq!(scan.default_input, Some(2));

        let rec = &scan.devices[1];
        assert_eq!(rec.name, "Recorder 1");
        assert_eq!(rec.logical_number, 2);
        assert_eq!(rec.vendor, "Pulse Eight");
        assert!(rec.active_source);

        assert_eq!(scan.devices[0].logical_number, 0);
        assert!(!scan.devices[0].active_source);
        assert_eq!(scan.devices[2].osd_string, "BD Player");
    }

    #[test]
    fn trailing_summary_line_does_not_mark_active() {
        // "currently active source: ..." must not flip the last device.
        let scan = parse_scan_output(THREE_DEVICES, &ids());
        assert!(!scan.devices[2].active_source);
    }

    #[test]
    fn fields_before_first_header_are_ignored() {
        let out = "address: 9.0.0.0\nvendor: Nobody\ndevice #0: TV\naddress: 0.0.0.0\n";
        let scan = parse_scan_output(out, &ids());
        assert_eq!(scan.devices.len(), 1);
        assert_eq!(scan.devices[0].address, "0.0.0.0");
        assert_eq!(scan.devices[0].vendor, "");
    }

    #[test]
    fn indented_fields_are_accepted() {
        let out = "device #1: Recorder 1\n    address:  4.0.0.0\n    osd string: CECTester\n";
        let scan = parse_scan_output(out, &ids());
        assert_eq!(scan.devices[0].logical_number, 4);
        assert_eq!(scan.default_input, Some(4));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let out = "device #x: bogus\ndevice #2:\naddress:\n\u{1b}[0m garbage\n";
        let scan = parse_scan_output(out, &ids());
        assert!(scan.devices.is_empty());
        assert_eq!(scan.default_input, None);
    }

    #[test]
    fn empty_output_has_no_devices() {
        assert_eq!(parse_scan_output("", &ids()), DeviceScan::default());
    }
}

//! HDMI-CEC bus control: device discovery, input switching, TV power, and
//! the persisted input/port-map state that goes with them.

pub mod cec;
pub mod scan;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ControlError, Result};
use crate::store;

pub use cec::{CecClient, CecRunner};
pub use scan::{parse_scan_output, BusDevice, DeviceScan};

pub const SCAN_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// OSD strings the player has historically announced itself with.
pub const SELF_OSD_STRINGS: [&str; 2] = ["CECTester", "RaspberryPi"];

/// Port label to human device name, e.g. `{"1": "Cable box", "2": "Raspberry Pi"}`.
pub type HdmiPortMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize)]
pub struct ScanResponse {
    #[serde(flatten)]
    pub scan: DeviceScan,
    pub scanned_at_ms: u64,
    pub cached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerStatus {
    On,
    Standby,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortMapOutcome {
    /// Port learned from the map entry naming this player, if any.
    pub self_port: Option<u8>,
    pub switched: bool,
}

struct DeviceScanCache {
    scan: DeviceScan,
    scanned: Instant,
    scanned_at_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct CurrentInputFile {
    current_input: InputValue,
}

/// Older installs wrote the port label string instead of a number.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum InputValue {
    Number(u8),
    Text(String),
}

impl InputValue {
    fn number(&self) -> Option<u8> {
        match self {
            InputValue::Number(n) => Some(*n),
            InputValue::Text(s) => port_number(s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusSettings {
    /// Extra OSD string identifying this player, on top of `SELF_OSD_STRINGS`.
    pub osd_name: String,
    /// Device name marking this player's port in the HDMI map (case-insensitive).
    pub self_device_name: String,
    pub current_input_path: PathBuf,
    pub port_map_path: PathBuf,
    pub cache_ttl: Duration,
}

pub struct BusController {
    runner: Arc<dyn CecRunner>,
    settings: BusSettings,
    self_ids: Vec<String>,
    cache: Mutex<Option<DeviceScanCache>>,
    // Serialises writers of current_input.json and hdmi_devices.json.
    state_lock: Mutex<()>,
}

/// Builds the `tx` frame that asks the TV to route `input` as active source.
///
/// Frame: from logical address 1 to broadcast (F), opcode 0x82 (Active
/// Source), physical address `N.0.0.0` encoded as `N0:00`.
pub fn input_switch_command(input: u8) -> Result<String> {
    if !(1..=15).contains(&input) {
        return Err(ControlError::InvalidInput(format!(
            "input number must be 1..=15, got {input}"
        )));
    }
    Ok(format!("tx 1F:82:{:02X}:00", input * 16))
}

/// Trailing digits of a port label: `"2"` and `"HDMI 2"` both give 2.
pub fn port_number(label: &str) -> Option<u8> {
    let label = label.trim();
    let digits_at = label
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    label[digits_at..].parse().ok()
}

fn parse_power_status(output: &str) -> PowerStatus {
    let lc = output.to_ascii_lowercase();
    if lc.contains("power status: on") {
        PowerStatus::On
    } else if lc.contains("power status: standby") {
        PowerStatus::Standby
    } else {
        PowerStatus::Unknown
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl BusController {
    pub fn new(runner: Arc<dyn CecRunner>, settings: BusSettings) -> Self {
        let mut self_ids: Vec<String> = SELF_OSD_STRINGS.iter().map(|s| s.to_string()).collect();
        if !settings.osd_name.is_empty() && !self_ids.contains(&settings.osd_name) {
            self_ids.push(settings.osd_name.clone());
        }

        Self {
            runner,
            settings,
            self_ids,
            cache: Mutex::new(None),
            state_lock: Mutex::new(()),
        }
    }

    // --- Discovery -------------------------------------------------------

    async fn scan_now(&self) -> Result<DeviceScanCache> {
        let output = self.runner.run("scan").await?;
        let scan = parse_scan_output(&output, &self.self_ids);
        tracing::info!(
            devices = scan.devices.len(),
            default_input = ?scan.default_input,
            "CEC scan complete"
        );
        Ok(DeviceScanCache {
            scan,
            scanned: Instant::now(),
            scanned_at_ms: now_ms(),
        })
    }

    /// Returns the cached scan while it is younger than the TTL; scans otherwise.
    pub async fn scan_devices(&self) -> Result<ScanResponse> {
        let mut cache = self.cache.lock().await;
        if let Some(c) = cache.as_ref() {
            if c.scanned.elapsed() < self.settings.cache_ttl {
                return Ok(ScanResponse {
                    scan: c.scan.clone(),
                    scanned_at_ms: c.scanned_at_ms,
                    cached: true,
                });
            }
        }

        let fresh = self.scan_now().await?;
        let resp = ScanResponse {
            scan: fresh.scan.clone(),
            scanned_at_ms: fresh.scanned_at_ms,
            cached: false,
        };
        *cache = Some(fresh);
        Ok(resp)
    }

    /// Always scans. A failed scan leaves the previous cache in place.
    pub async fn rescan(&self) -> Result<ScanResponse> {
        let fresh = self.scan_now().await?;
        let resp = ScanResponse {
            scan: fresh.scan.clone(),
            scanned_at_ms: fresh.scanned_at_ms,
            cached: false,
        };
        *self.cache.lock().await = Some(fresh);
        Ok(resp)
    }

    /// Last scan regardless of age, without touching the bus.
    pub async fn last_scan(&self) -> Option<DeviceScan> {
        self.cache.lock().await.as_ref().map(|c| c.scan.clone())
    }

    // --- Commands --------------------------------------------------------

    /// Switches the TV to `input`. Failures are logged and reported as `false`;
    /// persisting the new input is the caller's job.
    pub async fn switch_input(&self, input: u8) -> bool {
        let command = match input_switch_command(input) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("switch input rejected: {e}");
                return false;
            }
        };

        match self.runner.run(&command).await {
            Ok(_) => {
                tracing::info!(input, "switched HDMI input");
                true
            }
            Err(e) => {
                tracing::error!(input, "failed to switch input: {e}");
                false
            }
        }
    }

    /// Validates, switches, and persists `input` as the current input.
    pub async fn select_input(&self, input: u8) -> Result<()> {
        input_switch_command(input)?;
        if !self.switch_input(input).await {
            return Err(ControlError::external(
                "cec-client",
                format!("failed to switch to input {input}"),
            ));
        }
        self.set_current_input(input).await
    }

    pub async fn power_on(&self) -> Result<()> {
        self.runner.run("on 0").await?;
        tracing::info!("TV power on sent");
        Ok(())
    }

    pub async fn power_off(&self) -> Result<()> {
        self.runner.run("standby 0").await?;
        tracing::info!("TV standby sent");
        Ok(())
    }

    pub async fn power_status(&self) -> Result<PowerStatus> {
        let output = self.runner.run("pow 0").await?;
        let status = parse_power_status(&output);
        if status == PowerStatus::Unknown {
            tracing::warn!("unexpected power status response: {}", output.trim());
        }
        Ok(status)
    }

    // --- Current input ---------------------------------------------------

    /// Persisted current input; 0 when unset or unreadable.
    pub async fn get_current_input(&self) -> u8 {
        match store::read_json::<CurrentInputFile>(&self.settings.current_input_path).await {
            Ok(Some(f)) => f.current_input.number().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!("current input unreadable, treating as unset: {e}");
                0
            }
        }
    }

    pub async fn set_current_input(&self, input: u8) -> Result<()> {
        let _guard = self.state_lock.lock().await;
        store::write_json(
            &self.settings.current_input_path,
            &CurrentInputFile {
                current_input: InputValue::Number(input),
            },
        )
        .await
    }

    // --- HDMI port map ---------------------------------------------------

    pub async fn get_port_map(&self) -> Result<HdmiPortMap> {
        store::read_json(&self.settings.port_map_path)
            .await?
            .ok_or_else(|| ControlError::NotFound("HDMI port map has not been set".into()))
    }

    /// Persists `map`. If an entry names this player, switches to that port
    /// right away and records it as the current input.
    pub async fn set_port_map(&self, map: HdmiPortMap) -> Result<PortMapOutcome> {
        let self_label = map
            .iter()
            .find(|(_, name)| name.trim().eq_ignore_ascii_case(&self.settings.self_device_name))
            .map(|(label, _)| label.clone());

        let self_port = match &self_label {
            Some(label) => Some(port_number(label).filter(|n| (1..=15).contains(n)).ok_or_else(|| {
                ControlError::ValidationFailed(format!(
                    "port label {label:?} for {} is not an HDMI input number",
                    self.settings.self_device_name
                ))
            })?),
            None => None,
        };

        {
            let _guard = self.state_lock.lock().await;
            store::write_json(&self.settings.port_map_path, &map).await?;
        }
        tracing::info!(entries = map.len(), self_port = ?self_port, "HDMI port map saved");

        let mut switched = false;
        if let Some(port) = self_port {
            switched = self.switch_input(port).await;
            if switched {
                self.set_current_input(port).await?;
            }
        }

        Ok(PortMapOutcome { self_port, switched })
    }

    /// Deletes the port map and current input files; returns the deleted names.
    pub async fn reset_port_map(&self) -> Result<Vec<String>> {
        let _guard = self.state_lock.lock().await;
        let mut deleted = Vec::new();
        for path in [&self.settings.port_map_path, &self.settings.current_input_path] {
            if store::remove(path).await? {
                deleted.push(
                    path.file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                );
            }
        }
        Ok(deleted)
    }
}

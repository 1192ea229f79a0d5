use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
        Day::Saturday,
        Day::Sunday,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Day::Monday => "monday",
            Day::Tuesday => "tuesday",
            Day::Wednesday => "wednesday",
            Day::Thursday => "thursday",
            Day::Friday => "friday",
            Day::Saturday => "saturday",
            Day::Sunday => "sunday",
        }
    }
}

impl From<Weekday> for Day {
    fn from(w: Weekday) -> Self {
        match w {
            Weekday::Mon => Day::Monday,
            Weekday::Tue => Day::Tuesday,
            Weekday::Wed => Day::Wednesday,
            Weekday::Thu => Day::Thursday,
            Weekday::Fri => Day::Friday,
            Weekday::Sat => Day::Saturday,
            Weekday::Sun => Day::Sunday,
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock time of day, written `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WallTime {
    hour: u8,
    minute: u8,
}

impl WallTime {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0).unwrap_or_default()
    }
}

impl FromStr for WallTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || format!("invalid time {s:?}, expected HH:MM");
        let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(bad());
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let hour: u8 = h.parse().map_err(|_| bad())?;
        let minute: u8 = m.parse().map_err(|_| bad())?;
        WallTime::new(hour, minute).ok_or_else(bad)
    }
}

impl TryFrom<String> for WallTime {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<WallTime> for String {
    fn from(t: WallTime) -> Self {
        t.to_string()
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

// The dashboard sends "" for a cleared time field.
fn blank_as_none<'de, D>(de: D) -> Result<Option<WallTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(de)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<WallTime>().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub turn_on_time: Option<WallTime>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub turn_off_time: Option<WallTime>,
}

impl DaySchedule {
    pub fn new(on: Option<WallTime>, off: Option<WallTime>) -> Self {
        Self {
            turn_on_time: on,
            turn_off_time: off,
        }
    }
}

fn preset_day(off_hour: u8) -> Option<DaySchedule> {
    Some(DaySchedule::new(WallTime::new(9, 30), WallTime::new(off_hour, 15)))
}

fn preset_short_day() -> Option<DaySchedule> {
    preset_day(20)
}

fn preset_long_day() -> Option<DaySchedule> {
    preset_day(22)
}

/// On/off times per weekday.
///
/// A day key missing from the JSON takes its preset; an explicit `null`
/// means the TV is left alone that day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    #[serde(default = "preset_short_day")]
    pub sunday: Option<DaySchedule>,
    #[serde(default = "preset_short_day")]
    pub monday: Option<DaySchedule>,
    #[serde(default = "preset_short_day")]
    pub tuesday: Option<DaySchedule>,
    #[serde(default = "preset_short_day")]
    pub wednesday: Option<DaySchedule>,
    #[serde(default = "preset_short_day")]
    pub thursday: Option<DaySchedule>,
    #[serde(default = "preset_long_day")]
    pub friday: Option<DaySchedule>,
    #[serde(default = "preset_long_day")]
    pub saturday: Option<DaySchedule>,
}

impl Default for WeeklySchedule {
    fn default() -> Self {
        Self::preset()
    }
}

impl WeeklySchedule {
    /// 09:30 to 20:15 Sunday through Thursday, 09:30 to 22:15 Friday and Saturday.
    pub fn preset() -> Self {
        Self {
            sunday: preset_short_day(),
            monday: preset_short_day(),
            tuesday: preset_short_day(),
            wednesday: preset_short_day(),
            thursday: preset_short_day(),
            friday: preset_long_day(),
            saturday: preset_long_day(),
        }
    }

    pub fn empty() -> Self {
        Self {
            sunday: None,
            monday: None,
            tuesday: None,
            wednesday: None,
            thursday: None,
            friday: None,
            saturday: None,
        }
    }

    pub fn day(&self, day: Day) -> Option<&DaySchedule> {
        match day {
            Day::Monday => self.monday.as_ref(),
            Day::Tuesday => self.tuesday.as_ref(),
            Day::Wednesday => self.wednesday.as_ref(),
            Day::Thursday => self.thursday.as_ref(),
            Day::Friday => self.friday.as_ref(),
            Day::Saturday => self.saturday.as_ref(),
            Day::Sunday => self.sunday.as_ref(),
        }
    }

    pub fn set_day(&mut self, day: Day, value: Option<DaySchedule>) {
        let slot = match day {
            Day::Monday => &mut self.monday,
            Day::Tuesday => &mut self.tuesday,
            Day::Wednesday => &mut self.wednesday,
            Day::Thursday => &mut self.thursday,
            Day::Friday => &mut self.friday,
            Day::Saturday => &mut self.saturday,
            Day::Sunday => &mut self.sunday,
        };
        *slot = value;
    }
}

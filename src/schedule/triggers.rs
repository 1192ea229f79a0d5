//! Daily wall-clock triggers.
//!
//! A trigger fires every day at its time; the weekday it was created for is
//! only a tag. Whoever runs the trigger checks the tag against today's date
//! and skips it on the other six days.

use chrono::{Datelike, Days, NaiveDateTime};
use serde::Serialize;

use super::model::{Day, WallTime, WeeklySchedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    PowerOn,
    PowerOff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyTrigger {
    pub tag: Day,
    pub at: WallTime,
    pub action: PowerAction,
    pub next_run: NaiveDateTime,
}

impl DailyTrigger {
    /// True when `now` falls on the tagged weekday.
    pub fn should_run(&self, now: NaiveDateTime) -> bool {
        should_run_today(self.tag, now)
    }
}

pub fn should_run_today(tag: Day, now: NaiveDateTime) -> bool {
    Day::from(now.weekday()) == tag
}

/// First instant after `after` at wall time `at`.
fn next_occurrence(at: WallTime, after: NaiveDateTime) -> NaiveDateTime {
    let today = after.date().and_time(at.to_naive_time());
    if today > after {
        today
    } else {
        today
            .checked_add_days(Days::new(1))
            .unwrap_or(today)
    }
}

/// Latest instant at or before `now` at wall time `at`.
fn last_occurrence(at: WallTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(at.to_naive_time());
    if today <= now {
        today
    } else {
        today.checked_sub_days(Days::new(1)).unwrap_or(today)
    }
}

#[derive(Debug, Default)]
pub struct TriggerSet {
    triggers: Vec<DailyTrigger>,
}

impl TriggerSet {
    /// One trigger per configured on/off time in `schedule`.
    pub fn from_schedule(schedule: &WeeklySchedule, now: NaiveDateTime) -> Self {
        let mut set = Self::default();
        for day in Day::ALL {
            let Some(ds) = schedule.day(day) else {
                continue;
            };
            if let Some(t) = ds.turn_on_time {
                set.every_day_at(t, day, PowerAction::PowerOn, now);
            }
            if let Some(t) = ds.turn_off_time {
                set.every_day_at(t, day, PowerAction::PowerOff, now);
            }
        }
        set
    }

    pub fn every_day_at(&mut self, at: WallTime, tag: Day, action: PowerAction, now: NaiveDateTime) {
        self.triggers.push(DailyTrigger {
            tag,
            at,
            action,
            next_run: next_occurrence(at, now),
        });
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn snapshot(&self) -> Vec<DailyTrigger> {
        let mut v = self.triggers.clone();
        v.sort_by_key(|t| t.next_run);
        v
    }

    /// Returns every trigger due at `now`, oldest first, and moves each one
    /// to its next occurrence. A trigger that missed several occurrences
    /// (clock jump, suspended host) is returned once, paired with the most
    /// recent one.
    pub fn take_due(&mut self, now: NaiveDateTime) -> Vec<(DailyTrigger, NaiveDateTime)> {
        let mut due = Vec::new();
        for t in &mut self.triggers {
            if t.next_run <= now {
                due.push((t.clone(), last_occurrence(t.at, now)));
                t.next_run = next_occurrence(t.at, now);
            }
        }
        due.sort_by_key(|(_, at)| *at);
        due
    }
}

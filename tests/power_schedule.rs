mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use common::{bus_controller, fast_options, FakeCec, FakeEngine};
use venuecast_engine::bus::{BusController, PowerStatus};
use venuecast_engine::playback::{PlaybackManager, PlayerState};
use venuecast_engine::schedule::{
    Day, DaySchedule, PowerAction, PowerActions, ScheduleController, ScheduleSettings, WallTime,
    WeeklySchedule,
};

struct Rig {
    dir: tempfile::TempDir,
    cec: Arc<FakeCec>,
    bus: Arc<BusController>,
    playback: Arc<PlaybackManager>,
    actions: Arc<PowerActions>,
}

impl Rig {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("videos")).unwrap();
        let (cec, bus) = bus_controller(dir.path());
        let playback = Arc::new(PlaybackManager::new(
            FakeEngine::new(),
            fast_options(dir.path().join("videos"), dir.path().join("last_played.json")),
        ));
        let actions = Arc::new(PowerActions::new(bus.clone(), playback.clone()));
        Self {
            dir,
            cec,
            bus,
            playback,
            actions,
        }
    }

    fn schedule_path(&self) -> std::path::PathBuf {
        self.dir.path().join("schedule.json")
    }

    fn settings(&self, path: &Path) -> ScheduleSettings {
        let mut s = ScheduleSettings::new(path.to_path_buf());
        s.poll_interval = Duration::from_secs(3600);
        s.test_cycle_delay = Duration::from_millis(10);
        s
    }

    async fn start(&self) -> Arc<ScheduleController> {
        let (ctl, _task) = ScheduleController::start(
            self.settings(&self.schedule_path()),
            self.actions.clone(),
            self.bus.clone(),
        )
        .await
        .unwrap();
        ctl
    }

    /// Records `name` as the last played video.
    fn remember_video(&self, name: &str) -> std::path::PathBuf {
        let path = self.dir.path().join("videos").join(name);
        std::fs::write(&path, b"fake video bytes").unwrap();
        std::fs::write(
            self.dir.path().join("last_played.json"),
            format!(r#"{{"last_video": "{name}"}}"#),
        )
        .unwrap();
        path
    }
}

fn wt(s: &str) -> Option<WallTime> {
    Some(s.parse().unwrap())
}

#[tokio::test]
async fn first_start_persists_the_preset() {
    let rig = Rig::new();
    let ctl = rig.start().await;

    assert_eq!(ctl.get_schedule().await, WeeklySchedule::preset());
    assert_eq!(ctl.triggers().await.unwrap().len(), 14);

    let raw = std::fs::read_to_string(rig.schedule_path()).unwrap();
    let saved: WeeklySchedule = serde_json::from_str(&raw).unwrap();
    assert_eq!(saved, WeeklySchedule::preset());
}

#[tokio::test]
async fn broken_schedule_file_falls_back_to_preset() {
    let rig = Rig::new();
    std::fs::write(rig.schedule_path(), "{ \"monday\": ").unwrap();

    let ctl = rig.start().await;
    assert_eq!(ctl.get_schedule().await, WeeklySchedule::preset());
    let raw = std::fs::read_to_string(rig.schedule_path()).unwrap();
    assert!(serde_json::from_str::<WeeklySchedule>(&raw).is_ok());
}

#[tokio::test]
async fn saved_schedule_is_loaded_with_presets_for_missing_days() {
    let rig = Rig::new();
    std::fs::write(
        rig.schedule_path(),
        r#"{"monday": {"turn_on_time": "07:00", "turn_off_time": "19:00"}, "tuesday": null}"#,
    )
    .unwrap();

    let ctl = rig.start().await;
    let s = ctl.get_schedule().await;
    assert_eq!(s.monday, Some(DaySchedule::new(wt("07:00"), wt("19:00"))));
    assert_eq!(s.tuesday, None);
    assert_eq!(s.saturday, WeeklySchedule::preset().saturday);
    // Monday plus five preset days, two triggers each.
    assert_eq!(ctl.triggers().await.unwrap().len(), 12);
}

#[tokio::test]
async fn replacing_the_schedule_leaves_no_stale_triggers() {
    let rig = Rig::new();
    let ctl = rig.start().await;

    let mut first = WeeklySchedule::empty();
    first.tuesday = Some(DaySchedule::new(wt("08:00"), None));
    assert_eq!(ctl.set_schedule(first).await.unwrap(), 1);
    let triggers = ctl.triggers().await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].tag, Day::Tuesday);
    assert_eq!(triggers[0].action, PowerAction::PowerOn);

    let mut second = WeeklySchedule::empty();
    second.friday = Some(DaySchedule::new(None, wt("23:00")));
    ctl.set_schedule(second.clone()).await.unwrap();
    let triggers = ctl.triggers().await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].tag, Day::Friday);
    assert_eq!(triggers[0].action, PowerAction::PowerOff);

    assert_eq!(ctl.get_schedule().await, second);
}

#[tokio::test]
async fn failed_persist_applies_nothing() {
    let rig = Rig::new();
    // A directory where the file should be makes every write fail.
    let path = rig.dir.path().join("schedule_dir");
    std::fs::create_dir_all(&path).unwrap();
    let (ctl, _task) = ScheduleController::start(rig.settings(&path), rig.actions.clone(), rig.bus.clone())
        .await
        .unwrap();

    let err = ctl.set_schedule(WeeklySchedule::empty()).await.unwrap_err();
    assert_eq!(err.kind(), "PersistenceFailure");
    assert_eq!(ctl.get_schedule().await, WeeklySchedule::preset());
    assert_eq!(ctl.triggers().await.unwrap().len(), 14);
}

#[tokio::test]
async fn clear_schedule_removes_every_trigger() {
    let rig = Rig::new();
    let ctl = rig.start().await;

    ctl.clear_schedule().await.unwrap();
    assert!(ctl.triggers().await.unwrap().is_empty());
    assert_eq!(ctl.get_schedule().await, WeeklySchedule::empty());

    // Cleared days are written as null, so they stay cleared after a restart.
    drop(ctl);
    let ctl = rig.start().await;
    assert_eq!(ctl.get_schedule().await, WeeklySchedule::empty());
}

#[tokio::test]
async fn daily_trigger_acts_only_on_its_weekday() {
    let rig = Rig::new();
    let ctl = rig.start().await;
    let mut s = WeeklySchedule::empty();
    s.wednesday = Some(DaySchedule::new(wt("06:00"), None));
    ctl.set_schedule(s).await.unwrap();

    let mut executed = Vec::new();
    for _ in 0..7 {
        let next = ctl.triggers().await.unwrap()[0].next_run;
        let fired = ctl.run_pending_at(next).await.unwrap();
        assert_eq!(fired.len(), 1);
        if fired[0].executed {
            executed.push(fired[0].due);
        }
    }

    assert_eq!(executed.len(), 1);
    assert_eq!(Day::from(executed[0].weekday()), Day::Wednesday);
    assert_eq!(rig.cec.count("on 0"), 1);
}

#[tokio::test]
async fn catch_up_after_clock_jump_runs_todays_actions_in_order() {
    let rig = Rig::new();
    let ctl = rig.start().await;
    let mut s = WeeklySchedule::empty();
    for day in Day::ALL {
        s.set_day(day, Some(DaySchedule::new(wt("09:00"), wt("21:00"))));
    }
    ctl.set_schedule(s).await.unwrap();

    // Every trigger is overdue; the host was away for days.
    let last = ctl.triggers().await.unwrap().last().unwrap().next_run;
    let now = (last.date() + chrono::Days::new(3)).and_hms_opt(12, 0, 0).unwrap();
    let fired = ctl.run_pending_at(now).await.unwrap();

    assert_eq!(fired.len(), 14);
    assert!(fired.windows(2).all(|w| w[0].due <= w[1].due));
    let ran: Vec<PowerAction> = fired
        .iter()
        .filter(|f| f.executed)
        .map(|f| f.trigger.action)
        .collect();
    assert_eq!(ran, vec![PowerAction::PowerOff, PowerAction::PowerOn]);
    assert!(fired
        .iter()
        .filter(|f| f.executed)
        .all(|f| f.trigger.tag == Day::from(now.weekday())));
    assert_eq!(rig.cec.commands(), vec!["standby 0", "on 0"]);

    assert!(ctl.triggers().await.unwrap().iter().all(|t| t.next_run > now));
}

#[tokio::test]
async fn late_poll_after_midnight_checks_the_new_day() {
    let rig = Rig::new();
    let ctl = rig.start().await;
    let mut s = WeeklySchedule::empty();
    s.wednesday = Some(DaySchedule::new(None, wt("23:59")));
    ctl.set_schedule(s).await.unwrap();

    let mut ran_on = Vec::new();
    for _ in 0..7 {
        let next = ctl.triggers().await.unwrap()[0].next_run;
        // The poll that notices the trigger lands two minutes later, on the next day.
        let now = next + chrono::Duration::minutes(2);
        let fired = ctl.run_pending_at(now).await.unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].due, next);
        if fired[0].executed {
            ran_on.push(now);
        }
    }

    assert_eq!(ran_on.len(), 1);
    assert_eq!(Day::from(ran_on[0].weekday()), Day::Wednesday);
    assert_eq!(rig.cec.count("standby 0"), 1);
}

#[tokio::test]
async fn power_on_without_stored_input_skips_switch_but_resumes() {
    let rig = Rig::new();
    let video = rig.remember_video("promo.mp4");

    let report = rig.actions.power_on().await;
    assert!(report.tv_on);
    assert_eq!(report.input, None);
    assert_eq!(report.resumed, Some(video.display().to_string()));
    assert!(report.errors.is_empty());

    assert_eq!(rig.cec.commands(), vec!["on 0"]);
    assert_eq!(rig.playback.get_status().await.state, PlayerState::Playing);
}

#[tokio::test]
async fn power_on_switches_to_stored_input_even_if_not_scanned() {
    let rig = Rig::new();
    rig.bus.scan_devices().await.unwrap();
    rig.bus.set_current_input(5).await.unwrap();

    let report = rig.actions.power_on().await;
    assert_eq!(report.input, Some(5));
    assert!(report.input_switched);
    assert_eq!(rig.cec.commands(), vec!["scan", "on 0", "tx 1F:82:50:00"]);
    assert_eq!(report.resumed, None);
}

#[tokio::test]
async fn power_on_failures_do_not_stop_the_sequence() {
    let rig = Rig::new();
    rig.bus.set_current_input(2).await.unwrap();
    rig.remember_video("promo.mp4");
    rig.cec.fail("on");
    rig.cec.fail("tx");

    let report = rig.actions.power_on().await;
    assert!(!report.tv_on);
    assert!(!report.input_switched);
    assert_eq!(report.errors.len(), 2);
    assert!(report.resumed.is_some());
    assert_eq!(rig.playback.get_status().await.state, PlayerState::Playing);
}

#[tokio::test]
async fn power_off_tolerates_nothing_loaded() {
    let rig = Rig::new();
    let report = rig.actions.power_off().await;
    assert!(report.tv_off);
    assert!(!report.playback_stopped);
    assert!(report.errors.is_empty());
    assert_eq!(rig.cec.commands(), vec!["standby 0"]);
}

#[tokio::test]
async fn test_cycle_powers_on_then_off() {
    let rig = Rig::new();
    rig.remember_video("promo.mp4");
    let ctl = rig.start().await;

    let report = ctl.test_cycle().await;
    assert!(report.power_on.tv_on);
    assert!(report.power_off.tv_off);
    assert!(report.power_off.playback_stopped);
    assert_eq!(rig.cec.commands(), vec!["on 0", "standby 0"]);
    assert_eq!(rig.playback.get_status().await.state, PlayerState::Stopped);

    assert_eq!(ctl.tv_status().await.unwrap(), PowerStatus::On);
}

//! Weekly TV power schedule.
//!
//! The scheduler task owns the `TriggerSet` and is the only thing that fires
//! power actions from it. `ScheduleController` is the handle the rest of the
//! engine uses: it persists schedule changes, then sends the new schedule to
//! the task, which swaps the whole trigger set in one step.

pub mod model;
pub mod triggers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::bus::{BusController, PowerStatus};
use crate::error::{ControlError, Result};
use crate::playback::PlaybackManager;
use crate::store;

pub use model::{Day, DaySchedule, WallTime, WeeklySchedule};
pub use triggers::{should_run_today, DailyTrigger, PowerAction, TriggerSet};

pub const POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const TEST_CYCLE_DELAY: Duration = Duration::from_secs(5);

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

// --- Power actions -------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct PowerOnReport {
    pub tv_on: bool,
    /// Stored input that was switched to; `None` when no input is set.
    pub input: Option<u8>,
    pub input_switched: bool,
    pub resumed: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PowerOffReport {
    pub tv_off: bool,
    pub playback_stopped: bool,
    pub errors: Vec<String>,
}

/// What a schedule trigger (or a test cycle) does to the TV and the player.
/// Every step is attempted; failures are logged and reported, never raised.
pub struct PowerActions {
    bus: Arc<BusController>,
    playback: Arc<PlaybackManager>,
}

impl PowerActions {
    pub fn new(bus: Arc<BusController>, playback: Arc<PlaybackManager>) -> Self {
        Self { bus, playback }
    }

    pub async fn power_on(&self) -> PowerOnReport {
        let mut report = PowerOnReport::default();

        match self.bus.power_on().await {
            Ok(()) => report.tv_on = true,
            Err(e) => {
                tracing::error!("TV power on failed: {e}");
                report.errors.push(format!("power on: {e}"));
            }
        }

        let input = self.bus.get_current_input().await;
        if input == 0 {
            tracing::info!("no HDMI input stored; leaving TV input alone");
        } else {
            if let Some(scan) = self.bus.last_scan().await {
                if !scan.devices.iter().any(|d| d.logical_number == input) {
                    tracing::warn!(input, "stored HDMI input is not in the last device scan");
                }
            }
            report.input = Some(input);
            report.input_switched = self.bus.switch_input(input).await;
            if !report.input_switched {
                report.errors.push(format!("switch to input {input} failed"));
            }
        }

        match self.playback.load_last_played().await {
            Ok(Some(path)) => report.resumed = Some(path.display().to_string()),
            Ok(None) => {}
            Err(e) => {
                tracing::error!("failed to resume last played video: {e}");
                report.errors.push(format!("resume: {e}"));
            }
        }
        report
    }

    pub async fn power_off(&self) -> PowerOffReport {
        let mut report = PowerOffReport::default();

        match self.bus.power_off().await {
            Ok(()) => report.tv_off = true,
            Err(e) => {
                tracing::error!("TV standby failed: {e}");
                report.errors.push(format!("standby: {e}"));
            }
        }

        match self.playback.stop().await {
            Ok(()) => report.playback_stopped = true,
            Err(ControlError::NoMedia) => {}
            Err(e) => {
                tracing::error!("failed to stop playback: {e}");
                report.errors.push(format!("stop: {e}"));
            }
        }
        report
    }

    pub async fn run(&self, action: PowerAction) {
        match action {
            PowerAction::PowerOn => {
                let r = self.power_on().await;
                tracing::info!(errors = r.errors.len(), "scheduled power on done");
            }
            PowerAction::PowerOff => {
                let r = self.power_off().await;
                tracing::info!(errors = r.errors.len(), "scheduled power off done");
            }
        }
    }
}

// --- Scheduler task ------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FiredTrigger {
    pub trigger: DailyTrigger,
    pub due: NaiveDateTime,
    /// False when today is not the trigger's tagged weekday.
    pub executed: bool,
}

enum SchedulerCommand {
    Replace {
        schedule: WeeklySchedule,
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<DailyTrigger>>,
    },
    RunPending {
        now: NaiveDateTime,
        reply: oneshot::Sender<Vec<FiredTrigger>>,
    },
}

struct Scheduler {
    triggers: TriggerSet,
    actions: Arc<PowerActions>,
    rx: mpsc::Receiver<SchedulerCommand>,
    poll: Duration,
}

impl Scheduler {
    async fn run(mut self) {
        let mut tick = tokio::time::interval(self.poll);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                _ = tick.tick() => {
                    self.run_pending(local_now()).await;
                }
            }
        }
        tracing::info!("scheduler stopped");
    }

    async fn handle(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::Replace { schedule, reply } => {
                self.triggers = TriggerSet::from_schedule(&schedule, local_now());
                tracing::info!(triggers = self.triggers.len(), "schedule triggers rebuilt");
                let _ = reply.send(self.triggers.len());
            }
            SchedulerCommand::Snapshot { reply } => {
                let _ = reply.send(self.triggers.snapshot());
            }
            SchedulerCommand::RunPending { now, reply } => {
                let fired = self.run_pending(now).await;
                let _ = reply.send(fired);
            }
        }
    }

    async fn run_pending(&mut self, now: NaiveDateTime) -> Vec<FiredTrigger> {
        let mut fired = Vec::new();
        for (trigger, due) in self.triggers.take_due(now) {
            let executed = trigger.should_run(now);
            if executed {
                tracing::info!(day = %trigger.tag, at = %trigger.at, action = ?trigger.action, "running scheduled action");
                self.actions.run(trigger.action).await;
            } else {
                tracing::debug!(day = %trigger.tag, at = %trigger.at, "trigger skipped, not its weekday");
            }
            fired.push(FiredTrigger {
                trigger,
                due,
                executed,
            });
        }
        fired
    }
}

// --- Controller ----------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub path: PathBuf,
    pub poll_interval: Duration,
    pub test_cycle_delay: Duration,
}

impl ScheduleSettings {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            poll_interval: POLL_INTERVAL,
            test_cycle_delay: TEST_CYCLE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestCycleReport {
    pub power_on: PowerOnReport,
    pub power_off: PowerOffReport,
}

pub struct ScheduleController {
    settings: ScheduleSettings,
    // Also serialises set/clear so file and trigger set change together.
    schedule: Mutex<WeeklySchedule>,
    actions: Arc<PowerActions>,
    bus: Arc<BusController>,
    tx: mpsc::Sender<SchedulerCommand>,
}

/// Reads the persisted schedule. A missing or unreadable file falls back to
/// the preset, which is written back so the file always exists afterwards.
pub async fn load_schedule(path: &std::path::Path) -> WeeklySchedule {
    match store::read_json::<WeeklySchedule>(path).await {
        Ok(Some(s)) => return s,
        Ok(None) => tracing::info!("no schedule saved; using preset"),
        Err(e) => tracing::warn!("schedule unreadable, using preset: {e}"),
    }
    let preset = WeeklySchedule::preset();
    if let Err(e) = store::write_json(path, &preset).await {
        tracing::error!("failed to save preset schedule: {e}");
    }
    preset
}

impl ScheduleController {
    /// Loads the schedule, spawns the scheduler task and registers the
    /// triggers. The task stops once the controller is dropped.
    pub async fn start(
        settings: ScheduleSettings,
        actions: Arc<PowerActions>,
        bus: Arc<BusController>,
    ) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let schedule = load_schedule(&settings.path).await;

        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(
            Scheduler {
                triggers: TriggerSet::default(),
                actions: actions.clone(),
                rx,
                poll: settings.poll_interval,
            }
            .run(),
        );

        let this = Arc::new(Self {
            settings,
            schedule: Mutex::new(schedule.clone()),
            actions,
            bus,
            tx,
        });
        this.replace_triggers(schedule).await?;
        Ok((this, task))
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        let gone = || ControlError::InvalidState("scheduler is not running".into());
        self.tx.send(make(reply)).await.map_err(|_| gone())?;
        rx.await.map_err(|_| gone())
    }

    async fn replace_triggers(&self, schedule: WeeklySchedule) -> Result<usize> {
        self.call(|reply| SchedulerCommand::Replace { schedule, reply }).await
    }

    /// Persists `schedule`, then swaps every trigger for the new set.
    /// Returns the number of triggers registered.
    pub async fn set_schedule(&self, schedule: WeeklySchedule) -> Result<usize> {
        let mut current = self.schedule.lock().await;
        store::write_json(&self.settings.path, &schedule).await?;
        *current = schedule.clone();
        let count = self.replace_triggers(schedule).await?;
        tracing::info!(triggers = count, "schedule updated");
        Ok(count)
    }

    pub async fn get_schedule(&self) -> WeeklySchedule {
        self.schedule.lock().await.clone()
    }

    /// Persists an empty week and drops every trigger.
    pub async fn clear_schedule(&self) -> Result<()> {
        self.set_schedule(WeeklySchedule::empty()).await.map(|_| ())
    }

    pub async fn triggers(&self) -> Result<Vec<DailyTrigger>> {
        self.call(|reply| SchedulerCommand::Snapshot { reply }).await
    }

    /// Fires whatever is due at `now`, as the periodic tick would.
    pub async fn run_pending_at(&self, now: NaiveDateTime) -> Result<Vec<FiredTrigger>> {
        self.call(|reply| SchedulerCommand::RunPending { now, reply }).await
    }

    /// Power on, wait, power off. For checking the CEC wiring at install time.
    pub async fn test_cycle(&self) -> TestCycleReport {
        tracing::info!("TV test cycle: power on");
        let power_on = self.actions.power_on().await;
        tokio::time::sleep(self.settings.test_cycle_delay).await;
        tracing::info!("TV test cycle: power off");
        let power_off = self.actions.power_off().await;
        TestCycleReport { power_on, power_off }
    }

    pub async fn tv_status(&self) -> Result<PowerStatus> {
        self.bus.power_status().await
    }
}

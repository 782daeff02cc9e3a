//! Run loop: one run at start, then one whenever the interval has elapsed.

use crate::domain::model::RunResult;
use crate::domain::ports::Clock;
use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

/// Something the scheduler can trigger. Errors are reported in the result.
#[async_trait]
pub trait RunPipeline: Send {
    async fn run(&mut self) -> RunResult;
}

/// Wall-clock implementation backed by tokio timers.
#[derive(Debug, Clone)]
pub struct TokioClock {
    started: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleSettings {
    pub run_once: bool,
    pub run_interval: Duration,
    pub check_interval: Duration,
}

pub struct Scheduler<R: RunPipeline, C: Clock> {
    runner: R,
    clock: C,
    settings: ScheduleSettings,
    state: SchedulerState,
    last_run_start: Option<Duration>,
    runs: u64,
}

impl<R: RunPipeline, C: Clock> Scheduler<R, C> {
    pub fn new(runner: R, clock: C, settings: ScheduleSettings) -> Self {
        Self {
            runner,
            clock,
            settings,
            state: SchedulerState::Idle,
            last_run_start: None,
            runs: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// True before the first run and once `run_interval` has passed since the last start.
    pub fn is_due(&self) -> bool {
        match self.last_run_start {
            None => true,
            Some(started) => {
                self.clock.now().saturating_sub(started) >= self.settings.run_interval
            }
        }
    }

    /// Runs the pipeline if due. Returns the result of the run, if any.
    pub async fn tick(&mut self) -> Option<RunResult> {
        if self.state == SchedulerState::Stopped || !self.is_due() {
            return None;
        }

        self.state = SchedulerState::Running;
        self.last_run_start = Some(self.clock.now());
        self.runs += 1;

        let result = self.runner.run().await;
        self.state = if result.is_success() {
            SchedulerState::Succeeded
        } else {
            tracing::warn!(
                "Run {} failed; next attempt in {:?}",
                result.run_id,
                self.settings.run_interval
            );
            SchedulerState::Failed
        };

        if self.settings.run_once {
            self.state = SchedulerState::Stopped;
        }
        Some(result)
    }

    /// Loops until stopped (single-shot) or until `shutdown` resolves.
    /// Returns the last run's result.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Option<RunResult>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut last = None;

        loop {
            if let Some(result) = self.tick().await {
                last = Some(result);
            }
            if self.state == SchedulerState::Stopped {
                break;
            }
            if matches!(self.state, SchedulerState::Succeeded | SchedulerState::Failed) {
                self.state = SchedulerState::Idle;
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("🛑 Shutdown requested, stopping scheduler");
                    self.state = SchedulerState::Stopped;
                    break;
                }
                _ = self.clock.sleep(self.settings.check_interval) => {}
            }
        }

        last
    }
}

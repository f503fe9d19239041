use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::error::ScanResult;

/// Body executed on every scheduler tick.
#[async_trait]
pub trait TickHandler: Send {
    async fn on_tick(&mut self) -> ScanResult<()>;
}

/// Cancels a running [`PeriodicScheduler`] from anywhere (signal handlers,
/// the scanner's failure path, tests).
#[derive(Clone, Debug, Default)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
    end_calls: Arc<AtomicUsize>,
}

impl SchedulerHandle {
    /// Prevents future ticks. A tick already running is left to finish.
    pub fn end_timer(&self) {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
    }

    pub fn is_ended(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// How many times `end_timer` was called on this schedule.
    pub fn end_count(&self) -> usize {
        self.end_calls.load(Ordering::SeqCst)
    }
}

/// Fires a [`TickHandler`] every `interval`, never overlapping two ticks.
///
/// The handler is awaited to completion before the next tick is even
/// scheduled. If a tick overruns the interval the next one fires right after
/// it, and the cadence restarts from there.
pub struct PeriodicScheduler {
    interval: Duration,
    handle: SchedulerHandle,
}

impl PeriodicScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            handle: SchedulerHandle::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn end_timer(&self) {
        self.handle.end_timer();
    }

    pub fn is_ended(&self) -> bool {
        self.handle.is_ended()
    }

    /// Runs ticks until `end_timer` is called (returns `Ok`) or a tick fails
    /// (returns that error without ending the timer; the caller decides).
    pub async fn run<H>(&self, handler: &mut H) -> ScanResult<()>
    where
        H: TickHandler + ?Sized,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.handle.cancel.cancelled() => {
                    debug!("⏹️ Scheduler ended, no further ticks");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            handler.on_tick().await?;
        }
    }
}

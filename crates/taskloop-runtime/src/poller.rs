use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch_service::{PollPassReport, ReturnLoopDispatcher};
use crate::gateway_config::{ConfigError, PollerConfig, MIN_POLL_INTERVAL_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerStart {
    Started,
    AlreadyRunning,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollTick {
    Completed(PollPassReport),
    Failed(String),
    /// A previous pass was still running; the tick was dropped.
    Skipped,
}

struct PollerTask {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Process-scoped lifecycle for the recurring return-loop poll.
pub struct ReturnLoopPoller {
    dispatcher: Arc<ReturnLoopDispatcher>,
    config: PollerConfig,
    running: AtomicBool,
    in_flight: Arc<AtomicBool>,
    task: Mutex<Option<PollerTask>>,
}

impl ReturnLoopPoller {
    pub fn new(dispatcher: Arc<ReturnLoopDispatcher>, config: PollerConfig) -> Self {
        Self {
            dispatcher,
            config,
            running: AtomicBool::new(false),
            in_flight: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> PollerConfig {
        self.config
    }

    /// Spawns the timer loop on the current tokio runtime. Calling it again
    /// while running is a no-op.
    pub fn start(&self) -> Result<PollerStart, ConfigError> {
        if !self.config.enabled {
            info!("return-loop poller disabled");
            return Ok(PollerStart::Disabled);
        }
        let interval_ms = self.config.interval_ms();
        if interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(ConfigError::PollIntervalTooSmall(interval_ms));
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(PollerStart::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(run_poller_loop(
            self.dispatcher.clone(),
            self.in_flight.clone(),
            self.config.interval,
            shutdown_rx,
        ));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(PollerTask { shutdown_tx, task });
        info!(interval_ms, "return-loop poller started");
        Ok(PollerStart::Started)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_pass_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Runs one pass unless another is in flight.
    pub async fn tick(&self) -> PollTick {
        run_guarded_pass(&self.dispatcher, &self.in_flight).await
    }

    /// Stops the timer and waits for a pass it already started.
    pub async fn shutdown(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(PollerTask { shutdown_tx, task }) = task {
            let _ = shutdown_tx.send(());
            let _ = task.await;
            info!("return-loop poller stopped");
        }
        self.running.store(false, Ordering::Release);
    }
}

async fn run_guarded_pass(dispatcher: &ReturnLoopDispatcher, in_flight: &Arc<AtomicBool>) -> PollTick {
    let Some(_guard) = InFlightGuard::acquire(in_flight) else {
        debug!("return-loop pass still in flight; tick dropped");
        return PollTick::Skipped;
    };
    match dispatcher.poll_return_loop_once().await {
        Ok(report) => PollTick::Completed(report),
        Err(error) => {
            let error = format!("{error:#}");
            warn!(error = %error, "return-loop poller error");
            PollTick::Failed(error)
        }
    }
}

async fn run_poller_loop(
    dispatcher: Arc<ReturnLoopDispatcher>,
    in_flight: Arc<AtomicBool>,
    period: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut pass: Option<JoinHandle<PollTick>> = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if pass.as_ref().is_some_and(|pass| !pass.is_finished()) {
                    debug!("return-loop pass still in flight; tick dropped");
                    continue;
                }
                let dispatcher = dispatcher.clone();
                let in_flight = in_flight.clone();
                pass = Some(tokio::spawn(async move {
                    run_guarded_pass(&dispatcher, &in_flight).await
                }));
            }
            _ = &mut shutdown_rx => {
                break;
            }
        }
    }

    if let Some(pass) = pass {
        let _ = pass.await;
    }
}

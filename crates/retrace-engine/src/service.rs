use crate::recorder::Recorder;
use async_trait::async_trait;
use retrace_common::error::DriverError;
use retrace_common::protocol::{ControlCommand, ControlResponse, PageEvent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

const CHANNEL_CAPACITY: usize = 256;
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);
const IDLE_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Recorder service has shut down")]
    Closed,
    #[error("Recorder service dropped the request without responding")]
    NoResponse,
}

/// Reads the page's current URL for the polling fallback.
#[async_trait]
pub trait LocationProbe: Send + Sync {
    async fn current_url(&self) -> Result<String, DriverError>;
}

enum ServiceMessage {
    Command {
        cmd: ControlCommand,
        reply: oneshot::Sender<ControlResponse>,
    },
    Event(PageEvent),
}

/// Cloneable front door to a running `RecorderService`.
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<ServiceMessage>,
}

impl RecorderHandle {
    /// Send a control command and wait for its single response.
    pub async fn send(&self, cmd: ControlCommand) -> Result<ControlResponse, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ServiceMessage::Command { cmd, reply })
            .await
            .map_err(|_| ServiceError::Closed)?;
        rx.await.map_err(|_| ServiceError::NoResponse)
    }

    pub async fn emit(&self, event: PageEvent) -> Result<(), ServiceError> {
        self.tx
            .send(ServiceMessage::Event(event))
            .await
            .map_err(|_| ServiceError::Closed)
    }
}

/// Owns a `Recorder` and serialises commands, page events, debounce
/// deadlines and location polls through one loop.
pub struct RecorderService {
    recorder: Recorder,
    rx: mpsc::Receiver<ServiceMessage>,
    probe: Option<Arc<dyn LocationProbe>>,
    poll_interval: Duration,
}

impl RecorderService {
    pub fn new(recorder: Recorder, poll_interval: Duration) -> (Self, RecorderHandle) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let service = Self {
            recorder,
            rx,
            probe: None,
            poll_interval,
        };
        (service, RecorderHandle { tx })
    }

    pub fn with_probe(mut self, probe: Arc<dyn LocationProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn spawn(self) -> JoinHandle<Recorder> {
        tokio::spawn(self.run())
    }

    /// Runs until every handle is dropped, then hands the recorder back.
    pub async fn run(mut self) -> Recorder {
        let mut poll = tokio::time::interval(self.poll_interval.max(MIN_POLL_INTERVAL));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Recorder service running");

        loop {
            let deadline = self.recorder.next_deadline();
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + IDLE_WAIT);

            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(ServiceMessage::Command { cmd, reply }) => {
                        let response = self.recorder.execute(cmd);
                        if reply.send(response).is_err() {
                            debug!("Requester for {} went away", cmd);
                        }
                    }
                    Some(ServiceMessage::Event(event)) => {
                        self.recorder.handle_event(event, Instant::now());
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                    self.recorder.flush_due(Instant::now());
                }
                _ = poll.tick(), if self.probe.is_some() => {
                    if let Some(probe) = self.probe.clone() {
                        match probe.current_url().await {
                            Ok(url) => {
                                self.recorder.observe_location(&url);
                            }
                            Err(e) => debug!("Location poll failed: {}", e),
                        }
                    }
                }
            }
        }

        info!("Recorder service stopped");
        self.recorder
    }
}

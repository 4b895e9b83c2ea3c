//! Session control state machine.
//!
//! `Recorder` owns the mode, the session, the capture pipeline and the
//! navigation detector. Hosts feed it `PageEvent`s and control commands; it
//! decides what gets appended and persists `{active, session}` after every
//! mutation when a store is configured.

use crate::capture::{ActionSink, CaptureError, CapturePipeline, Debouncer};
use crate::clock::{Clock, SystemClock};
use crate::config::RecorderConfig;
use crate::dom::LineageNode;
use crate::navigation::NavigationDetector;
use crate::selector::SelectorResolver;
use crate::storage::{KeyValueStore, StorageError};
use retrace_common::protocol::{
    Action, ControlCommand, ControlResponse, ElementLineage, NavigationTrigger, PageContext,
    PageEvent, RecorderSnapshot, Session,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Storage key for the persisted recorder state.
pub const STATE_KEY: &str = "retrace.recorder";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecorderMode {
    #[default]
    Inactive,
    Active,
}

impl fmt::Display for RecorderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderMode::Inactive => write!(f, "inactive"),
            RecorderMode::Active => write!(f, "active"),
        }
    }
}

pub struct Recorder {
    mode: RecorderMode,
    session: Session,
    pipeline: CapturePipeline,
    detector: NavigationDetector,
    context: PageContext,
    clock: Arc<dyn Clock>,
    store: Option<Box<dyn KeyValueStore>>,
    sink: Option<Box<dyn ActionSink>>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(&RecorderConfig::default())
    }
}

impl Recorder {
    pub fn new(config: &RecorderConfig) -> Self {
        let debouncer = Debouncer::new(
            config.debounce_policy,
            Duration::from_millis(config.debounce_ms),
        );
        Self {
            mode: RecorderMode::Inactive,
            session: Session::new(),
            pipeline: CapturePipeline::new(SelectorResolver::new(config.selector_strategy), debouncer),
            detector: NavigationDetector::new(),
            context: PageContext::default(),
            clock: Arc::new(SystemClock),
            store: None,
            sink: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: impl ActionSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Attach a store and resume whatever state it holds.
    pub fn with_store(mut self, store: impl KeyValueStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        if let Err(e) = self.restore() {
            warn!("Could not restore recorder state: {}", e);
        }
        self
    }

    pub fn mode(&self) -> RecorderMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.mode == RecorderMode::Active
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn actions(&self) -> &[Action] {
        self.session.actions()
    }

    pub fn pipeline(&self) -> &CapturePipeline {
        &self.pipeline
    }

    pub fn context(&self) -> &PageContext {
        &self.context
    }

    /// Returns whether the mode changed.
    pub fn start(&mut self) -> bool {
        if self.is_active() {
            return false;
        }
        self.pipeline.attach();
        self.mode = RecorderMode::Active;
        info!("Recording started");
        self.persist();
        true
    }

    /// Returns whether the mode changed. Pending fills are dropped.
    pub fn stop(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        let dropped = self.pipeline.cancel_pending();
        if dropped > 0 {
            debug!("Cancelled {} pending fill(s)", dropped);
        }
        self.pipeline.detach();
        self.mode = RecorderMode::Inactive;
        info!("Recording stopped with {} action(s)", self.session.len());
        self.persist();
        true
    }

    pub fn clear(&mut self) {
        self.pipeline.cancel_pending();
        self.session.clear();
        info!("Session cleared");
        self.persist();
    }

    /// Commit every pending fill, due or not. Returns what was committed.
    pub fn flush(&mut self) -> Vec<Action> {
        let produced = self.pipeline.flush_all(self.clock.now_ms());
        self.commit_all(produced)
    }

    pub fn export(&self) -> Result<String, serde_json::Error> {
        self.session.to_json()
    }

    pub fn execute(&mut self, cmd: ControlCommand) -> ControlResponse {
        debug!("Control command {}", cmd);
        match cmd {
            ControlCommand::Start => {
                self.start();
            }
            ControlCommand::Stop => {
                self.stop();
            }
            ControlCommand::Clear => self.clear(),
            ControlCommand::Flush => {
                self.flush();
            }
            ControlCommand::Export => {
                return match self.export() {
                    Ok(json) => ControlResponse {
                        json: Some(json),
                        ..ControlResponse::ok(self.is_active())
                    },
                    Err(e) => ControlResponse::failed(e.to_string()),
                };
            }
            ControlCommand::GetAll => {
                return ControlResponse {
                    actions: Some(self.session.actions().to_vec()),
                    ..ControlResponse::ok(self.is_active())
                };
            }
        }
        ControlResponse::ok(self.is_active())
    }

    /// Feed one page event. Returns the actions committed because of it.
    ///
    /// Capture failures are logged and swallowed; they never change the mode
    /// or the session.
    pub fn handle_event(&mut self, event: PageEvent, now: Instant) -> Vec<Action> {
        match self.capture(event, now) {
            Ok(actions) => actions,
            Err(e) => {
                warn!("Dropped page event: {}", e);
                Vec::new()
            }
        }
    }

    fn capture(&mut self, event: PageEvent, now: Instant) -> Result<Vec<Action>, CaptureError> {
        let now_ms = self.clock.now_ms();
        let produced = match event {
            PageEvent::Click { target } => {
                let node = lineage_target(&target)?;
                self.pipeline.click(&node, now_ms)?
            }
            PageEvent::Input { target, value } => {
                let node = lineage_target(&target)?;
                self.pipeline.input(&node, &value, now, now_ms)?
            }
            PageEvent::Navigation { url, trigger } => self.navigate(&url, trigger),
            PageEvent::Mutation { added, removed } => {
                if self.detector.needs_reattach(added, removed, self.is_active()) {
                    self.pipeline.reattach();
                }
                Vec::new()
            }
            PageEvent::Page { url, title } => {
                self.context.page_title = (!title.is_empty()).then_some(title);
                self.navigate(&url, NavigationTrigger::Load)
            }
        };
        Ok(self.commit_all(produced))
    }

    fn navigate(&mut self, url: &str, trigger: NavigationTrigger) -> Vec<Action> {
        if !url.is_empty() {
            self.context.page_url = Some(url.to_string());
        }
        match self.detector.observe(url, trigger, self.is_active()) {
            Some(url) => {
                // Fills typed on the previous route precede the goto.
                let mut actions = self.pipeline.flush_all(self.clock.now_ms());
                actions.push(Action::goto(url, self.clock.now_ms()));
                actions
            }
            None => Vec::new(),
        }
    }

    /// Polling fallback: compare the host's current URL with the last one seen.
    pub fn observe_location(&mut self, url: &str) -> Vec<Action> {
        let produced = self.navigate(url, NavigationTrigger::Poll);
        self.commit_all(produced)
    }

    /// Commit fills whose quiet period elapsed.
    pub fn flush_due(&mut self, now: Instant) -> Vec<Action> {
        let produced = self.pipeline.flush_due(now, self.clock.now_ms());
        self.commit_all(produced)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pipeline.next_deadline()
    }

    fn commit_all(&mut self, produced: Vec<Action>) -> Vec<Action> {
        if produced.is_empty() {
            return produced;
        }
        let mut committed = Vec::with_capacity(produced.len());
        for action in produced {
            let mut action = action.with_context(self.context.clone());
            let ts = self.session.push(action.clone());
            action.set_timestamp(ts);
            debug!("Recorded {} at {}", action.kind(), ts);
            if let Some(sink) = self.sink.as_mut() {
                sink.commit(&action);
            }
            committed.push(action);
        }
        self.persist();
        committed
    }

    pub fn snapshot(&self) -> RecorderSnapshot {
        RecorderSnapshot {
            active: self.is_active(),
            session: self.session.clone(),
        }
    }

    /// Load state from the store, if one is set and holds a snapshot.
    pub fn restore(&mut self) -> Result<bool, StorageError> {
        let Some(store) = self.store.as_ref() else {
            return Ok(false);
        };
        let Some(value) = store.get(STATE_KEY)? else {
            return Ok(false);
        };
        let snapshot: RecorderSnapshot = serde_json::from_value(value)?;
        self.session = snapshot.session;
        if snapshot.active {
            self.pipeline.attach();
            self.mode = RecorderMode::Active;
        }
        info!(
            "Restored {} recorder with {} action(s)",
            self.mode,
            self.session.len()
        );
        Ok(true)
    }

    fn persist(&mut self) {
        let snapshot = self.snapshot();
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let result = serde_json::to_value(&snapshot)
            .map_err(StorageError::from)
            .and_then(|value| store.set(STATE_KEY, value));
        if let Err(e) = result {
            warn!("Failed to persist recorder state: {}", e);
        }
    }
}

fn lineage_target(lineage: &ElementLineage) -> Result<LineageNode<'_>, CaptureError> {
    LineageNode::target(lineage).ok_or(CaptureError::MissingTarget)
}

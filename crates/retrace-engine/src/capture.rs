//! Event capture: page events in, normalized actions out.
//!
//! The pipeline owns no session. It turns clicks and keystrokes into
//! `Action`s for whoever drives it, coalescing keystrokes through a
//! `Debouncer` so a burst of typing yields one `fill` per pause.

use crate::dom::DomElement;
use crate::selector::{ResolveError, SelectorResolver};
use retrace_common::protocol::Action;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Event target is missing")]
    MissingTarget,

    #[error("Could not resolve selector: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Malformed page event: {0}")]
    Malformed(String),
}

/// Receives every committed action, in commit order.
pub trait ActionSink: Send {
    fn commit(&mut self, action: &Action);
}

impl<F> ActionSink for F
where
    F: FnMut(&Action) + Send,
{
    fn commit(&mut self, action: &Action) {
        self(action)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebouncePolicy {
    /// One pending fill at a time, keyed by the most recent target.
    #[default]
    Global,
    /// One quiet-period timer per field.
    PerField,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFill {
    pub selector: String,
    pub value: String,
    pub deadline: Instant,
}

impl PendingFill {
    pub fn into_action(self, timestamp: u64) -> Action {
        Action::fill(self.selector, self.value, timestamp)
    }
}

/// Coalesces input events with a quiet period.
#[derive(Debug)]
pub struct Debouncer {
    policy: DebouncePolicy,
    quiet: Duration,
    pending: Vec<PendingFill>,
}

impl Debouncer {
    pub fn new(policy: DebouncePolicy, quiet: Duration) -> Self {
        Self {
            policy,
            quiet,
            pending: Vec::new(),
        }
    }

    pub fn policy(&self) -> DebouncePolicy {
        self.policy
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet
    }

    /// Record a keystroke and (re)arm its timer.
    ///
    /// Returns fills displaced by this keystroke. Under the global policy that
    /// is the previous field's pending fill, committed with its last value.
    pub fn push(&mut self, selector: String, value: String, now: Instant) -> Vec<PendingFill> {
        let deadline = now + self.quiet;
        match self.policy {
            DebouncePolicy::Global => {
                let switched = self.pending.first().is_some_and(|p| p.selector != selector);
                let displaced = if switched {
                    std::mem::take(&mut self.pending)
                } else {
                    Vec::new()
                };
                self.pending = vec![PendingFill {
                    selector,
                    value,
                    deadline,
                }];
                displaced
            }
            DebouncePolicy::PerField => {
                match self.pending.iter_mut().find(|p| p.selector == selector) {
                    Some(p) => {
                        p.value = value;
                        p.deadline = deadline;
                    }
                    None => self.pending.push(PendingFill {
                        selector,
                        value,
                        deadline,
                    }),
                }
                Vec::new()
            }
        }
    }

    /// Remove and return fills whose quiet period has elapsed, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<PendingFill> {
        let (mut due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.deadline <= now);
        self.pending = rest;
        due.sort_by_key(|p| p.deadline);
        due
    }

    /// Remove and return every pending fill, earliest deadline first.
    pub fn take_all(&mut self) -> Vec<PendingFill> {
        let mut all = std::mem::take(&mut self.pending);
        all.sort_by_key(|p| p.deadline);
        all
    }

    /// Drop pending fills without committing them.
    pub fn cancel(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.deadline).min()
    }

    pub fn pending(&self) -> &[PendingFill] {
        &self.pending
    }
}

pub struct CapturePipeline {
    resolver: SelectorResolver,
    debouncer: Debouncer,
    attached: bool,
    generation: u64,
}

impl CapturePipeline {
    pub fn new(resolver: SelectorResolver, debouncer: Debouncer) -> Self {
        Self {
            resolver,
            debouncer,
            attached: false,
            generation: 0,
        }
    }

    pub fn resolver(&self) -> &SelectorResolver {
        &self.resolver
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Increments on every effective attach. Lets a host tell that listeners
    /// were rebound.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bind listeners. Returns false if already attached.
    pub fn attach(&mut self) -> bool {
        if self.attached {
            return false;
        }
        self.attached = true;
        self.generation += 1;
        debug!("Capture attached (generation {})", self.generation);
        true
    }

    /// Unbind listeners. Pending fills are left alone.
    pub fn detach(&mut self) -> bool {
        if !self.attached {
            return false;
        }
        self.attached = false;
        debug!("Capture detached");
        true
    }

    /// Rebind listeners after a structural page change. No-op while detached.
    pub fn reattach(&mut self) -> bool {
        if !self.attached {
            return false;
        }
        self.detach();
        self.attach()
    }

    /// Click: commits pending fills first, then the click itself.
    pub fn click<E: DomElement>(&mut self, target: &E, now_ms: u64) -> Result<Vec<Action>, CaptureError> {
        if !self.attached {
            return Ok(Vec::new());
        }
        let selector = self.resolver.resolve(target)?;
        let mut actions: Vec<Action> = self
            .debouncer
            .take_all()
            .into_iter()
            .map(|p| p.into_action(now_ms))
            .collect();
        actions.push(Action::click(selector, now_ms));
        Ok(actions)
    }

    /// Keystroke: arms the debounce timer. Returns fills committed early
    /// because the user moved to another field.
    pub fn input<E: DomElement>(
        &mut self,
        target: &E,
        value: &str,
        now: Instant,
        now_ms: u64,
    ) -> Result<Vec<Action>, CaptureError> {
        if !self.attached {
            return Ok(Vec::new());
        }
        let selector = self.resolver.resolve(target)?;
        Ok(self
            .debouncer
            .push(selector, value.to_string(), now)
            .into_iter()
            .map(|p| p.into_action(now_ms))
            .collect())
    }

    pub fn flush_due(&mut self, now: Instant, now_ms: u64) -> Vec<Action> {
        self.debouncer
            .take_due(now)
            .into_iter()
            .map(|p| p.into_action(now_ms))
            .collect()
    }

    pub fn flush_all(&mut self, now_ms: u64) -> Vec<Action> {
        self.debouncer
            .take_all()
            .into_iter()
            .map(|p| p.into_action(now_ms))
            .collect()
    }

    pub fn cancel_pending(&mut self) -> usize {
        self.debouncer.cancel()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.next_deadline()
    }
}

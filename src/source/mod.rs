//! Sources of desired endpoints.
//!
//! A source declares the records that should exist, derived from whatever it
//! watches (cluster workloads, files, ...). Each source implements the
//! [`Source`] trait. The following sources are currently available:
//! - [`FileSource`]: reads desired endpoints from a JSON document
//! - [`MultiSource`]: merges other sources and applies default targets

mod file;

pub use file::{FileSource, FileSourceConfig};

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::{Duration, Instant},
};

use log::debug;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::{
    cancel::CancelToken,
    endpoint::{Endpoint, Targets},
};

/// A `Source` produces the desired endpoints of one kind of upstream object.
#[cfg_attr(test, automock)]
pub trait Source: Send + std::fmt::Debug {
    fn endpoints(&self, ctx: &CancelToken) -> Result<Vec<Endpoint>, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum SourceError {
    #[error("could not read source data: `{0}`")]
    Io(String),
    #[error("could not parse source data: `{0}`")]
    Parse(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("internal source error: `{0}`")]
    Internal(String),
}

impl From<String> for SourceError {
    fn from(s: String) -> Self {
        SourceError::Internal(s)
    }
}

/// Merges the endpoints of multiple sources in order and optionally fills in
/// default targets.
#[derive(Debug)]
pub struct MultiSource {
    sources: Vec<Box<dyn Source>>,
    default_targets: Targets,
    force_default_targets: bool,
}

impl MultiSource {
    pub fn new(sources: Vec<Box<dyn Source>>) -> MultiSource {
        MultiSource {
            sources,
            default_targets: Targets::default(),
            force_default_targets: false,
        }
    }

    /// Targets applied to endpoints that declare none. With `force` set they
    /// override source-provided targets as well.
    pub fn with_default_targets(mut self, targets: Targets, force: bool) -> MultiSource {
        self.default_targets = targets;
        self.force_default_targets = force;
        self
    }
}

impl Source for MultiSource {
    fn endpoints(&self, ctx: &CancelToken) -> Result<Vec<Endpoint>, SourceError> {
        let mut merged = Vec::new();
        for source in &self.sources {
            if ctx.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            merged.extend(source.endpoints(ctx)?);
        }

        if !self.default_targets.is_empty() {
            for ep in &mut merged {
                if ep.targets.is_empty() {
                    ep.targets = self.default_targets.clone();
                } else if self.force_default_targets {
                    debug!("Overriding targets of {} with the default targets", ep.dns_name);
                    ep.targets = self.default_targets.clone();
                }
            }
        }
        Ok(merged)
    }
}

/// A rate-limited event channel between sources and the reconciliation loop.
///
/// Sources call [`SyncSignal::fire`] when the objects they watch change; the
/// loop drains the signal with [`SyncSignal::take`] and runs early. Fires are
/// dropped while the stop token is cancelled or while the previous fire is
/// younger than the configured minimum interval.
#[derive(Clone)]
pub struct SyncSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    fired: AtomicBool,
    min_interval: Duration,
    last_fire: Mutex<Option<Instant>>,
    stop: CancelToken,
}

impl SyncSignal {
    pub fn new(min_interval: Duration, stop: CancelToken) -> SyncSignal {
        SyncSignal {
            inner: Arc::new(SignalInner {
                fired: AtomicBool::new(false),
                min_interval,
                last_fire: Mutex::new(None),
                stop,
            }),
        }
    }

    /// Request an early reconciliation.
    pub fn fire(&self) {
        if self.inner.stop.is_cancelled() {
            return;
        }
        let mut last_fire = self
            .inner
            .last_fire
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = *last_fire {
            if last.elapsed() < self.inner.min_interval {
                debug!("Dropping sync event, the previous one is too recent");
                return;
            }
        }
        *last_fire = Some(Instant::now());
        self.inner.fired.store(true, Ordering::Relaxed);
    }

    /// Consume a pending fire, if any.
    pub fn take(&self) -> bool {
        self.inner.fired.swap(false, Ordering::Relaxed)
    }
}

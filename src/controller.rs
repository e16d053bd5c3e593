//! The reconciliation loop.
//!
//! A [`Controller`] performs the complete set of steps needed to bring the
//! provider's records up-to-date with the declared sources: fetch desired
//! endpoints, let the provider adjust them, read the current state through
//! the registry, calculate a plan and apply it.

use std::{
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    cancel::CancelToken,
    endpoint::RecordType,
    plan::{Plan, Policy},
    registry::{Registry, RegistryError},
    source::{Source, SourceError, SyncSignal},
};

/// Loop behaviour of a [`Controller`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub policy: Policy,
    pub managed_record_types: Vec<RecordType>,
    /// Time between reconciliation cycles.
    pub interval: Duration,
    /// Minimum spacing of event-triggered cycles.
    pub min_event_interval: Duration,
    /// How often the sleeping loop checks for cancellation and events.
    /// Lowered in tests to keep them fast.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            policy: Policy::Sync,
            managed_record_types: vec![RecordType::A, RecordType::Aaaa, RecordType::Cname],
            interval: Duration::from_secs(60),
            min_event_interval: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    #[error("`{0}`")]
    Source(SourceError),
    #[error("`{0}`")]
    Registry(RegistryError),
}

impl From<SourceError> for ControllerError {
    fn from(e: SourceError) -> Self {
        ControllerError::Source(e)
    }
}

impl From<RegistryError> for ControllerError {
    fn from(e: RegistryError) -> Self {
        ControllerError::Registry(e)
    }
}

/// Periodically reconciles a registry (and the provider behind it) with the
/// desired endpoints of a source.
pub struct Controller {
    source: Box<dyn Source>,
    registry: Box<dyn Registry>,
    config: ControllerConfig,
    signal: SyncSignal,
}

impl Controller {
    pub fn new(
        source: Box<dyn Source>,
        registry: Box<dyn Registry>,
        config: ControllerConfig,
        ctx: &CancelToken,
    ) -> Controller {
        let signal = SyncSignal::new(config.min_event_interval, ctx.clone());
        Controller {
            source,
            registry,
            config,
            signal,
        }
    }

    /// A handle sources can fire to request an early reconciliation.
    pub fn sync_signal(&self) -> SyncSignal {
        self.signal.clone()
    }

    /// Run a single reconciliation cycle.
    pub fn run_once(&mut self, ctx: &CancelToken) -> Result<(), ControllerError> {
        debug!("Starting reconciliation cycle");
        let desired = self.source.endpoints(ctx)?;
        let desired = self.registry.adjust_endpoints(desired)?;
        let current = self.registry.records(ctx)?;

        let plan = Plan::calculate(
            &desired,
            &current,
            self.config.policy,
            &self.config.managed_record_types,
            &self.registry.owner_id(),
        );
        for conflict in &plan.conflicts {
            warn!("{}", conflict);
        }

        if !plan.changes.has_changes() {
            info!("All records are already up to date");
            return Ok(());
        }
        info!(
            "Applying plan: {} to create, {} to update, {} to delete",
            plan.changes.create.len(),
            plan.changes.update_new.len(),
            plan.changes.delete.len()
        );
        self.registry.apply_changes(ctx, &plan.changes)?;
        Ok(())
    }

    /// Reconcile until the token is cancelled. Data errors are logged and
    /// absorbed; only cancellation ends the loop.
    pub fn run(&mut self, ctx: &CancelToken) {
        info!(
            "Starting reconciliation every {:?} with policy {}",
            self.config.interval, self.config.policy
        );
        while !ctx.is_cancelled() {
            if let Err(e) = self.run_once(ctx) {
                error!("Reconciliation cycle failed: {}", e);
            }

            let deadline = Instant::now() + self.config.interval;
            while Instant::now() < deadline {
                if ctx.is_cancelled() {
                    info!("Shutting down reconciliation loop");
                    return;
                }
                if self.signal.take() {
                    debug!("Reconciliation triggered by a source event");
                    break;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                thread::sleep(remaining.min(self.config.poll_interval));
            }
        }
        info!("Shutting down reconciliation loop");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::endpoint::{Endpoint, RESOURCE_LABEL};
    use crate::provider::{InMemoryProvider, Provider, ProviderError};
    use crate::registry::{MockRegistry, TxtRegistry, TxtRegistryConfig};
    use crate::source::MockSource;

    fn ctx() -> CancelToken {
        CancelToken::new()
    }

    fn file_backed_desired() -> Vec<Endpoint> {
        vec![
            Endpoint::new("www.example.org", RecordType::Cname, vec!["lb.example.com"])
                .with_label(RESOURCE_LABEL, "ingress/default/www"),
            Endpoint::new("api.example.org", RecordType::A, vec!["1.1.1.1"])
                .with_label(RESOURCE_LABEL, "service/default/api"),
        ]
    }

    fn controller_over_inmemory(provider: &InMemoryProvider) -> Controller {
        let registry = TxtRegistry::from_config(
            Box::new(provider.clone()),
            &TxtRegistryConfig {
                owner_id: "owner".to_string(),
                prefix: "txt.".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let mut source = MockSource::new();
        source.expect_endpoints().returning(|_| Ok(file_backed_desired()));

        Controller::new(
            Box::new(source),
            Box::new(registry),
            ControllerConfig::default(),
            &ctx(),
        )
    }

    #[test]
    fn cycle_creates_owned_records_end_to_end() {
        let provider = InMemoryProvider::new().with_zone("example.org");
        let mut controller = controller_over_inmemory(&provider);

        controller.run_once(&ctx()).unwrap();

        let records = provider.records(&ctx()).unwrap();
        // Two payload records plus two ownership TXTs.
        assert_eq!(records.len(), 4);
        for ep in records.iter().filter(|r| r.record_type != RecordType::Txt) {
            assert_eq!(ep.owner(), "owner");
        }

        // A second cycle is a no-op: the state converged.
        controller.run_once(&ctx()).unwrap();
        assert_eq!(provider.records(&ctx()).unwrap().len(), 4);
    }

    #[test]
    fn should_not_apply_when_nothing_changed() {
        let mut source = MockSource::new();
        source.expect_endpoints().returning(|_| Ok(vec![]));

        let mut registry = MockRegistry::new();
        registry.expect_adjust_endpoints().returning(Ok);
        registry.expect_records().returning(|_| Ok(vec![]));
        registry.expect_owner_id().return_const("owner".to_string());
        registry.expect_apply_changes().never();

        let mut controller = Controller::new(
            Box::new(source),
            Box::new(registry),
            ControllerConfig::default(),
            &ctx(),
        );
        controller.run_once(&ctx()).unwrap();
    }

    #[test]
    fn run_once_surfaces_registry_errors() {
        let mut source = MockSource::new();
        source.expect_endpoints().returning(|_| Ok(vec![]));

        let mut registry = MockRegistry::new();
        registry.expect_adjust_endpoints().returning(Ok);
        registry
            .expect_records()
            .returning(|_| Err(RegistryError::Provider(ProviderError::Transient("503".into()))));

        let mut controller = Controller::new(
            Box::new(source),
            Box::new(registry),
            ControllerConfig::default(),
            &ctx(),
        );
        let err = controller.run_once(&ctx()).unwrap_err();
        assert!(matches!(err, ControllerError::Registry(_)));
    }

    #[test]
    fn loop_runs_until_cancelled_and_honors_events() {
        let provider = InMemoryProvider::new().with_zone("example.org");
        let mut controller = controller_over_inmemory(&provider);
        let token = ctx();

        let config = ControllerConfig {
            // Long interval: only the event signal can trigger a second run.
            interval: Duration::from_secs(3600),
            min_event_interval: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        controller.config = config;
        let signal = controller.sync_signal();

        let loop_token = token.clone();
        let handle = thread::spawn(move || controller.run(&loop_token));

        // Give the first cycle time to finish, then request another one.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(provider.records(&ctx()).unwrap().len(), 4);
        signal.fire();
        thread::sleep(Duration::from_millis(100));

        token.cancel();
        handle.join().unwrap();
    }
}

//! A registry without ownership tracking.

use crate::{cancel::CancelToken, endpoint::Endpoint, plan::Changes, provider::Provider};

use super::{Registry, RegistryError};

/// Passes records and changes straight through to the provider.
///
/// Useful for providers that track record ownership natively; every record
/// the provider returns is treated as ours, so a sync policy will delete any
/// record the sources no longer declare.
pub struct NoopRegistry {
    provider: Box<dyn Provider>,
}

impl NoopRegistry {
    pub fn new(provider: Box<dyn Provider>) -> NoopRegistry {
        NoopRegistry { provider }
    }
}

impl Registry for NoopRegistry {
    fn records(&mut self, ctx: &CancelToken) -> Result<Vec<Endpoint>, RegistryError> {
        self.provider.records(ctx).map_err(RegistryError::from)
    }

    fn apply_changes(
        &mut self,
        ctx: &CancelToken,
        changes: &Changes,
    ) -> Result<(), RegistryError> {
        self.provider.apply_changes(ctx, changes).map_err(RegistryError::from)
    }

    fn adjust_endpoints(&self, endpoints: Vec<Endpoint>) -> Result<Vec<Endpoint>, RegistryError> {
        self.provider.adjust_endpoints(endpoints).map_err(RegistryError::from)
    }

    fn owner_id(&self) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RecordType;
    use crate::provider::MockProvider;

    #[test]
    fn should_pass_records_and_changes_through() {
        let mut provider = MockProvider::new();
        provider.expect_records().times(1).returning(|_| {
            Ok(vec![Endpoint::new("foo.example.org", RecordType::A, vec!["1.1.1.1"])])
        });
        provider
            .expect_apply_changes()
            .withf(|_, changes| changes.create.len() == 1)
            .times(1)
            .returning(|_, _| Ok(()));

        let mut registry = NoopRegistry::new(Box::new(provider));
        let records = registry.records(&CancelToken::new()).unwrap();
        assert_eq!(records.len(), 1);
        // No owner stamping happens on the way through.
        assert_eq!(records[0].owner(), "");

        let changes = Changes {
            create: vec![Endpoint::new("new.example.org", RecordType::A, vec!["2.2.2.2"])],
            ..Default::default()
        };
        registry.apply_changes(&CancelToken::new(), &changes).unwrap();
        assert_eq!(registry.owner_id(), "");
    }
}

//! A fully functional in-process [`Provider`].
//!
//! Used as the reference implementation of the provider contract, in tests
//! and for dry-running configurations against synthetic zones without
//! touching a real DNS service. Records are partitioned into zones; a record
//! belongs to the longest zone its name is a suffix of.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, info, warn};

use crate::{
    cancel::CancelToken,
    endpoint::{Endpoint, TTL},
    plan::Changes,
};

use super::{
    regional::{self, RegionalHostname, RegionalHostnameError, RegionalHostnamesApi},
    DomainFilter, Provider, ProviderError,
};

type ZoneStore = BTreeMap<String, Vec<Endpoint>>;

/// An in-memory DNS provider. Cloning yields a handle onto the same record
/// store, which is how tests and the dry-run binary inspect applied state.
#[derive(Clone, Default)]
pub struct InMemoryProvider {
    zones: Arc<Mutex<ZoneStore>>,
    regional: Option<InMemoryRegionalHostnames>,
    domain_filter: DomainFilter,
    default_ttl: Option<TTL>,
    dry_run: bool,
}

impl InMemoryProvider {
    pub fn new() -> InMemoryProvider {
        InMemoryProvider::default()
    }

    /// Add an (empty) zone to the provider.
    pub fn with_zone(self, name: &str) -> InMemoryProvider {
        self.lock_zones().entry(normalize_zone(name)).or_default();
        self
    }

    pub fn with_domain_filter(mut self, filter: DomainFilter) -> InMemoryProvider {
        self.domain_filter = filter;
        self
    }

    /// TTL applied to desired endpoints without one during
    /// [`Provider::adjust_endpoints`].
    pub fn with_default_ttl(mut self, ttl: TTL) -> InMemoryProvider {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> InMemoryProvider {
        self.dry_run = dry_run;
        self
    }

    /// Enable the regional hostname side resource.
    pub fn with_regional_hostnames(mut self) -> InMemoryProvider {
        self.regional = Some(InMemoryRegionalHostnames::default());
        self
    }

    /// Replace the records of a zone, creating it if needed.
    pub fn set_records(&self, zone: &str, records: Vec<Endpoint>) {
        self.lock_zones().insert(normalize_zone(zone), records);
    }

    /// The current regional hostname list, if the side resource is enabled.
    pub fn regional_hostnames(&self) -> Vec<RegionalHostname> {
        match &self.regional {
            Some(r) => r.lock().clone(),
            None => Vec::new(),
        }
    }

    fn lock_zones(&self) -> MutexGuard<'_, ZoneStore> {
        self.zones.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The zone a record belongs to: the longest zone name the record name
    /// is equal to or a dot-separated suffix of.
    fn find_zone(&self, dns_name: &str) -> Option<String> {
        self.lock_zones()
            .keys()
            .filter(|z| dns_name == z.as_str() || dns_name.ends_with(&format!(".{}", z)))
            .max_by_key(|z| z.len())
            .cloned()
    }

    fn apply_zone_changes(
        &self,
        zone: &str,
        changes: &Changes,
    ) -> Result<(), ProviderError> {
        let mut zones = self.lock_zones();
        let records = zones
            .get_mut(zone)
            .ok_or_else(|| ProviderError::NoZone(zone.to_string()))?;

        // Validate the whole batch first so a zone is applied atomically.
        for ep in &changes.create {
            if records.iter().any(|r| r.key() == ep.key()) {
                return Err(ProviderError::Conflict(format!(
                    "record {} already exists",
                    ep.key()
                )));
            }
        }
        for ep in &changes.delete {
            if !records.iter().any(|r| r.key() == ep.key()) {
                return Err(ProviderError::Conflict(format!(
                    "record {} not found for delete",
                    ep.key()
                )));
            }
        }

        if self.dry_run {
            for ep in &changes.create {
                info!("Would create record {}", ep);
            }
            for ep in &changes.update_new {
                info!("Would update record {}", ep);
            }
            for ep in &changes.delete {
                info!("Would delete record {}", ep);
            }
            return Ok(());
        }

        for ep in &changes.create {
            debug!("Creating record {} in zone {}", ep, zone);
            records.push(ep.clone());
        }
        for (old, new) in changes.update_old.iter().zip(&changes.update_new) {
            // Updates are upserts: a missing old record is simply created.
            // This is what allows lost auxiliary metadata to be restored.
            match records.iter().position(|r| r.key() == old.key()) {
                Some(pos) => {
                    debug!("Updating record {} -> {} in zone {}", old, new, zone);
                    records[pos] = new.clone();
                }
                None => {
                    debug!("Upserting missing record {} in zone {}", new, zone);
                    records.push(new.clone());
                }
            }
        }
        for ep in &changes.delete {
            debug!("Deleting record {} from zone {}", ep, zone);
            records.retain(|r| r.key() != ep.key());
        }
        Ok(())
    }
}

impl Provider for InMemoryProvider {
    fn records(&self, ctx: &CancelToken) -> Result<Vec<Endpoint>, ProviderError> {
        if ctx.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        Ok(self
            .lock_zones()
            .values()
            .flatten()
            .filter(|ep| self.domain_filter.matches(&ep.dns_name))
            .cloned()
            .collect())
    }

    fn apply_changes(&self, ctx: &CancelToken, changes: &Changes) -> Result<(), ProviderError> {
        if ctx.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        // The auxiliary reduction runs first: a conflicting desired state
        // aborts the cycle before any record is written.
        let mut regional_failure = None;
        if let Some(api) = &self.regional {
            if let Err(e) = regional::sync_regional_hostnames(api, ctx, changes, self.dry_run) {
                match e {
                    RegionalHostnameError::RegionConflict { .. } => {
                        return Err(ProviderError::Auxiliary(e.to_string()));
                    }
                    other => regional_failure = Some(ProviderError::Internal(other.to_string())),
                }
            }
        }

        fn create(c: &mut Changes) -> &mut Vec<Endpoint> {
            &mut c.create
        }
        fn update_old(c: &mut Changes) -> &mut Vec<Endpoint> {
            &mut c.update_old
        }
        fn update_new(c: &mut Changes) -> &mut Vec<Endpoint> {
            &mut c.update_new
        }
        fn delete(c: &mut Changes) -> &mut Vec<Endpoint> {
            &mut c.delete
        }

        let mut by_zone: BTreeMap<String, Changes> = BTreeMap::new();
        let mut route = |eps: &[Endpoint], pick: fn(&mut Changes) -> &mut Vec<Endpoint>| {
            for ep in eps {
                match self.find_zone(&ep.dns_name) {
                    Some(zone) => pick(by_zone.entry(zone).or_default()).push(ep.clone()),
                    None => warn!("No zone for record {}, skipping", ep),
                }
            }
        };
        route(&changes.create, create);
        route(&changes.update_old, update_old);
        route(&changes.update_new, update_new);
        route(&changes.delete, delete);

        // Zones are applied independently: one failing zone does not stop
        // the others, the first error is reported.
        let mut first_error = None;
        for (zone, zone_changes) in by_zone {
            if let Err(e) = self.apply_zone_changes(&zone, &zone_changes) {
                warn!("Could not apply changes to zone {}: {}", zone, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error.or(regional_failure) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn adjust_endpoints(&self, endpoints: Vec<Endpoint>) -> Result<Vec<Endpoint>, ProviderError> {
        let Some(default_ttl) = self.default_ttl else {
            return Ok(endpoints);
        };
        Ok(endpoints
            .into_iter()
            .map(|mut ep| {
                if ep.record_ttl == 0 {
                    ep.record_ttl = default_ttl;
                }
                ep
            })
            .collect())
    }

    fn domain_filter(&self) -> DomainFilter {
        self.domain_filter.clone()
    }
}

/// The regional hostname store of an [`InMemoryProvider`].
#[derive(Clone, Default)]
struct InMemoryRegionalHostnames {
    store: Arc<Mutex<Vec<RegionalHostname>>>,
}

impl InMemoryRegionalHostnames {
    fn lock(&self) -> MutexGuard<'_, Vec<RegionalHostname>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RegionalHostnamesApi for InMemoryRegionalHostnames {
    fn list(&self, _ctx: &CancelToken) -> Result<Vec<RegionalHostname>, ProviderError> {
        Ok(self.lock().clone())
    }

    fn create(&self, _ctx: &CancelToken, hostname: &RegionalHostname) -> Result<(), ProviderError> {
        let mut store = self.lock();
        if store.iter().any(|rh| rh.hostname == hostname.hostname) {
            return Err(ProviderError::Conflict(format!(
                "regional hostname {} already exists",
                hostname.hostname
            )));
        }
        store.push(hostname.clone());
        Ok(())
    }

    fn update(&self, _ctx: &CancelToken, hostname: &RegionalHostname) -> Result<(), ProviderError> {
        let mut store = self.lock();
        match store.iter_mut().find(|rh| rh.hostname == hostname.hostname) {
            Some(existing) => {
                existing.region_key = hostname.region_key.clone();
                Ok(())
            }
            None => Err(ProviderError::Conflict(format!(
                "regional hostname {} not found",
                hostname.hostname
            ))),
        }
    }

    fn delete(&self, _ctx: &CancelToken, hostname: &str) -> Result<(), ProviderError> {
        let mut store = self.lock();
        let before = store.len();
        store.retain(|rh| rh.hostname != hostname);
        if store.len() == before {
            return Err(ProviderError::Conflict(format!(
                "regional hostname {} not found",
                hostname
            )));
        }
        Ok(())
    }
}

fn normalize_zone(name: &str) -> String {
    name.trim_end_matches('.').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RecordType;
    use crate::provider::regional::REGION_KEY_PROPERTY;

    fn ctx() -> CancelToken {
        CancelToken::new()
    }

    fn a(name: &str, target: &str) -> Endpoint {
        Endpoint::new(name, RecordType::A, vec![target])
    }

    #[test]
    fn should_return_records_of_all_zones() {
        let provider = InMemoryProvider::new().with_zone("example.org").with_zone("example.com");
        provider.set_records("example.org", vec![a("foo.example.org", "1.1.1.1")]);
        provider.set_records("example.com", vec![a("bar.example.com", "2.2.2.2")]);

        let records = provider.records(&ctx()).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn should_filter_records_by_domain_filter() {
        let provider = InMemoryProvider::new()
            .with_zone("example.org")
            .with_domain_filter(DomainFilter::new(&["sub.example.org"]));
        provider.set_records(
            "example.org",
            vec![a("foo.sub.example.org", "1.1.1.1"), a("foo.example.org", "2.2.2.2")],
        );

        let records = provider.records(&ctx()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dns_name, "foo.sub.example.org");
    }

    #[test]
    fn should_route_records_to_longest_matching_zone() {
        let provider = InMemoryProvider::new().with_zone("example.org").with_zone("sub.example.org");
        assert_eq!(
            provider.find_zone("foo.sub.example.org").unwrap(),
            "sub.example.org"
        );
        assert_eq!(provider.find_zone("foo.example.org").unwrap(), "example.org");
        assert_eq!(provider.find_zone("example.net"), None);
    }

    #[test]
    fn should_apply_create_update_delete() {
        let provider = InMemoryProvider::new().with_zone("example.org");
        provider.set_records(
            "example.org",
            vec![a("update.example.org", "1.1.1.1"), a("delete.example.org", "2.2.2.2")],
        );

        let changes = Changes {
            create: vec![a("create.example.org", "3.3.3.3")],
            update_old: vec![a("update.example.org", "1.1.1.1")],
            update_new: vec![a("update.example.org", "9.9.9.9")],
            delete: vec![a("delete.example.org", "2.2.2.2")],
        };
        provider.apply_changes(&ctx(), &changes).unwrap();

        let mut names: Vec<(String, String)> = provider
            .records(&ctx())
            .unwrap()
            .into_iter()
            .map(|ep| (ep.dns_name, ep.targets.0[0].clone()))
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                ("create.example.org".to_string(), "3.3.3.3".to_string()),
                ("update.example.org".to_string(), "9.9.9.9".to_string()),
            ]
        );
    }

    #[test]
    fn duplicate_create_fails_the_zone_atomically() {
        let provider = InMemoryProvider::new().with_zone("example.org");
        provider.set_records("example.org", vec![a("taken.example.org", "1.1.1.1")]);

        let changes = Changes {
            create: vec![a("fresh.example.org", "3.3.3.3"), a("taken.example.org", "4.4.4.4")],
            ..Default::default()
        };
        let err = provider.apply_changes(&ctx(), &changes).unwrap_err();
        assert!(matches!(err, ProviderError::Conflict(_)));
        // Nothing from the failed batch must have been applied.
        assert_eq!(provider.records(&ctx()).unwrap().len(), 1);
    }

    #[test]
    fn failing_zone_does_not_stop_other_zones() {
        let provider = InMemoryProvider::new().with_zone("example.org").with_zone("example.com");
        provider.set_records("example.org", vec![a("taken.example.org", "1.1.1.1")]);

        let changes = Changes {
            create: vec![a("taken.example.org", "4.4.4.4"), a("new.example.com", "5.5.5.5")],
            ..Default::default()
        };
        let err = provider.apply_changes(&ctx(), &changes).unwrap_err();
        assert!(matches!(err, ProviderError::Conflict(_)));

        let records = provider.records(&ctx()).unwrap();
        assert!(records.iter().any(|ep| ep.dns_name == "new.example.com"));
    }

    #[test]
    fn update_of_missing_record_is_an_upsert() {
        let provider = InMemoryProvider::new().with_zone("example.org");
        let changes = Changes {
            update_old: vec![a("lost.example.org", "1.1.1.1")],
            update_new: vec![a("lost.example.org", "2.2.2.2")],
            ..Default::default()
        };
        provider.apply_changes(&ctx(), &changes).unwrap();
        let records = provider.records(&ctx()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].targets.0, vec!["2.2.2.2"]);
    }

    #[test]
    fn dry_run_validates_but_does_not_mutate() {
        let provider = InMemoryProvider::new().with_zone("example.org").with_dry_run(true);
        let changes = Changes {
            create: vec![a("create.example.org", "3.3.3.3")],
            ..Default::default()
        };
        provider.apply_changes(&ctx(), &changes).unwrap();
        assert!(provider.records(&ctx()).unwrap().is_empty());
    }

    #[test]
    fn should_default_ttl_on_adjust() {
        let provider = InMemoryProvider::new().with_default_ttl(300);
        let adjusted = provider
            .adjust_endpoints(vec![
                a("foo.example.org", "1.1.1.1"),
                a("bar.example.org", "1.1.1.1").with_ttl(60),
            ])
            .unwrap();
        assert_eq!(adjusted[0].record_ttl, 300);
        assert_eq!(adjusted[1].record_ttl, 60);
    }

    #[test]
    fn cancelled_context_aborts_before_any_io() {
        let provider = InMemoryProvider::new().with_zone("example.org");
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(provider.records(&token).unwrap_err(), ProviderError::Cancelled);
        assert_eq!(
            provider.apply_changes(&token, &Changes::default()).unwrap_err(),
            ProviderError::Cancelled
        );
    }

    #[test]
    fn region_conflict_aborts_payload_apply() {
        let provider = InMemoryProvider::new().with_zone("bar.com").with_regional_hostnames();
        let changes = Changes {
            create: vec![
                a("foo.bar.com", "1.1.1.1")
                    .with_provider_specific(REGION_KEY_PROPERTY, "eu"),
                a("foo.bar.com", "2.2.2.2")
                    .with_set_identifier("second")
                    .with_provider_specific(REGION_KEY_PROPERTY, "us"),
            ],
            ..Default::default()
        };
        let err = provider.apply_changes(&ctx(), &changes).unwrap_err();
        assert!(matches!(err, ProviderError::Auxiliary(_)));
        assert!(provider.records(&ctx()).unwrap().is_empty());
        assert!(provider.regional_hostnames().is_empty());
    }

    #[test]
    fn regional_hostnames_follow_record_changes() {
        let provider = InMemoryProvider::new().with_zone("bar.com").with_regional_hostnames();

        let create = Changes {
            create: vec![a("foo.bar.com", "1.1.1.1").with_provider_specific(REGION_KEY_PROPERTY, "eu")],
            ..Default::default()
        };
        provider.apply_changes(&ctx(), &create).unwrap();
        assert_eq!(
            provider.regional_hostnames(),
            vec![RegionalHostname {
                hostname: "foo.bar.com".to_string(),
                region_key: "eu".to_string(),
            }]
        );

        let delete = Changes {
            delete: vec![a("foo.bar.com", "1.1.1.1").with_provider_specific(REGION_KEY_PROPERTY, "eu")],
            ..Default::default()
        };
        provider.apply_changes(&ctx(), &delete).unwrap();
        assert!(provider.regional_hostnames().is_empty());
    }
}

//! Auxiliary per-hostname resources coupled to primary record changes.
//!
//! Some providers attach side resources to DNS names, such as Cloudflare
//! regional hostnames (data-locality routing keyed by hostname). These must
//! track the records they belong to: creating or updating a record with a
//! `cloudflare-region-key` property implies upserting the matching regional
//! hostname, deleting the record implies removing it.
//!
//! The flow per reconciliation is reduce ([`desired_regional_hostnames`]),
//! diff ([`regional_hostnames_plan`]) and apply
//! ([`sync_regional_hostnames`]); providers with a comparable side resource
//! follow the same shape.

use std::collections::BTreeMap;

use log::{debug, error, info};
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::{cancel::CancelToken, plan::Changes};

use super::ProviderError;

/// Provider-specific property carrying the region key of an endpoint.
pub const REGION_KEY_PROPERTY: &str = "cloudflare-region-key";

/// One auxiliary resource: a hostname pinned to a region.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RegionalHostname {
    pub hostname: String,
    pub region_key: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegionalAction {
    Create,
    Update,
    Delete,
}

/// A single change to the provider's regional hostname list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionalHostnameChange {
    pub action: RegionalAction,
    pub hostname: RegionalHostname,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionalHostnameError {
    /// Two primary changes in the same cycle want different regions for one
    /// hostname. Fatal for the cycle; nothing is applied.
    #[error("conflicting region keys for `{hostname}`: `{first}` vs `{second}`")]
    RegionConflict {
        hostname: String,
        first: String,
        second: String,
    },
    #[error("could not list regional hostnames: `{0}`")]
    List(ProviderError),
    /// One or more individual changes failed; the remaining ones were still
    /// attempted.
    #[error("at least one regional hostname change failed")]
    PartialFailure,
}

/// The API surface a provider exposes for its regional hostname resource.
#[cfg_attr(test, automock)]
pub trait RegionalHostnamesApi: Send {
    fn list(&self, ctx: &CancelToken) -> Result<Vec<RegionalHostname>, ProviderError>;
    fn create(&self, ctx: &CancelToken, hostname: &RegionalHostname) -> Result<(), ProviderError>;
    fn update(&self, ctx: &CancelToken, hostname: &RegionalHostname) -> Result<(), ProviderError>;
    fn delete(&self, ctx: &CancelToken, hostname: &str) -> Result<(), ProviderError>;
}

/// Desired end state per hostname: pinned to a region, or gone.
type DesiredState = BTreeMap<String, Option<String>>;

/// Reduce a change set to the desired auxiliary state by hostname.
///
/// A create or update for a hostname supersedes a delete of the same
/// hostname in the same cycle. Two different region keys from create/update
/// events are a [`RegionalHostnameError::RegionConflict`].
pub fn desired_regional_hostnames(changes: &Changes) -> Result<DesiredState, RegionalHostnameError> {
    let mut desired = DesiredState::new();

    for ep in changes.create.iter().chain(changes.update_new.iter()) {
        let Some(region_key) = ep.get_provider_specific(REGION_KEY_PROPERTY) else {
            continue;
        };
        match desired.get(&ep.dns_name) {
            Some(Some(existing)) if existing != region_key => {
                return Err(RegionalHostnameError::RegionConflict {
                    hostname: ep.dns_name.clone(),
                    first: existing.clone(),
                    second: region_key.to_string(),
                });
            }
            _ => {
                desired.insert(ep.dns_name.clone(), Some(region_key.to_string()));
            }
        }
    }

    for ep in &changes.delete {
        if ep.get_provider_specific(REGION_KEY_PROPERTY).is_none() {
            continue;
        }
        // Create wins over delete for the same hostname within one cycle.
        desired.entry(ep.dns_name.clone()).or_insert(None);
    }

    Ok(desired)
}

/// Diff the desired auxiliary state against the provider's current list.
pub fn regional_hostnames_plan(
    desired: &DesiredState,
    current: &[RegionalHostname],
) -> Vec<RegionalHostnameChange> {
    let current: BTreeMap<&str, &str> = current
        .iter()
        .map(|rh| (rh.hostname.as_str(), rh.region_key.as_str()))
        .collect();

    let mut plan = Vec::new();
    for (hostname, region_key) in desired {
        match (region_key, current.get(hostname.as_str())) {
            (Some(region_key), None) => plan.push(RegionalHostnameChange {
                action: RegionalAction::Create,
                hostname: RegionalHostname {
                    hostname: hostname.clone(),
                    region_key: region_key.clone(),
                },
            }),
            (Some(region_key), Some(existing)) if existing != region_key => {
                plan.push(RegionalHostnameChange {
                    action: RegionalAction::Update,
                    hostname: RegionalHostname {
                        hostname: hostname.clone(),
                        region_key: region_key.clone(),
                    },
                })
            }
            (None, Some(existing)) => plan.push(RegionalHostnameChange {
                action: RegionalAction::Delete,
                hostname: RegionalHostname {
                    hostname: hostname.clone(),
                    region_key: existing.to_string(),
                },
            }),
            _ => debug!("Regional hostname for {} already up-to-date", hostname),
        }
    }
    plan
}

/// Reconcile the provider's regional hostnames with a primary change set.
///
/// Individual apply failures are logged and do not stop the remaining
/// changes; they are folded into a single
/// [`RegionalHostnameError::PartialFailure`]. In dry-run mode every planned
/// change is logged and nothing is applied.
pub fn sync_regional_hostnames(
    api: &dyn RegionalHostnamesApi,
    ctx: &CancelToken,
    changes: &Changes,
    dry_run: bool,
) -> Result<(), RegionalHostnameError> {
    let desired = desired_regional_hostnames(changes)?;
    if desired.is_empty() {
        return Ok(());
    }
    let current = api.list(ctx).map_err(RegionalHostnameError::List)?;

    let mut failed = false;
    for change in regional_hostnames_plan(&desired, &current) {
        if dry_run {
            info!(
                "Would {:?} regional hostname {} => {}",
                change.action, change.hostname.hostname, change.hostname.region_key
            );
            continue;
        }
        let result = match change.action {
            RegionalAction::Create => api.create(ctx, &change.hostname),
            RegionalAction::Update => api.update(ctx, &change.hostname),
            RegionalAction::Delete => api.delete(ctx, &change.hostname.hostname),
        };
        match result {
            Ok(()) => debug!(
                "Applied {:?} for regional hostname {}",
                change.action, change.hostname.hostname
            ),
            Err(e) => {
                error!(
                    "Could not {:?} regional hostname {}: {}",
                    change.action, change.hostname.hostname, e
                );
                failed = true;
            }
        }
    }
    if failed {
        return Err(RegionalHostnameError::PartialFailure);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Endpoint, RecordType};
    use mockall::predicate::eq;

    fn regional_ep(name: &str, region: &str) -> Endpoint {
        Endpoint::new(name, RecordType::A, vec!["1.1.1.1"])
            .with_provider_specific(REGION_KEY_PROPERTY, region)
    }

    #[test]
    fn should_reduce_creates_and_updates_to_upserts() {
        let changes = Changes {
            create: vec![regional_ep("foo.bar.com", "eu")],
            update_new: vec![regional_ep("baz.bar.com", "us")],
            ..Default::default()
        };
        let desired = desired_regional_hostnames(&changes).unwrap();
        assert_eq!(desired.get("foo.bar.com").unwrap().as_deref(), Some("eu"));
        assert_eq!(desired.get("baz.bar.com").unwrap().as_deref(), Some("us"));
    }

    #[test]
    fn create_supersedes_delete_for_same_hostname() {
        let changes = Changes {
            create: vec![regional_ep("foo.bar.com", "eu")],
            delete: vec![regional_ep("foo.bar.com", "eu")],
            ..Default::default()
        };
        let desired = desired_regional_hostnames(&changes).unwrap();
        assert_eq!(desired.get("foo.bar.com").unwrap().as_deref(), Some("eu"));
    }

    #[test]
    fn conflicting_region_keys_are_an_error() {
        let changes = Changes {
            create: vec![regional_ep("foo.bar.com", "eu"), regional_ep("foo.bar.com", "us")],
            ..Default::default()
        };
        assert_eq!(
            desired_regional_hostnames(&changes).unwrap_err(),
            RegionalHostnameError::RegionConflict {
                hostname: "foo.bar.com".to_string(),
                first: "eu".to_string(),
                second: "us".to_string(),
            }
        );
    }

    #[test]
    fn endpoints_without_region_key_are_ignored() {
        let changes = Changes {
            create: vec![Endpoint::new("plain.bar.com", RecordType::A, vec!["1.1.1.1"])],
            ..Default::default()
        };
        assert!(desired_regional_hostnames(&changes).unwrap().is_empty());
    }

    #[test]
    fn should_diff_against_current_state() {
        let desired = DesiredState::from([
            ("new.bar.com".to_string(), Some("eu".to_string())),
            ("moved.bar.com".to_string(), Some("us".to_string())),
            ("same.bar.com".to_string(), Some("eu".to_string())),
            ("gone.bar.com".to_string(), None),
            ("never.bar.com".to_string(), None),
        ]);
        let current = vec![
            RegionalHostname {
                hostname: "moved.bar.com".to_string(),
                region_key: "eu".to_string(),
            },
            RegionalHostname {
                hostname: "same.bar.com".to_string(),
                region_key: "eu".to_string(),
            },
            RegionalHostname {
                hostname: "gone.bar.com".to_string(),
                region_key: "eu".to_string(),
            },
        ];

        let plan = regional_hostnames_plan(&desired, &current);
        let actions: Vec<(&str, RegionalAction)> = plan
            .iter()
            .map(|c| (c.hostname.hostname.as_str(), c.action))
            .collect();
        assert_eq!(
            actions,
            vec![
                ("gone.bar.com", RegionalAction::Delete),
                ("moved.bar.com", RegionalAction::Update),
                ("new.bar.com", RegionalAction::Create),
            ]
        );
    }

    #[test]
    fn partial_failure_still_applies_remaining_changes() {
        let changes = Changes {
            create: vec![regional_ep("a.bar.com", "eu"), regional_ep("b.bar.com", "eu")],
            ..Default::default()
        };

        let mut api = MockRegionalHostnamesApi::new();
        api.expect_list().times(1).returning(|_| Ok(vec![]));
        api.expect_create()
            .with(
                mockall::predicate::always(),
                eq(RegionalHostname {
                    hostname: "a.bar.com".to_string(),
                    region_key: "eu".to_string(),
                }),
            )
            .times(1)
            .returning(|_, _| Err(ProviderError::Transient("throttled".to_string())));
        api.expect_create()
            .with(
                mockall::predicate::always(),
                eq(RegionalHostname {
                    hostname: "b.bar.com".to_string(),
                    region_key: "eu".to_string(),
                }),
            )
            .times(1)
            .returning(|_, _| Ok(()));

        let result = sync_regional_hostnames(&api, &CancelToken::new(), &changes, false);
        assert_eq!(result.unwrap_err(), RegionalHostnameError::PartialFailure);
    }

    #[test]
    fn dry_run_applies_nothing() {
        let changes = Changes {
            create: vec![regional_ep("a.bar.com", "eu")],
            ..Default::default()
        };
        let mut api = MockRegionalHostnamesApi::new();
        api.expect_list().times(1).returning(|_| Ok(vec![]));
        // No create/update/delete expectations: any call would panic.
        sync_regional_hostnames(&api, &CancelToken::new(), &changes, true).unwrap();
    }
}

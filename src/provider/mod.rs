//! Interface with DNS providers and get/set zone records.
//!
//! Providers are DNS services such as Cloudflare or Route53 that can be
//! accessed through an API. All providers must implement the [`Provider`]
//! trait. This crate ships [`InMemoryProvider`], a fully functional
//! in-process provider used as the reference implementation and in tests;
//! real adapters live in their own crates.

pub mod inmemory;
pub mod regional;

// Re-exports for convenience
pub use inmemory::InMemoryProvider;

use std::fmt::Display;

#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::{cancel::CancelToken, endpoint::Endpoint, plan::Changes};

/// Trait implemented by DNS provider adapters.
///
/// Implementations must be idempotent on repeated identical
/// [`Provider::apply_changes`] calls at the batch level; re-creating a record
/// that already exists is expected to fail with a per-record
/// [`ProviderError::Conflict`].
#[cfg_attr(test, automock)]
pub trait Provider: Send {
    /// All records within the scope of the configured domain filter, with
    /// minimal provider-specific metadata attached.
    fn records(&self, ctx: &CancelToken) -> Result<Vec<Endpoint>, ProviderError>;

    /// Apply a set of changes. Atomic per zone, best-effort across zones:
    /// a failing zone is reported but does not prevent other zones from
    /// being updated.
    fn apply_changes(&self, ctx: &CancelToken, changes: &Changes) -> Result<(), ProviderError>;

    /// Provider-specific normalization of desired endpoints (defaulting
    /// TTLs, enforcing booleans, ...) applied before planning.
    fn adjust_endpoints(&self, endpoints: Vec<Endpoint>) -> Result<Vec<Endpoint>, ProviderError>;

    /// The set of zones this provider manages.
    fn domain_filter(&self) -> DomainFilter;
}

/// Typed error kinds surfaced by providers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ProviderError {
    /// Network trouble, throttling, 5xx. The current cycle is skipped and
    /// retried on the next tick.
    #[error("transient provider failure: `{0}`")]
    Transient(String),
    /// Record already exists on create, or was not found on delete.
    /// Per-record and non-fatal.
    #[error("record conflict: `{0}`")]
    Conflict(String),
    /// Incompatible auxiliary resource values in a single change set.
    #[error("auxiliary resource conflict: `{0}`")]
    Auxiliary(String),
    #[error("no managed zone for record `{0}`")]
    NoZone(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("internal provider error: `{0}`")]
    Internal(String),
}

impl From<String> for ProviderError {
    fn from(s: String) -> Self {
        ProviderError::Internal(s)
    }
}

/// A suffix-based filter describing the zones a provider manages.
///
/// Matching is case-insensitive and on label boundaries: the filter
/// `example.org` matches `example.org` and `foo.example.org` but not
/// `badexample.org`. An empty filter matches everything; exclusions win
/// over inclusions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainFilter {
    filters: Vec<String>,
    exclude: Vec<String>,
}

impl DomainFilter {
    pub fn new<S: AsRef<str>>(filters: &[S]) -> DomainFilter {
        DomainFilter {
            filters: normalize_domains(filters),
            exclude: Vec::new(),
        }
    }

    pub fn with_exclusions<S: AsRef<str>>(mut self, exclude: &[S]) -> DomainFilter {
        self.exclude = normalize_domains(exclude);
        self
    }

    pub fn matches(&self, domain: &str) -> bool {
        let domain = domain.trim_end_matches('.').to_lowercase();
        if self.exclude.iter().any(|e| matches_suffix(&domain, e)) {
            return false;
        }
        self.filters.is_empty() || self.filters.iter().any(|f| matches_suffix(&domain, f))
    }
}

impl Display for DomainFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.filters.is_empty() {
            write!(f, "DomainFilter(all)")
        } else {
            write!(f, "DomainFilter({})", self.filters.join(","))
        }
    }
}

/// Restricts operation to an explicit set of provider zone ids.
/// An empty filter matches every zone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneIdFilter {
    zone_ids: Vec<String>,
}

impl ZoneIdFilter {
    pub fn new<S: AsRef<str>>(zone_ids: &[S]) -> ZoneIdFilter {
        ZoneIdFilter {
            zone_ids: zone_ids.iter().map(|z| z.as_ref().to_string()).collect(),
        }
    }

    pub fn matches(&self, zone_id: &str) -> bool {
        self.zone_ids.is_empty() || self.zone_ids.iter().any(|z| z == zone_id)
    }
}

fn normalize_domains<S: AsRef<str>>(domains: &[S]) -> Vec<String> {
    domains
        .iter()
        .map(|d| {
            d.as_ref()
                .trim()
                .trim_start_matches('.')
                .trim_end_matches('.')
                .to_lowercase()
        })
        .filter(|d| !d.is_empty())
        .collect()
}

fn matches_suffix(domain: &str, filter: &str) -> bool {
    domain == filter || domain.ends_with(&format!(".{}", filter))
}

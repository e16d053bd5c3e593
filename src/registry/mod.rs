//! Manage ownership of DNS records.
//!
//! Registries join the provider's records with ownership metadata and make
//! sure no changes are applied to records that another controller instance
//! owns. All registries implement the [`Registry`] trait. Currently, the
//! following registries are available:
//! - [`TxtRegistry`]: tracks ownership via heritage TXT records stored next
//!   to the payload records in the same zone
//! - [`NoopRegistry`]: passes everything through, for providers that track
//!   ownership natively

mod cache;
pub mod heritage;
pub mod mapper;
mod noop;
mod txt;

// Expose individual registry types for creation
pub use noop::NoopRegistry;
pub use txt::{TxtRegistry, TxtRegistryConfig};

#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::{
    cancel::CancelToken, endpoint::Endpoint, plan::Changes, provider::ProviderError,
};

/// A registry sits between the control loop and a [`crate::provider::Provider`]:
/// records read from the provider come back tagged with ownership labels, and
/// change sets pass through it so the ownership metadata stays consistent.
#[cfg_attr(test, automock)]
pub trait Registry: Send {
    /// All current endpoints, with ownership labels attached.
    fn records(&mut self, ctx: &CancelToken) -> Result<Vec<Endpoint>, RegistryError>;

    /// Apply a change set, restricted to endpoints this instance owns and
    /// expanded with the required ownership side-changes.
    fn apply_changes(&mut self, ctx: &CancelToken, changes: &Changes)
        -> Result<(), RegistryError>;

    /// Provider-specific normalization of desired endpoints, delegated to
    /// the underlying provider.
    fn adjust_endpoints(&self, endpoints: Vec<Endpoint>) -> Result<Vec<Endpoint>, RegistryError>;

    /// The owner id this registry stamps onto new records. Empty for
    /// registries that do not track ownership.
    fn owner_id(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("owner-id must not be empty")]
    EmptyOwner,
    #[error("`{0}`")]
    Affix(mapper::InvalidAffix),
    #[error("`{0}`")]
    Heritage(heritage::HeritageError),
    #[error("`{0}`")]
    Provider(ProviderError),
    #[error("internal registry error: `{0}`")]
    Internal(String),
}

impl From<mapper::InvalidAffix> for RegistryError {
    fn from(e: mapper::InvalidAffix) -> Self {
        RegistryError::Affix(e)
    }
}

impl From<heritage::HeritageError> for RegistryError {
    fn from(e: heritage::HeritageError) -> Self {
        RegistryError::Heritage(e)
    }
}

impl From<ProviderError> for RegistryError {
    fn from(e: ProviderError) -> Self {
        RegistryError::Provider(e)
    }
}

impl From<String> for RegistryError {
    fn from(s: String) -> Self {
        RegistryError::Internal(s)
    }
}

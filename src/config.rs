//! Shared configuration types consumed by the binary and library users.

use std::time::Duration;

use clap::ValueEnum;
use log::LevelFilter;
use thiserror::Error;

use crate::{
    endpoint::RecordType,
    plan::Policy,
    registry::{heritage::TxtEncryption, TxtRegistryConfig},
};

/// Used to set the applications loglevel
// This is essentially a re-creation of log:Level. However, that enum doesn't derive ValueEnum, so we have to do it manually here
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, ValueEnum)]
pub enum Loglevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<Loglevel> for LevelFilter {
    fn from(ll: Loglevel) -> Self {
        match ll {
            Loglevel::Error => LevelFilter::Error,
            Loglevel::Warn => LevelFilter::Warn,
            Loglevel::Info => LevelFilter::Info,
            Loglevel::Debug => LevelFilter::Debug,
            Loglevel::Trace => LevelFilter::Trace,
        }
    }
}

/// The full configuration surface of the controller core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Unique identifier of this controller instance. Required.
    pub owner_id: String,
    pub txt_prefix: String,
    pub txt_suffix: String,
    pub txt_wildcard_replacement: String,
    pub managed_record_types: Vec<RecordType>,
    pub exclude_record_types: Vec<RecordType>,
    pub txt_encrypt_enabled: bool,
    pub txt_encrypt_aes_key: Option<String>,
    /// Zero disables the records cache.
    pub txt_cache_interval: Duration,
    /// Previous owner id to migrate records from.
    pub old_owner_id: Option<String>,
    pub policy: Policy,
    pub interval: Duration,
    pub min_event_interval: Duration,
    pub default_targets: Vec<String>,
    pub force_default_targets: bool,
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            owner_id: String::new(),
            txt_prefix: String::new(),
            txt_suffix: String::new(),
            txt_wildcard_replacement: String::new(),
            managed_record_types: vec![RecordType::A, RecordType::Aaaa, RecordType::Cname],
            exclude_record_types: Vec::new(),
            txt_encrypt_enabled: false,
            txt_encrypt_aes_key: None,
            txt_cache_interval: Duration::ZERO,
            old_owner_id: None,
            policy: Policy::Sync,
            interval: Duration::from_secs(60),
            min_event_interval: Duration::from_secs(5),
            default_targets: Vec::new(),
            force_default_targets: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ConfigError {
    #[error("owner-id must not be empty")]
    EmptyOwner,
    #[error("txt-prefix and txt-suffix are mutually exclusive")]
    ConflictingAffixes,
    #[error("txt-encrypt-enabled requires txt-encrypt-aes-key")]
    MissingAesKey,
    #[error("txt-encrypt-aes-key must be 32 bytes, raw or base64-encoded")]
    InvalidAesKey,
    #[error("managed-record-types must not be empty")]
    NoManagedTypes,
}

impl Config {
    /// Validate the configuration. Called once at startup; any error here is
    /// fatal before the first reconciliation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner_id.is_empty() {
            return Err(ConfigError::EmptyOwner);
        }
        if !self.txt_prefix.is_empty() && !self.txt_suffix.is_empty() {
            return Err(ConfigError::ConflictingAffixes);
        }
        if self.managed_record_types.is_empty() {
            return Err(ConfigError::NoManagedTypes);
        }
        if self.txt_encrypt_enabled {
            let key = self.txt_encrypt_aes_key.as_deref().ok_or(ConfigError::MissingAesKey)?;
            TxtEncryption::from_key(key).map_err(|_| ConfigError::InvalidAesKey)?;
        }
        Ok(())
    }

    /// The registry slice of this configuration.
    pub fn registry_config(&self) -> TxtRegistryConfig {
        TxtRegistryConfig {
            owner_id: self.owner_id.clone(),
            prefix: self.txt_prefix.clone(),
            suffix: self.txt_suffix.clone(),
            wildcard_replacement: self.txt_wildcard_replacement.clone(),
            managed_record_types: self.managed_record_types.clone(),
            exclude_record_types: self.exclude_record_types.clone(),
            cache_interval: self.txt_cache_interval,
            encrypt_enabled: self.txt_encrypt_enabled,
            encrypt_aes_key: self.txt_encrypt_aes_key.clone(),
            old_owner_id: self.old_owner_id.clone(),
        }
    }
}

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use clouddns_sync::{
    config::{Config, Loglevel},
    endpoint::RecordType,
};

macro_rules! env_prefix {
    () => {
        "CLOUDDNS_SYNC_"
    };
}

#[derive(Debug, Clone, PartialEq, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Unique identifier (owner id) of this controller instance
    #[arg(
        long,
        required = true,
        value_name = "OWNER_ID",
        env = concat!(env_prefix!(), "OWNER_ID")
    )]
    pub owner_id: String,

    /// DNS provider to use
    #[arg(
        value_enum,
        short = 'p',
        long,
        default_value_t = Provider::Inmemory,
        env = concat!(env_prefix!(), "PROVIDER")
    )]
    pub provider: Provider,

    /// Zones served by the in-memory provider, as a comma-separated list
    #[arg(
        long,
        value_name = "ZONE",
        use_value_delimiter = true,
        value_delimiter = ',',
        env = concat!(env_prefix!(), "INMEMORY_ZONES")
    )]
    pub inmemory_zones: Vec<String>,

    /// JSON file declaring the desired endpoints
    #[arg(
        short = 's',
        long,
        required = true,
        value_name = "FILE",
        env = concat!(env_prefix!(), "SOURCE_FILE")
    )]
    pub source_file: PathBuf,

    /// Set the loglevel of the application
    #[arg(
        value_enum,
        short = 'l',
        long,
        default_value_t = Loglevel::Info,
        value_name = "LEVEL",
        env = concat!(env_prefix!(), "LOGLEVEL")
    )]
    pub loglevel: Loglevel,

    /// Only run the controller once, then exit
    #[arg(long, default_value_t = false, action)]
    pub run_once: bool,

    /// Time to wait between reconciliation cycles in seconds
    #[arg(
        short = 'i',
        long,
        default_value_t = 60,
        env = concat!(env_prefix!(), "INTERVAL")
    )]
    pub interval: u64,

    /// What record actions are permitted. createonly: create, upsert: create,update, sync: create,update,delete.
    #[arg(
        value_enum,
        long,
        default_value_t = Policy::Sync,
        env = concat!(env_prefix!(), "POLICY")
    )]
    pub policy: Policy,

    /// Do not make any changes to the DNS records, only show what would happen
    #[arg(long, short = 'd', action, default_value_t = false)]
    pub dry_run: bool,

    /// Record types the controller may manage, as a comma-separated list
    #[arg(
        long,
        value_name = "TYPE",
        use_value_delimiter = true,
        value_delimiter = ',',
        default_values = ["A", "AAAA", "CNAME"],
        env = concat!(env_prefix!(), "MANAGED_RECORD_TYPES")
    )]
    pub managed_record_types: Vec<RecordType>,

    /// Record types excluded from management, as a comma-separated list
    #[arg(
        long,
        value_name = "TYPE",
        use_value_delimiter = true,
        value_delimiter = ',',
        env = concat!(env_prefix!(), "EXCLUDE_RECORD_TYPES")
    )]
    pub exclude_record_types: Vec<RecordType>,

    /// Prefix for ownership TXT record names. Mutually exclusive with txt-suffix
    #[arg(
        long,
        default_value = "",
        value_name = "PREFIX",
        env = concat!(env_prefix!(), "TXT_PREFIX"),
        conflicts_with = "txt_suffix"
    )]
    pub txt_prefix: String,

    /// Suffix for the first label of ownership TXT record names
    #[arg(
        long,
        default_value = "",
        value_name = "SUFFIX",
        env = concat!(env_prefix!(), "TXT_SUFFIX"),
        conflicts_with = "txt_prefix"
    )]
    pub txt_suffix: String,

    /// Stand-in for the wildcard label in TXT record names
    #[arg(
        long,
        default_value = "",
        value_name = "LABEL",
        env = concat!(env_prefix!(), "TXT_WILDCARD_REPLACEMENT")
    )]
    pub txt_wildcard_replacement: String,

    /// Encrypt ownership TXT targets with AES-256-GCM
    #[arg(
        long,
        action,
        default_value_t = false,
        env = concat!(env_prefix!(), "TXT_ENCRYPT_ENABLED")
    )]
    pub txt_encrypt_enabled: bool,

    /// 32-byte AES key, raw or base64-encoded
    #[arg(
        long,
        value_name = "KEY",
        required_if_eq("txt_encrypt_enabled", "true"),
        env = concat!(env_prefix!(), "TXT_ENCRYPT_AES_KEY")
    )]
    pub txt_encrypt_aes_key: Option<String>,

    /// How long reads from the provider stay cached, in seconds. 0 disables caching
    #[arg(
        long,
        default_value_t = 0,
        value_name = "SECONDS",
        env = concat!(env_prefix!(), "TXT_CACHE_INTERVAL")
    )]
    pub txt_cache_interval: u64,

    /// Adopt records stamped with this previous owner id
    #[arg(
        long,
        value_name = "OWNER_ID",
        env = concat!(env_prefix!(), "OLD_OWNER_ID")
    )]
    pub old_owner_id: Option<String>,

    /// Targets for endpoints that declare none, as a comma-separated list
    #[arg(
        long,
        value_name = "TARGET",
        use_value_delimiter = true,
        value_delimiter = ',',
        env = concat!(env_prefix!(), "DEFAULT_TARGETS")
    )]
    pub default_targets: Vec<String>,

    /// Apply the default targets even to endpoints that declare their own
    #[arg(
        long,
        action,
        default_value_t = false,
        env = concat!(env_prefix!(), "FORCE_DEFAULT_TARGETS")
    )]
    pub force_default_targets: bool,

    /// Minimum spacing of event-triggered reconciliations in seconds
    #[arg(
        long,
        default_value_t = 5,
        value_name = "SECONDS",
        env = concat!(env_prefix!(), "MIN_EVENT_INTERVAL")
    )]
    pub min_event_interval: u64,
}

use clap::ValueEnum;

/// Which dns provider to use. Currently only contains the in-memory provider
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, ValueEnum)]
pub enum Provider {
    Inmemory,
}

/// What actions to allow
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, ValueEnum)]
pub enum Policy {
    CreateOnly,
    Upsert,
    Sync,
}

impl From<Policy> for clouddns_sync::plan::Policy {
    fn from(value: Policy) -> Self {
        match value {
            Policy::CreateOnly => clouddns_sync::plan::Policy::CreateOnly,
            Policy::Upsert => clouddns_sync::plan::Policy::UpsertOnly,
            Policy::Sync => clouddns_sync::plan::Policy::Sync,
        }
    }
}

impl Cli {
    pub fn to_config(&self) -> Config {
        Config {
            owner_id: self.owner_id.clone(),
            txt_prefix: self.txt_prefix.clone(),
            txt_suffix: self.txt_suffix.clone(),
            txt_wildcard_replacement: self.txt_wildcard_replacement.clone(),
            managed_record_types: self.managed_record_types.clone(),
            exclude_record_types: self.exclude_record_types.clone(),
            txt_encrypt_enabled: self.txt_encrypt_enabled,
            txt_encrypt_aes_key: self.txt_encrypt_aes_key.clone(),
            txt_cache_interval: Duration::from_secs(self.txt_cache_interval),
            old_owner_id: self.old_owner_id.clone(),
            policy: self.policy.into(),
            interval: Duration::from_secs(self.interval),
            min_event_interval: Duration::from_secs(self.min_event_interval),
            default_targets: self.default_targets.clone(),
            force_default_targets: self.force_default_targets,
            dry_run: self.dry_run,
        }
    }
}

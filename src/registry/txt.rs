//! Ownership tracking through heritage TXT records.
//!
//! For every managed payload record, the registry maintains a TXT record
//! whose name is derived by the [`AffixNameMapper`] and whose target is the
//! serialized heritage string. Reading joins payload records with their TXT
//! metadata; applying expands a change set with the TXT side-changes needed
//! to keep the metadata consistent.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use itertools::Itertools;
use log::{debug, info};

use crate::{
    cancel::CancelToken,
    endpoint::{
        Endpoint, Labels, RecordType, ALIAS_PROPERTY, FORCE_UPDATE_PROPERTY, OWNED_RECORD_LABEL,
        OWNER_LABEL,
    },
    plan::Changes,
    provider::{Provider, ProviderError},
};

use super::{
    cache::RecordsCache,
    heritage::{self, TxtEncryption},
    mapper::AffixNameMapper,
    Registry, RegistryError,
};

/// Generated TXT names longer than this are silently dropped; DNS caps names
/// at 253 octets and callers tolerate the absence of the metadata record.
const MAX_TXT_NAME_LENGTH: usize = 253;

/// Configuration for a [`TxtRegistry`]. Must be supplied when creating a
/// registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRegistryConfig {
    /// Unique, non-empty identifier of this controller instance.
    pub owner_id: String,
    /// Prefix applied to TXT names. Mutually exclusive with `suffix`.
    pub prefix: String,
    /// Suffix applied to the first label of TXT names.
    pub suffix: String,
    /// Stand-in for the `*` label in TXT names of wildcard records.
    pub wildcard_replacement: String,
    /// Record types the controller is allowed to manage.
    pub managed_record_types: Vec<RecordType>,
    /// Record types excluded from management even if listed above.
    pub exclude_record_types: Vec<RecordType>,
    /// How long a provider read stays valid. Zero disables caching.
    pub cache_interval: Duration,
    /// Encrypt TXT targets with AES-256-GCM.
    pub encrypt_enabled: bool,
    /// 32-byte key, raw or base64. Required when encryption is enabled.
    pub encrypt_aes_key: Option<String>,
    /// Previous owner id whose records are adopted on sight.
    pub old_owner_id: Option<String>,
}

impl Default for TxtRegistryConfig {
    fn default() -> Self {
        TxtRegistryConfig {
            owner_id: String::new(),
            prefix: String::new(),
            suffix: String::new(),
            wildcard_replacement: String::new(),
            managed_record_types: vec![RecordType::A, RecordType::Aaaa, RecordType::Cname],
            exclude_record_types: Vec::new(),
            cache_interval: Duration::ZERO,
            encrypt_enabled: false,
            encrypt_aes_key: None,
            old_owner_id: None,
        }
    }
}

/// Key of the label side-table built from TXT records during a read:
/// (payload name, payload type if the TXT name carried one, set identifier).
type LabelMapKey = (String, Option<RecordType>, Option<String>);

/// Key of the existing-TXT set: (TXT name, set identifier).
type TxtKey = (String, Option<String>);

/// A [`Registry`] that stores ownership metadata in TXT records next to the
/// payload records.
///
/// To create a registry, use [`TxtRegistry::from_config()`].
pub struct TxtRegistry {
    provider: Box<dyn Provider>,
    owner_id: String,
    mapper: AffixNameMapper,
    wildcard_replacement: String,
    managed_record_types: Vec<RecordType>,
    exclude_record_types: Vec<RecordType>,
    cache_interval: Duration,
    cache: Option<RecordsCache>,
    encryption: Option<TxtEncryption>,
    old_owner_id: Option<String>,
    /// TXT registry names observed during the last real read. Guards against
    /// re-creating metadata records that already exist.
    existing_txts: HashSet<TxtKey>,
}

impl TxtRegistry {
    /// Create a new [`TxtRegistry`] with the supplied configuration.
    /// Fails on an empty owner id, conflicting affixes or an unusable AES key.
    pub fn from_config(
        provider: Box<dyn Provider>,
        config: &TxtRegistryConfig,
    ) -> Result<TxtRegistry, RegistryError> {
        if config.owner_id.is_empty() {
            return Err(RegistryError::EmptyOwner);
        }
        let mapper =
            AffixNameMapper::new(&config.prefix, &config.suffix, &config.wildcard_replacement)?;
        let encryption = if config.encrypt_enabled {
            let key = config
                .encrypt_aes_key
                .as_deref()
                .ok_or(RegistryError::Heritage(heritage::HeritageError::InvalidKey))?;
            Some(TxtEncryption::from_key(key)?)
        } else {
            None
        };

        Ok(TxtRegistry {
            provider,
            owner_id: config.owner_id.clone(),
            mapper,
            wildcard_replacement: config.wildcard_replacement.to_lowercase(),
            managed_record_types: config.managed_record_types.clone(),
            exclude_record_types: config.exclude_record_types.clone(),
            cache_interval: config.cache_interval,
            cache: None,
            encryption,
            old_owner_id: config.old_owner_id.clone().filter(|o| !o.is_empty()),
            existing_txts: HashSet::new(),
        })
    }

    fn is_managed(&self, record_type: RecordType) -> bool {
        self.managed_record_types.contains(&record_type)
            && !self.exclude_record_types.contains(&record_type)
    }

    /// The name a payload record's wildcard label resolves to in the TXT
    /// side-table.
    fn wildcard_normalized(&self, dns_name: &str) -> String {
        match dns_name.split_once('.') {
            Some(("*", rest)) if !self.wildcard_replacement.is_empty() => {
                format!("{}.{}", self.wildcard_replacement, rest)
            }
            _ => dns_name.to_string(),
        }
    }

    /// The name of the ownership TXT record for `ep`, or `None` when the
    /// type is unmanaged or the name would exceed DNS limits.
    fn txt_record_name(&self, ep: &Endpoint) -> Option<String> {
        if !self.is_managed(ep.record_type) {
            return None;
        }
        let name = self.mapper.to_txt_name(&ep.dns_name, effective_record_type(ep));
        if name.len() > MAX_TXT_NAME_LENGTH {
            debug!("Ownership TXT name for {} exceeds DNS limits, skipping", ep.dns_name);
            return None;
        }
        Some(name)
    }

    /// The new-format TXT record(s) encoding ownership of `ep`.
    fn generate_txt_records(&self, ep: &Endpoint) -> Result<Vec<Endpoint>, RegistryError> {
        let Some(txt_name) = self.txt_record_name(ep) else {
            return Ok(Vec::new());
        };

        let mut labels = ep.labels.clone();
        if let Some(old_owner) = &self.old_owner_id {
            if labels.get(OWNER_LABEL) == Some(old_owner) {
                labels.insert(OWNER_LABEL.to_string(), self.owner_id.clone());
            }
        }
        let target = heritage::serialize_labels(&labels, true, self.encryption.as_ref())?;

        let mut txt = Endpoint::new(&txt_name, RecordType::Txt, vec![target]);
        txt.set_identifier = ep.set_identifier.clone();
        txt.labels.insert(OWNED_RECORD_LABEL.to_string(), ep.dns_name.clone());
        // Auxiliary metadata (e.g. regional hostnames) follows the payload;
        // the force-update flag is a registry-internal signal and does not.
        txt.provider_specific = ep
            .provider_specific
            .iter()
            .filter(|p| p.name != FORCE_UPDATE_PROPERTY)
            .cloned()
            .collect();
        Ok(vec![txt])
    }
}

impl Registry for TxtRegistry {
    fn records(&mut self, ctx: &CancelToken) -> Result<Vec<Endpoint>, RegistryError> {
        if ctx.is_cancelled() {
            return Err(ProviderError::Cancelled.into());
        }
        self.existing_txts.clear();

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get() {
                debug!("Using cached records");
                return Ok(cached);
            }
        }

        let records = self.provider.records(ctx)?;

        let mut endpoints: Vec<Endpoint> = Vec::new();
        let mut label_map: HashMap<LabelMapKey, Labels> = HashMap::new();
        for record in records {
            if record.record_type != RecordType::Txt {
                endpoints.push(record);
                continue;
            }
            // A TXT record is a registry record iff its single target parses
            // as a heritage string; everything else is payload.
            let labels = match record.targets.0.as_slice() {
                [single] => heritage::parse_labels(single, self.encryption.as_ref()).ok(),
                _ => None,
            };
            let Some(labels) = labels else {
                debug!("TXT record {} carries no ownership metadata", record.dns_name);
                endpoints.push(record);
                continue;
            };
            self.existing_txts
                .insert((record.dns_name.clone(), record.set_identifier.clone()));
            if let Some((endpoint_name, record_type)) =
                self.mapper.to_endpoint_name(&record.dns_name)
            {
                label_map.insert(
                    (endpoint_name, record_type, record.set_identifier.clone()),
                    labels,
                );
            }
        }

        for ep in &mut endpoints {
            let lookup_name = self.wildcard_normalized(&ep.dns_name);
            let typed_key =
                (lookup_name.clone(), Some(effective_record_type(ep)), ep.set_identifier.clone());
            // Old-format (untyped) TXT names never described AAAA records,
            // so the fallback does not apply to them.
            let labels = label_map.get(&typed_key).or_else(|| {
                if ep.record_type == RecordType::Aaaa {
                    None
                } else {
                    label_map.get(&(lookup_name, None, ep.set_identifier.clone()))
                }
            });
            if let Some(labels) = labels {
                for (k, v) in labels {
                    ep.labels.insert(k.clone(), v.clone());
                }
            }

            if let Some(old_owner) = &self.old_owner_id {
                if ep.owner() == old_owner {
                    info!(
                        "Adopting {} from previous owner {} as {}",
                        ep.dns_name, old_owner, self.owner_id
                    );
                    ep.labels.insert(OWNER_LABEL.to_string(), self.owner_id.clone());
                    // Push the record through the plan so the TXT metadata is
                    // rewritten with the new owner.
                    ep.set_provider_specific(FORCE_UPDATE_PROPERTY, "true");
                }
            }
        }

        for ep in &mut endpoints {
            if !ep.is_owned_by(&self.owner_id) {
                continue;
            }
            if let Some(txt_name) = self.txt_record_name(ep) {
                if !self.existing_txts.contains(&(txt_name, ep.set_identifier.clone())) {
                    debug!("Ownership TXT for {} is missing, forcing an update", ep.dns_name);
                    ep.set_provider_specific(FORCE_UPDATE_PROPERTY, "true");
                }
            }
        }

        if !self.cache_interval.is_zero() {
            self.cache = Some(RecordsCache::new(endpoints.clone(), self.cache_interval));
        }
        Ok(endpoints)
    }

    fn apply_changes(&mut self, ctx: &CancelToken, changes: &Changes) -> Result<(), RegistryError> {
        if ctx.is_cancelled() {
            return Err(ProviderError::Cancelled.into());
        }

        // Creates pass through unfiltered (nothing owns a new record yet) and
        // are stamped; updates and deletes are restricted to our records.
        let mut create = changes.create.clone();
        for ep in &mut create {
            ep.labels.insert(OWNER_LABEL.to_string(), self.owner_id.clone());
        }
        let (update_old, update_new): (Vec<Endpoint>, Vec<Endpoint>) = changes
            .update_old
            .iter()
            .cloned()
            .zip(changes.update_new.iter().cloned())
            .filter(|(old, _)| old.is_owned_by(&self.owner_id))
            .unzip();
        let delete = changes
            .delete
            .iter()
            .filter(|ep| ep.is_owned_by(&self.owner_id))
            .cloned()
            .collect_vec();

        // Patch the cache with the payload changes so cached reads observe
        // this cycle's writes.
        if let Some(cache) = &mut self.cache {
            for ep in &create {
                cache.add(ep);
            }
            for ep in &delete {
                cache.remove(ep);
            }
            for ep in &update_old {
                cache.remove(ep);
            }
            for ep in &update_new {
                cache.add(ep);
            }
        }

        let mut expanded = Changes {
            create,
            update_old,
            update_new,
            delete,
        };

        let mut txt_creates = Vec::new();
        for ep in &expanded.create {
            for txt in self.generate_txt_records(ep)? {
                if self
                    .existing_txts
                    .contains(&(txt.dns_name.clone(), txt.set_identifier.clone()))
                {
                    debug!("Ownership TXT {} already exists, not creating it again", txt.dns_name);
                    continue;
                }
                txt_creates.push(txt);
            }
        }
        expanded.create.extend(txt_creates);

        let mut txts = Vec::new();
        for ep in &expanded.update_old {
            txts.extend(self.generate_txt_records(ep)?);
        }
        expanded.update_old.extend(std::mem::take(&mut txts));
        for ep in &expanded.update_new {
            txts.extend(self.generate_txt_records(ep)?);
        }
        expanded.update_new.extend(std::mem::take(&mut txts));
        for ep in &expanded.delete {
            txts.extend(self.generate_txt_records(ep)?);
        }
        expanded.delete.extend(txts);

        self.provider.apply_changes(ctx, &expanded).map_err(RegistryError::from)
    }

    fn adjust_endpoints(&self, endpoints: Vec<Endpoint>) -> Result<Vec<Endpoint>, RegistryError> {
        self.provider.adjust_endpoints(endpoints).map_err(RegistryError::from)
    }

    fn owner_id(&self) -> String {
        self.owner_id.clone()
    }
}

/// Provider-native alias records (an `alias=true` A record) store their
/// ownership TXT under a CNAME-typed name. A compatibility quirk, not a
/// general rule.
fn effective_record_type(ep: &Endpoint) -> RecordType {
    if ep.record_type == RecordType::A
        && ep.get_bool_provider_specific(ALIAS_PROPERTY) == Some(true)
    {
        RecordType::Cname
    } else {
        ep.record_type
    }
}

//! The canonical representation of a single desired or observed DNS record.
//!
//! Every part of the reconciliation pipeline (sources, the [`crate::plan`]
//! engine, the [`crate::registry`] and the [`crate::provider`] adapters)
//! exchanges [`Endpoint`] values. Provider-specific metadata is carried
//! verbatim as ordered name/value pairs and is never projected into a struct,
//! adapters interpret their own keys.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Desired TTL of a record in seconds. `0` means "use the provider default".
pub type TTL = u32;

/// Label key carrying the owner id of the controller instance that manages a record.
pub const OWNER_LABEL: &str = "owner";
/// Label key referencing the cluster resource a record was derived from.
pub const RESOURCE_LABEL: &str = "resource";
/// Label key on ownership TXT records naming the payload record they describe.
pub const OWNED_RECORD_LABEL: &str = "owned-record";
/// Label key holding the base64 AES-GCM nonce a TXT target was encrypted with.
/// Never serialized into the heritage string itself.
pub const TXT_ENCRYPTION_NONCE_LABEL: &str = "txt-encryption-nonce";

/// Provider-specific property marking provider-native alias records.
pub const ALIAS_PROPERTY: &str = "alias";
/// Provider-specific property set by the registry to force an otherwise
/// unchanged endpoint through the plan, recreating missing TXT metadata.
pub const FORCE_UPDATE_PROPERTY: &str = "txt/force-update";

/// Arbitrary string metadata attached to an endpoint.
/// An unset label behaves like an empty string when comparing ownership.
pub type Labels = BTreeMap<String, String>;

/// DNS record types understood by the controller.
///
/// The core treats these as opaque tags; only the plan engine, the registry
/// and the name mapper interpret subsets of them.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    #[default]
    A,
    Aaaa,
    Cname,
    Txt,
    Ns,
    Mx,
    Srv,
    Naptr,
    Ptr,
}

impl Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Txt => "TXT",
            RecordType::Ns => "NS",
            RecordType::Mx => "MX",
            RecordType::Srv => "SRV",
            RecordType::Naptr => "NAPTR",
            RecordType::Ptr => "PTR",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("unknown record type `{0}`")]
pub struct UnknownRecordType(String);

impl FromStr for RecordType {
    type Err = UnknownRecordType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::Aaaa),
            "CNAME" => Ok(RecordType::Cname),
            "TXT" => Ok(RecordType::Txt),
            "NS" => Ok(RecordType::Ns),
            "MX" => Ok(RecordType::Mx),
            "SRV" => Ok(RecordType::Srv),
            "NAPTR" => Ok(RecordType::Naptr),
            "PTR" => Ok(RecordType::Ptr),
            _ => Err(UnknownRecordType(s.to_string())),
        }
    }
}

/// The target values of a record (IPs, hostnames or record-type specific rdata).
///
/// Order is preserved as produced by sources and providers, but equality via
/// [`Targets::same`] is order-independent and multiplicity-preserving.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Targets(pub Vec<String>);

impl Targets {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    /// Multiset equality, ignoring case. DNS names and IP addresses carry no
    /// case significance, so `lb.com` and `LB.com` denote the same target.
    pub fn same(&self, other: &Targets) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        let mut a: Vec<String> = self.0.iter().map(|t| t.to_lowercase()).collect();
        let mut b: Vec<String> = other.0.iter().map(|t| t.to_lowercase()).collect();
        a.sort();
        b.sort();
        a == b
    }
}

impl Display for Targets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(";"))
    }
}

impl From<Vec<String>> for Targets {
    fn from(targets: Vec<String>) -> Self {
        Targets(targets)
    }
}

impl From<Vec<&str>> for Targets {
    fn from(targets: Vec<&str>) -> Self {
        Targets(targets.into_iter().map(str::to_string).collect())
    }
}

impl FromIterator<String> for Targets {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Targets(iter.into_iter().collect())
    }
}

/// A single name/value pair of provider-specific metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderSpecificProperty {
    pub name: String,
    pub value: String,
}

/// Ordered provider-specific metadata, compared as a multiset on name.
pub type ProviderSpecific = Vec<ProviderSpecificProperty>;

/// The natural identity of an endpoint for diffing purposes.
/// Two endpoints with the same key but different targets are update candidates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    pub dns_name: String,
    pub record_type: RecordType,
    pub set_identifier: Option<String>,
}

impl Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.set_identifier {
            Some(id) => write!(f, "{}/{}/{}", self.dns_name, self.record_type, id),
            None => write!(f, "{}/{}", self.dns_name, self.record_type),
        }
    }
}

/// One desired or observed DNS record.
///
/// To create an endpoint, use [`Endpoint::new()`] and the `with_` builder
/// methods:
///
/// ```
/// use clouddns_sync::endpoint::{Endpoint, RecordType};
///
/// let ep = Endpoint::new("www.example.org", RecordType::Cname, vec!["lb.example.com"])
///     .with_ttl(300)
///     .with_provider_specific("alias", "false");
/// ```
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Fully qualified record name. Normalized to lowercase without the
    /// trailing dot on construction; compared case-insensitively.
    pub dns_name: String,
    pub targets: Targets,
    pub record_type: RecordType,
    /// Disambiguates multiple endpoints sharing (name, type), e.g. for
    /// weighted or latency-based routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_identifier: Option<String>,
    #[serde(default, rename = "recordTTL")]
    pub record_ttl: TTL,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_specific: ProviderSpecific,
}

impl Endpoint {
    /// Create a new endpoint with empty labels and provider-specific metadata.
    ///
    /// `dns_name` is normalized: one optional trailing dot is trimmed and the
    /// name is lowercased, so `Example.org.` and `example.org` construct the
    /// same endpoint. Raw source output that has not passed through here is
    /// not normalized and compares verbatim.
    pub fn new<T: Into<Targets>>(dns_name: &str, record_type: RecordType, targets: T) -> Endpoint {
        Endpoint {
            dns_name: normalize_dns_name(dns_name),
            targets: targets.into(),
            record_type,
            set_identifier: None,
            record_ttl: 0,
            labels: Labels::new(),
            provider_specific: ProviderSpecific::new(),
        }
    }

    pub fn with_set_identifier(mut self, set_identifier: &str) -> Endpoint {
        self.set_identifier = Some(set_identifier.to_string());
        self
    }

    pub fn with_ttl(mut self, ttl: TTL) -> Endpoint {
        self.record_ttl = ttl;
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Endpoint {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Set a provider-specific property, replacing an existing pair of the
    /// same name.
    pub fn with_provider_specific(mut self, name: &str, value: &str) -> Endpoint {
        self.set_provider_specific(name, value);
        self
    }

    pub fn set_provider_specific(&mut self, name: &str, value: &str) {
        match self.provider_specific.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value.to_string(),
            None => self.provider_specific.push(ProviderSpecificProperty {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn get_provider_specific(&self, name: &str) -> Option<&str> {
        self.provider_specific
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Read a provider-specific property as a boolean. `true`/`false` are
    /// matched case-insensitively; anything else reads as absent.
    pub fn get_bool_provider_specific(&self, name: &str) -> Option<bool> {
        match self.get_provider_specific(name)?.to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey {
            dns_name: self.dns_name.clone(),
            record_type: self.record_type,
            set_identifier: self.set_identifier.clone(),
        }
    }

    /// The owner id recorded in the labels; unset reads as the empty string.
    pub fn owner(&self) -> &str {
        self.labels.get(OWNER_LABEL).map(String::as_str).unwrap_or("")
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner() == owner_id
    }

    /// Provider-specific pairs sorted by (name, value), the form in which
    /// they are compared.
    pub fn sorted_provider_specific(&self) -> ProviderSpecific {
        let mut sorted = self.provider_specific.clone();
        sorted.sort();
        sorted
    }
}

impl PartialEq for Endpoint {
    /// Semantic equality: key, target multiset, TTL, the reserved ownership
    /// labels and the sorted provider-specific pairs all match. Other labels
    /// do not participate.
    fn eq(&self, other: &Self) -> bool {
        const COMPARED_LABELS: [&str; 3] = [OWNER_LABEL, RESOURCE_LABEL, OWNED_RECORD_LABEL];

        self.key() == other.key()
            && self.targets.same(&other.targets)
            && self.record_ttl == other.record_ttl
            && COMPARED_LABELS.iter().all(|l| {
                self.labels.get(*l).map(String::as_str).unwrap_or("")
                    == other.labels.get(*l).map(String::as_str).unwrap_or("")
            })
            && self.sorted_provider_specific() == other.sorted_provider_specific()
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.set_identifier {
            Some(id) => write!(
                f,
                "{} {} IN {} ({}) {}",
                self.dns_name, self.record_ttl, self.record_type, id, self.targets
            ),
            None => write!(
                f,
                "{} {} IN {} {}",
                self.dns_name, self.record_ttl, self.record_type, self.targets
            ),
        }
    }
}

/// Lowercase a DNS name and trim at most one trailing dot.
pub fn normalize_dns_name(dns_name: &str) -> String {
    let trimmed = dns_name.strip_suffix('.').unwrap_or(dns_name);
    trimmed.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_normalize_name_on_construction() {
        let a = Endpoint::new("Example.ORG.", RecordType::A, vec!["1.1.1.1"]);
        let b = Endpoint::new("example.org", RecordType::A, vec!["1.1.1.1"]);
        assert_eq!(a.dns_name, "example.org");
        assert_eq!(a, b);
        // Only a single trailing dot is trimmed
        assert_eq!(normalize_dns_name("example.org.."), "example.org.");
        // Raw (un-normalized) names still compare verbatim as strings
        assert_ne!("example.org.", "example.org");
    }

    #[test]
    fn should_compare_targets_as_multiset() {
        let a = Targets::from(vec!["1.1.1.1", "8.8.8.8", "8.8.8.8"]);
        let b = Targets::from(vec!["8.8.8.8", "1.1.1.1", "8.8.8.8"]);
        let c = Targets::from(vec!["8.8.8.8", "1.1.1.1"]);
        assert!(a.same(&b));
        assert!(b.same(&a));
        assert!(a.same(&a));
        assert!(!a.same(&c));
        assert!(!c.same(&a));
    }

    #[test]
    fn should_ignore_case_in_targets() {
        let a = Targets::from(vec!["LB.example.COM"]);
        let b = Targets::from(vec!["lb.example.com"]);
        assert!(a.same(&b));
    }

    #[test]
    fn targets_same_agrees_with_sorted_equality() {
        let a = Targets::from(vec!["b", "a", "c"]);
        let b = Targets::from(vec!["c", "b", "a"]);
        let mut sa = a.0.clone();
        let mut sb = b.0.clone();
        sa.sort();
        sb.sort();
        assert_eq!(a.same(&b), sa == sb);
    }

    #[test]
    fn should_parse_record_types_case_insensitively() {
        assert_eq!("cname".parse::<RecordType>().unwrap(), RecordType::Cname);
        assert_eq!("AAAA".parse::<RecordType>().unwrap(), RecordType::Aaaa);
        assert!("SPF".parse::<RecordType>().is_err());
    }

    #[test]
    fn should_replace_provider_specific_of_same_name() {
        let ep = Endpoint::new("foo.example.org", RecordType::A, vec!["1.1.1.1"])
            .with_provider_specific("alias", "false")
            .with_provider_specific("alias", "true");
        assert_eq!(ep.provider_specific.len(), 1);
        assert_eq!(ep.get_provider_specific("alias"), Some("true"));
    }

    #[test]
    fn should_read_bool_provider_specific() {
        let ep = Endpoint::new("foo.example.org", RecordType::A, vec!["1.1.1.1"])
            .with_provider_specific("alias", "TRUE")
            .with_provider_specific("weird", "yes");
        assert_eq!(ep.get_bool_provider_specific("alias"), Some(true));
        assert_eq!(ep.get_bool_provider_specific("weird"), None);
        assert_eq!(ep.get_bool_provider_specific("missing"), None);
    }

    #[test]
    fn should_compare_endpoints_on_reserved_labels_only() {
        let a = Endpoint::new("foo.example.org", RecordType::A, vec!["1.1.1.1"])
            .with_label(OWNER_LABEL, "me")
            .with_label("color", "blue");
        let b = Endpoint::new("foo.example.org", RecordType::A, vec!["1.1.1.1"])
            .with_label(OWNER_LABEL, "me")
            .with_label("color", "red");
        assert_eq!(a, b);

        let c = Endpoint::new("foo.example.org", RecordType::A, vec!["1.1.1.1"])
            .with_label(OWNER_LABEL, "them");
        assert_ne!(a, c);
    }

    #[test]
    fn unset_owner_label_behaves_as_empty() {
        let unset = Endpoint::new("foo.example.org", RecordType::A, vec!["1.1.1.1"]);
        let empty = Endpoint::new("foo.example.org", RecordType::A, vec!["1.1.1.1"])
            .with_label(OWNER_LABEL, "");
        assert_eq!(unset, empty);
        assert!(unset.is_owned_by(""));
    }

    #[test]
    fn should_distinguish_set_identifiers_in_key() {
        let plain = Endpoint::new("foo.example.org", RecordType::A, vec!["1.1.1.1"]);
        let weighted = Endpoint::new("foo.example.org", RecordType::A, vec!["1.1.1.1"])
            .with_set_identifier("weighted-eu");
        assert_ne!(plain.key(), weighted.key());
        assert_eq!(weighted.key().set_identifier.as_deref(), Some("weighted-eu"));
    }

    #[test]
    fn should_roundtrip_through_json() {
        let ep = Endpoint::new("foo.example.org", RecordType::Cname, vec!["lb.example.com"])
            .with_ttl(300)
            .with_set_identifier("blue")
            .with_label(RESOURCE_LABEL, "ingress/default/my-ingress")
            .with_provider_specific("alias", "false");
        let json = serde_json::to_string(&ep).unwrap();
        let back: Endpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(ep, back);
        assert!(json.contains("\"recordType\":\"CNAME\""));
    }
}

//! Bidirectional mapping between payload DNS names and ownership TXT names.
//!
//! New-format TXT names embed the payload record type, either as a
//! `<type>-` token in front of the first label or substituted into a
//! templated affix. Old-format (untyped) names are still recognized on the
//! way back in, but never produced.

use std::fmt::Display;

use thiserror::Error;

use crate::endpoint::RecordType;

/// Literal token in a prefix or suffix that is replaced by the lowercased
/// record type.
pub const RECORD_TYPE_TEMPLATE: &str = "%{record_type}";

/// Record types that can be encoded in (and parsed back out of) a TXT name.
/// Longer names first so that a templated `-aaaa` suffix is never mistaken
/// for the `-a` instantiation.
const TXT_NAME_TYPES: [RecordType; 7] = [
    RecordType::Cname,
    RecordType::Naptr,
    RecordType::Aaaa,
    RecordType::Srv,
    RecordType::Mx,
    RecordType::Ns,
    RecordType::A,
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("txt-prefix and txt-suffix are mutually exclusive")]
pub struct InvalidAffix;

/// Maps endpoint DNS names to the names of their ownership TXT records and
/// back. Configured with at most one of prefix/suffix plus an optional
/// replacement for the wildcard label (DNS forbids `*` in non-leading
/// positions, so `*.zone` TXT names need a stand-in).
///
/// All inputs are lowercased; the mapping is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffixNameMapper {
    prefix: String,
    suffix: String,
    wildcard_replacement: String,
}

impl AffixNameMapper {
    pub fn new(
        prefix: &str,
        suffix: &str,
        wildcard_replacement: &str,
    ) -> Result<AffixNameMapper, InvalidAffix> {
        if !prefix.is_empty() && !suffix.is_empty() {
            return Err(InvalidAffix);
        }
        Ok(AffixNameMapper {
            prefix: prefix.to_lowercase(),
            suffix: suffix.to_lowercase(),
            wildcard_replacement: wildcard_replacement.to_lowercase(),
        })
    }

    /// Whether either affix embeds the record type via [`RECORD_TYPE_TEMPLATE`].
    pub fn record_type_in_affix(&self) -> bool {
        self.prefix.contains(RECORD_TYPE_TEMPLATE) || self.suffix.contains(RECORD_TYPE_TEMPLATE)
    }

    /// The new-format TXT name for a payload record.
    ///
    /// The affix and the `<type>-` token apply to the first label only;
    /// subsequent labels are untouched. A wildcard first label is replaced by
    /// the configured stand-in.
    pub fn to_txt_name(&self, dns_name: &str, record_type: RecordType) -> String {
        let name = dns_name.to_lowercase();
        let (mut first, rest) = split_first_label(&name);
        if first == "*" && !self.wildcard_replacement.is_empty() {
            first = self.wildcard_replacement.clone();
        }

        let record_type = record_type.to_string().to_lowercase();
        let (prefix, type_token, suffix) = if self.record_type_in_affix() {
            (
                self.prefix.replace(RECORD_TYPE_TEMPLATE, &record_type),
                String::new(),
                self.suffix.replace(RECORD_TYPE_TEMPLATE, &record_type),
            )
        } else {
            (self.prefix.clone(), format!("{}-", record_type), self.suffix.clone())
        };

        let txt_first = format!("{}{}{}{}", prefix, type_token, first, suffix);
        join_labels(&txt_first, rest.as_deref())
    }

    /// The inverse of [`AffixNameMapper::to_txt_name`]: the payload name a
    /// TXT name refers to, plus the record type if the name carries one
    /// (old-format names do not). Returns `None` for names that do not match
    /// the configured affix at all.
    pub fn to_endpoint_name(&self, txt_name: &str) -> Option<(String, Option<RecordType>)> {
        let name = txt_name.to_lowercase();

        if self.record_type_in_affix() {
            for record_type in TXT_NAME_TYPES {
                let t = record_type.to_string().to_lowercase();
                let prefix = self.prefix.replace(RECORD_TYPE_TEMPLATE, &t);
                let suffix = self.suffix.replace(RECORD_TYPE_TEMPLATE, &t);

                if !prefix.is_empty() {
                    if let Some(stripped) = name.strip_prefix(&prefix) {
                        return Some((stripped.to_string(), Some(record_type)));
                    }
                } else if !suffix.is_empty() {
                    let (first, rest) = split_first_label(&name);
                    if let Some(stripped) = first.strip_suffix(&suffix) {
                        return Some((join_labels(stripped, rest.as_deref()), Some(record_type)));
                    }
                }
            }
            return None;
        }

        let stripped = if !self.prefix.is_empty() {
            name.strip_prefix(&self.prefix)?.to_string()
        } else if !self.suffix.is_empty() {
            let (first, rest) = split_first_label(&name);
            let first = first.strip_suffix(&self.suffix)?;
            join_labels(first, rest.as_deref())
        } else {
            name
        };
        Some(extract_record_type(&stripped))
    }
}

impl Display for AffixNameMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AffixNameMapper(prefix={:?}, suffix={:?}, wildcard={:?})",
            self.prefix, self.suffix, self.wildcard_replacement
        )
    }
}

/// Strip a leading `<type>-` token from the first label, if present.
fn extract_record_type(name: &str) -> (String, Option<RecordType>) {
    let (first, rest) = split_first_label(name);
    for record_type in TXT_NAME_TYPES {
        let token = format!("{}-", record_type.to_string().to_lowercase());
        if let Some(stripped) = first.strip_prefix(&token) {
            return (join_labels(stripped, rest.as_deref()), Some(record_type));
        }
    }
    (name.to_string(), None)
}

fn split_first_label(name: &str) -> (String, Option<String>) {
    match name.split_once('.') {
        Some((first, rest)) => (first.to_string(), Some(rest.to_string())),
        None => (name.to_string(), None),
    }
}

fn join_labels(first: &str, rest: Option<&str>) -> String {
    match rest {
        Some(rest) => format!("{}.{}", first, rest),
        None => first.to_string(),
    }
}

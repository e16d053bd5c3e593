//! Compute the record changes required to bring a provider up-to-date.
//!
//! A [`Plan`] is the result of diffing the desired endpoints (from the
//! sources) against the current endpoints (from the [`crate::registry`]): a
//! set of [`Changes`] to submit plus any ownership [`Conflict`]s that were
//! resolved along the way.
//!
//! To create a new plan, use [`Plan::calculate()`].

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use log::{debug, warn};

use crate::endpoint::{
    Endpoint, Labels, RecordType, FORCE_UPDATE_PROPERTY, OWNER_LABEL, RESOURCE_LABEL,
};

/// Policies limit the kinds of changes a [`Plan`] may contain:
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Policy {
    /// Allow creates, updates and deletes.
    #[default]
    Sync,
    /// Allow creates and updates, never delete records.
    UpsertOnly,
    /// Only create new records, leave existing ones untouched.
    CreateOnly,
}

impl Policy {
    fn apply(&self, changes: &mut Changes) {
        match self {
            Policy::Sync => {}
            Policy::UpsertOnly => changes.delete.clear(),
            Policy::CreateOnly => {
                changes.delete.clear();
                changes.update_old.clear();
                changes.update_new.clear();
            }
        }
    }
}

impl Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Policy::Sync => write!(f, "sync"),
            Policy::UpsertOnly => write!(f, "upsert-only"),
            Policy::CreateOnly => write!(f, "create-only"),
        }
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sync" => Ok(Policy::Sync),
            "upsert-only" => Ok(Policy::UpsertOnly),
            "create-only" => Ok(Policy::CreateOnly),
            _ => Err(format!("unknown policy `{}`", s)),
        }
    }
}

/// The disjoint change sets produced by a plan. `update_old[i]` and
/// `update_new[i]` share an endpoint identity and describe the before/after
/// of one logical update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    pub create: Vec<Endpoint>,
    pub update_old: Vec<Endpoint>,
    pub update_new: Vec<Endpoint>,
    pub delete: Vec<Endpoint>,
}

impl Changes {
    pub fn has_changes(&self) -> bool {
        !self.create.is_empty() || !self.update_new.is_empty() || !self.delete.is_empty()
    }
}

/// Two desired endpoints claimed the same record from different resources.
/// The plan proceeds with the winner; the conflict is surfaced for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub dns_name: String,
    pub set_identifier: Option<String>,
    pub record_type: RecordType,
    /// `resource` label of the endpoint that won.
    pub winner: String,
    /// `resource` label of the endpoint that was discarded.
    pub discarded: String,
}

impl Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) wanted by both {} and {}, keeping {}",
            self.dns_name, self.record_type, self.winner, self.discarded, self.winner
        )
    }
}

/// A calculated reconciliation plan.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub changes: Changes,
    pub conflicts: Vec<Conflict>,
}

/// Matching between desired and current groups records into families: A and
/// CNAME records at the same name contend for the same slot, AAAA records are
/// tracked independently, every other type is its own family.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RecordFamily {
    Address,
    Aaaa,
    Other(RecordType),
}

impl RecordFamily {
    fn of(record_type: RecordType) -> RecordFamily {
        match record_type {
            RecordType::A | RecordType::Cname => RecordFamily::Address,
            RecordType::Aaaa => RecordFamily::Aaaa,
            other => RecordFamily::Other(other),
        }
    }
}

type RowKey = (String, Option<String>);

#[derive(Default)]
struct FamilyRow {
    current: Vec<Endpoint>,
    /// Candidates keep their insertion index for deterministic tie-breaks.
    candidates: Vec<(usize, Endpoint)>,
}

impl Plan {
    /// Diff `desired` against `current` and compute the minimal change set.
    ///
    /// Only records whose type is in `managed_record_types` are considered;
    /// everything else passes through untouched. Deletes are restricted to
    /// records owned by `owner_id` (an unset owner label matches the empty
    /// string). The result is deterministic for any input order.
    pub fn calculate(
        desired: &[Endpoint],
        current: &[Endpoint],
        policy: Policy,
        managed_record_types: &[RecordType],
        owner_id: &str,
    ) -> Plan {
        let mut rows: BTreeMap<RowKey, BTreeMap<RecordFamily, FamilyRow>> = BTreeMap::new();

        for ep in current {
            if !managed_record_types.contains(&ep.record_type) {
                continue;
            }
            rows.entry((ep.dns_name.clone(), ep.set_identifier.clone()))
                .or_default()
                .entry(RecordFamily::of(ep.record_type))
                .or_default()
                .current
                .push(ep.clone());
        }
        for (idx, ep) in desired.iter().enumerate() {
            if !managed_record_types.contains(&ep.record_type) {
                continue;
            }
            rows.entry((ep.dns_name.clone(), ep.set_identifier.clone()))
                .or_default()
                .entry(RecordFamily::of(ep.record_type))
                .or_default()
                .candidates
                .push((idx, ep.clone()));
        }

        let mut changes = Changes::default();
        let mut conflicts = Vec::new();

        for ((dns_name, set_identifier), families) in rows {
            for (_, mut row) in families {
                row.current.sort_by_key(|ep| ep.record_type);

                let winner = resolve_candidates(
                    &dns_name,
                    set_identifier.as_deref(),
                    row.candidates,
                    &mut conflicts,
                );

                match (winner, row.current.is_empty()) {
                    (Some(desired), true) => {
                        debug!("Planning create for {}", desired);
                        changes.create.push(desired);
                    }
                    (Some(desired), false) => {
                        // Prefer the current record of the same type as the
                        // winner; any leftover sibling in the family is stale.
                        let pos = row
                            .current
                            .iter()
                            .position(|c| c.record_type == desired.record_type)
                            .unwrap_or(0);
                        let primary = row.current.remove(pos);
                        for stale in row.current {
                            if stale.is_owned_by(owner_id) {
                                debug!("Planning delete for stale sibling {}", stale);
                                changes.delete.push(stale);
                            }
                        }
                        if should_update(&desired, &primary) {
                            let mut updated = desired;
                            updated.labels = inherit_labels(&updated.labels, &primary.labels);
                            debug!("Planning update {} -> {}", primary, updated);
                            changes.update_old.push(primary);
                            changes.update_new.push(updated);
                        }
                    }
                    (None, _) => {
                        for orphan in row.current {
                            if orphan.is_owned_by(owner_id) {
                                debug!("Planning delete for {}", orphan);
                                changes.delete.push(orphan);
                            } else {
                                debug!(
                                    "Skipping delete for {}, not owned by {:?}",
                                    orphan, owner_id
                                );
                            }
                        }
                    }
                }
            }
        }

        policy.apply(&mut changes);
        Plan { changes, conflicts }
    }
}

/// Pick the winning candidate for one record family. Ties between different
/// owning resources are reported as conflicts; the winner is the first by
/// (resource label, insertion order).
fn resolve_candidates(
    dns_name: &str,
    set_identifier: Option<&str>,
    mut candidates: Vec<(usize, Endpoint)>,
    conflicts: &mut Vec<Conflict>,
) -> Option<Endpoint> {
    candidates.sort_by(|(ai, a), (bi, b)| resource_of(a).cmp(resource_of(b)).then(ai.cmp(bi)));

    let mut candidates = candidates.into_iter();
    let (_, winner) = candidates.next()?;
    for (_, loser) in candidates {
        if resource_of(&loser) != resource_of(&winner) {
            let conflict = Conflict {
                dns_name: dns_name.to_string(),
                set_identifier: set_identifier.map(str::to_string),
                record_type: winner.record_type,
                winner: resource_of(&winner).to_string(),
                discarded: resource_of(&loser).to_string(),
            };
            warn!("Conflicting desired state: {}", conflict);
            conflicts.push(conflict);
        } else {
            debug!("Dropping duplicate candidate {}", loser);
        }
    }
    Some(winner)
}

fn resource_of(ep: &Endpoint) -> &str {
    ep.labels.get(RESOURCE_LABEL).map(String::as_str).unwrap_or("")
}

/// Whether `current` needs to be replaced by `desired`.
fn should_update(desired: &Endpoint, current: &Endpoint) -> bool {
    if current.get_bool_provider_specific(FORCE_UPDATE_PROPERTY) == Some(true) {
        return true;
    }
    if desired.record_type != current.record_type {
        return true;
    }
    if !desired.targets.same(&current.targets) {
        return true;
    }
    // An unconfigured (zero) desired TTL never forces an update on its own.
    if desired.record_ttl != 0 && desired.record_ttl != current.record_ttl {
        return true;
    }
    // Same for an absent desired resource label.
    if !resource_of(desired).is_empty() && resource_of(desired) != resource_of(current) {
        return true;
    }
    comparable_provider_specific(desired) != comparable_provider_specific(current)
}

/// Provider-specific pairs as compared by the plan: sorted by name, with the
/// registry-internal force-update signal masked out.
fn comparable_provider_specific(ep: &Endpoint) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = ep
        .provider_specific
        .iter()
        .filter(|p| p.name != FORCE_UPDATE_PROPERTY)
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect();
    pairs.sort();
    pairs
}

/// Labels for the updated endpoint: the desired labels win, but ownership is
/// always inherited from the current record.
fn inherit_labels(desired: &Labels, current: &Labels) -> Labels {
    let mut labels = current.clone();
    for (k, v) in desired {
        labels.insert(k.clone(), v.clone());
    }
    if let Some(owner) = current.get(OWNER_LABEL) {
        labels.insert(OWNER_LABEL.to_string(), owner.clone());
    }
    labels
}

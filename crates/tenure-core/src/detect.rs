//! Change detection.
//!
//! Each validated row is classified against the version that precedes it:
//! the store's current row for its business key, or the previous row with the
//! same key earlier in the same batch. The per-key result is a [`KeyAction`]
//! the engine turns into closures, inserts and refreshes.

use std::collections::HashMap;

use serde::Serialize;

use crate::{
  batch::PreparedRow,
  config::UntrackedPolicy,
  entity::Dimension,
  hash::RowHash,
  key::BusinessKey,
  value::Record,
  version::VersionRow,
};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
  /// No prior version exists for the business key.
  New,
  /// A tracked column differs from the prior version.
  Changed,
  /// Tracked columns match the prior version.
  Unchanged,
}

/// Compare an incoming fingerprint with the fingerprint of the prior version.
pub fn classify(prior: Option<&RowHash>, incoming: &RowHash) -> ChangeKind {
  match prior {
    None => ChangeKind::New,
    Some(prior) if prior == incoming => ChangeKind::Unchanged,
    Some(_) => ChangeKind::Changed,
  }
}

/// The classification of one submitted row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
  pub index: usize,
  pub key:   BusinessKey,
  pub kind:  ChangeKind,
}

/// What happens to one business key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyAction {
  Unchanged,
  /// Rewrite the untracked columns of the current row.
  Refresh {
    current:    VersionRow,
    attributes: Record,
  },
  /// Close `supersedes` (if any) and insert `versions` in order. Only the last
  /// version stays current.
  Version {
    supersedes: Option<VersionRow>,
    versions:   Vec<PreparedRow>,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyPlan {
  pub key:    BusinessKey,
  pub action: KeyAction,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Plan {
  /// One entry per submitted row, in input order.
  pub classifications: Vec<Classification>,
  /// One entry per distinct business key, in order of first appearance.
  pub keys:            Vec<KeyPlan>,
}

/// Plan the changes for a validated batch against the current rows of the
/// keys it touches.
pub fn plan(
  dimension: &Dimension,
  rows: Vec<PreparedRow>,
  current: &HashMap<BusinessKey, VersionRow>,
  policy: UntrackedPolicy,
) -> Plan {
  let mut classifications = Vec::with_capacity(rows.len());
  let mut keys = Vec::new();

  for (key, group) in group_by_key(rows) {
    let current = current.get(&key);
    let action = plan_key(dimension, &group, current, policy, &mut classifications);
    keys.push(KeyPlan { key, action });
  }

  classifications.sort_by_key(|c| c.index);
  Plan { classifications, keys }
}

fn group_by_key(rows: Vec<PreparedRow>) -> Vec<(BusinessKey, Vec<PreparedRow>)> {
  let mut groups: Vec<(BusinessKey, Vec<PreparedRow>)> = Vec::new();
  let mut positions: HashMap<BusinessKey, usize> = HashMap::new();
  for row in rows {
    match positions.get(&row.key) {
      Some(&pos) => groups[pos].1.push(row),
      None => {
        positions.insert(row.key.clone(), groups.len());
        groups.push((row.key.clone(), vec![row]));
      }
    }
  }
  groups
}

fn plan_key(
  dimension: &Dimension,
  group: &[PreparedRow],
  current: Option<&VersionRow>,
  policy: UntrackedPolicy,
  classifications: &mut Vec<Classification>,
) -> KeyAction {
  let classified = |row: &PreparedRow, kind| Classification {
    index: row.index,
    key: row.key.clone(),
    kind,
  };

  // The batch ends where the store already is: nothing to version, whatever
  // happened in between.
  if let (Some(current), Some(last)) = (current, group.last())
    && current.row_hash == last.row_hash
  {
    classifications.extend(group.iter().map(|row| classified(row, ChangeKind::Unchanged)));
    return match refreshed_untracked(dimension, &current.attributes, &last.attributes, policy) {
      Some(attributes) => KeyAction::Refresh { current: current.clone(), attributes },
      None => KeyAction::Unchanged,
    };
  }

  let mut prior = current.map(|c| c.row_hash);
  let mut versions: Vec<PreparedRow> = Vec::new();
  for row in group {
    let kind = classify(prior.as_ref(), &row.row_hash);
    classifications.push(classified(row, kind));
    match kind {
      ChangeKind::Unchanged => {
        if let Some(pending) = versions.last_mut()
          && policy == UntrackedPolicy::UpdateInPlace
        {
          pending.attributes = row.attributes.clone();
        }
      }
      ChangeKind::New | ChangeKind::Changed => {
        prior = Some(row.row_hash);
        versions.push(row.clone());
      }
    }
  }

  KeyAction::Version { supersedes: current.cloned(), versions }
}

/// The untracked values to write onto the current row, if any differ.
fn refreshed_untracked(
  dimension: &Dimension,
  current: &Record,
  incoming: &Record,
  policy: UntrackedPolicy,
) -> Option<Record> {
  if policy == UntrackedPolicy::Ignore {
    return None;
  }
  let untracked: Record = dimension
    .untracked_columns()
    .iter()
    .filter_map(|c| incoming.get(&c.name).map(|v| (c.name.clone(), v.clone())))
    .collect();
  let differs = untracked.iter().any(|(name, value)| current.get(name) != Some(value));
  differs.then_some(untracked)
}

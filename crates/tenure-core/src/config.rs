//! Engine settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do when only untracked columns differ from the current row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UntrackedPolicy {
  /// Rewrite the untracked columns of the current row; no new version.
  #[default]
  UpdateInPlace,
  /// Leave the current row as is until a tracked column changes.
  Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// How long a batch waits for the entity lock before failing with a
  /// concurrency conflict. `None` waits indefinitely.
  pub lock_timeout_ms:   Option<u64>,
  pub untracked_policy:  UntrackedPolicy,
  /// Upper bound of the surrogate key space.
  pub max_surrogate_key: i64,
}

impl EngineConfig {
  pub fn lock_timeout(&self) -> Option<Duration> {
    self.lock_timeout_ms.map(Duration::from_millis)
  }
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      lock_timeout_ms:   None,
      untracked_policy:  UntrackedPolicy::default(),
      max_surrogate_key: i64::MAX,
    }
  }
}

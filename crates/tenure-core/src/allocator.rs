//! Surrogate key allocation.

use std::{
  fmt,
  sync::atomic::{AtomicI64, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The system-assigned identifier of one version row.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SurrogateKey(pub i64);

impl fmt::Display for SurrogateKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// A strictly increasing key sequence for one dimension.
///
/// `allocate` is a single atomic read-modify-write, so concurrent callers
/// never observe the same key. Keys handed out for a batch that is later
/// rejected are simply skipped; the sequence never moves backwards.
#[derive(Debug)]
pub struct SequenceAllocator {
  entity: String,
  last:   AtomicI64,
  max:    i64,
}

impl SequenceAllocator {
  /// Continue after `last_issued` (or start at 1), never exceeding `max`.
  pub fn new(entity: impl Into<String>, last_issued: Option<SurrogateKey>, max: i64) -> Self {
    Self {
      entity: entity.into(),
      last:   AtomicI64::new(last_issued.map_or(0, |k| k.0)),
      max,
    }
  }

  pub fn allocate(&self) -> Result<SurrogateKey> {
    self
      .last
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        last.checked_add(1).filter(|next| *next <= self.max)
      })
      .map(|prev| SurrogateKey(prev + 1))
      .map_err(|_| Error::AllocatorExhausted(self.entity.clone()))
  }

  /// The most recently issued key, if any.
  pub fn last_issued(&self) -> Option<SurrogateKey> {
    match self.last.load(Ordering::SeqCst) {
      0 => None,
      n => Some(SurrogateKey(n)),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{collections::HashSet, sync::Arc, thread};

  use super::*;

  #[test]
  fn starts_at_one_and_increases() {
    let alloc = SequenceAllocator::new("customer", None, i64::MAX);
    assert_eq!(alloc.last_issued(), None);
    assert_eq!(alloc.allocate().unwrap(), SurrogateKey(1));
    assert_eq!(alloc.allocate().unwrap(), SurrogateKey(2));
    assert_eq!(alloc.last_issued(), Some(SurrogateKey(2)));
  }

  #[test]
  fn resumes_after_last_issued() {
    let alloc = SequenceAllocator::new("customer", Some(SurrogateKey(100)), i64::MAX);
    assert_eq!(alloc.allocate().unwrap(), SurrogateKey(101));
  }

  #[test]
  fn exhaustion_is_an_error_and_does_not_wrap() {
    let alloc = SequenceAllocator::new("tiny", Some(SurrogateKey(2)), 3);
    assert_eq!(alloc.allocate().unwrap(), SurrogateKey(3));
    assert!(matches!(alloc.allocate(), Err(Error::AllocatorExhausted(e)) if e == "tiny"));
    assert!(matches!(alloc.allocate(), Err(Error::AllocatorExhausted(_))));

    let full = SequenceAllocator::new("full", Some(SurrogateKey(i64::MAX)), i64::MAX);
    assert!(full.allocate().is_err());
  }

  #[test]
  fn concurrent_allocation_never_repeats() {
    let alloc = Arc::new(SequenceAllocator::new("customer", None, i64::MAX));
    let handles: Vec<_> = (0..8)
      .map(|_| {
        let alloc = Arc::clone(&alloc);
        thread::spawn(move || (0..500).map(|_| alloc.allocate().unwrap()).collect::<Vec<_>>())
      })
      .collect();

    let mut seen = HashSet::new();
    for handle in handles {
      let keys = handle.join().unwrap();
      assert!(keys.windows(2).all(|w| w[0] < w[1]));
      for key in keys {
        assert!(seen.insert(key), "duplicate key {key}");
      }
    }
    assert_eq!(seen.len(), 4000);
    assert_eq!(alloc.last_issued(), Some(SurrogateKey(4000)));
  }
}

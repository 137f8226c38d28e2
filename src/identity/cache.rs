use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::warn;

use crate::frame::ErrorKind;

use super::types::{DeviceIdentity, DeviceState, Lifecycle};
use super::UnitId;

/// Adaptive timeout never grows past this regardless of configuration,
/// per the invariant in §3 of the design notes.
const ADAPTIVE_TIMEOUT_CEILING: Duration = Duration::from_millis(1200);

/// Thread-safe map from [`UnitId`] to (identity, liveness state). This is
/// the single owner of both; every mutation — discovery enrollment,
/// poll success/failure, renames, alias updates — goes through it.
pub struct IdentityCache {
  baseline_timeout: Duration,
  backoff_base: Duration,
  backoff_cap: Duration,
  entries: Mutex<HashMap<UnitId, (DeviceIdentity, DeviceState)>>,
}

impl IdentityCache {
  pub fn new(baseline_timeout: Duration, backoff_base: Duration, backoff_cap: Duration) -> Self {
    IdentityCache { baseline_timeout, backoff_base, backoff_cap, entries: Mutex::new(HashMap::new()) }
  }

  /// Inserts or replaces the identity for `unit_id`, discovered by the
  /// discovery engine. Liveness state is created fresh if the unit was
  /// not previously known.
  pub fn upsert_identity(&self, unit_id: UnitId, identity: DeviceIdentity) {
    let mut entries = self.entries.lock().unwrap();
    let state = entries
      .remove(&unit_id)
      .map(|(_, state)| state)
      .unwrap_or_else(|| DeviceState::new(self.baseline_timeout));
    entries.insert(unit_id, (identity, state));
  }

  /// Records a successful transaction with `unit_id`: transitions to
  /// Online, clears the error count, stamps `last_seen`, and resets the
  /// adaptive timeout to baseline.
  pub fn note_success(&self, unit_id: UnitId) {
    let mut entries = self.entries.lock().unwrap();
    if let Some((_, state)) = entries.get_mut(&unit_id) {
      state.lifecycle = Lifecycle::Online;
      state.consecutive_error_count = 0;
      state.last_seen = Some(Utc::now());
      state.next_allowed_poll = None;
      state.adaptive_timeout = self.baseline_timeout;
    }
  }

  /// Records a failed transaction with `unit_id`: bumps the error count,
  /// demotes lifecycle (Degraded at 1-2 errors, Offline at 3+), doubles
  /// the adaptive timeout up to [`ADAPTIVE_TIMEOUT_CEILING`], and computes
  /// the exponential backoff `next_allowed_poll`.
  pub fn note_failure(&self, unit_id: UnitId) {
    let mut entries = self.entries.lock().unwrap();
    if let Some((_, state)) = entries.get_mut(&unit_id) {
      state.consecutive_error_count += 1;
      state.lifecycle = if state.consecutive_error_count >= 3 { Lifecycle::Offline } else { Lifecycle::Degraded };

      state.adaptive_timeout = (state.adaptive_timeout * 2).min(ADAPTIVE_TIMEOUT_CEILING);

      let exponent = state.consecutive_error_count.saturating_sub(1).min(16);
      let backoff = self.backoff_base.saturating_mul(1u32 << exponent).min(self.backoff_cap);
      state.next_allowed_poll = Some(Instant::now() + backoff);
    }
  }

  /// Atomically moves the cache entry from `old` to `new`. Fails if an
  /// entry already exists at `new`.
  pub fn rename_unit(&self, old: UnitId, new: UnitId) -> Result<(), ErrorKind> {
    let mut entries = self.entries.lock().unwrap();
    if entries.contains_key(&new) {
      return Err(ErrorKind::InvalidArgument(format!("unit id {new} already enrolled")));
    }
    match entries.remove(&old) {
      Some((mut identity, state)) => {
        identity.unit_id = new;
        entries.insert(new, (identity, state));
        Ok(())
      }
      None => {
        warn!("rename_unit: no cache entry for {old}");
        Err(ErrorKind::InvalidArgument(format!("unit id {old} not enrolled")))
      }
    }
  }

  /// Updates the cached alias after a successful RAM write, without a
  /// round-trip read.
  pub fn set_alias_local(&self, unit_id: UnitId, alias: String) {
    let mut entries = self.entries.lock().unwrap();
    if let Some((identity, _)) = entries.get_mut(&unit_id) {
      identity.alias = alias;
    }
  }

  pub fn get(&self, unit_id: UnitId) -> Option<(DeviceIdentity, DeviceState)> {
    self.entries.lock().unwrap().get(&unit_id).cloned()
  }

  pub fn contains(&self, unit_id: UnitId) -> bool {
    self.entries.lock().unwrap().contains_key(&unit_id)
  }

  pub fn unit_ids(&self) -> Vec<UnitId> {
    self.entries.lock().unwrap().keys().copied().collect()
  }

  /// Removes a unit administratively (e.g. persistent offline beyond a
  /// hard ceiling). Callers are responsible for purging the alert
  /// engine's cache entries for the same unit.
  pub fn remove(&self, unit_id: UnitId) {
    self.entries.lock().unwrap().remove(&unit_id);
  }

  /// Test-only backdoor to age an entry's `last_seen` without waiting
  /// out a real liveness window.
  #[cfg(test)]
  pub(crate) fn backdate_last_seen(&self, unit_id: UnitId, when: chrono::DateTime<Utc>) {
    if let Some((_, state)) = self.entries.lock().unwrap().get_mut(&unit_id) {
      state.last_seen = Some(when);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn cache() -> IdentityCache {
    IdentityCache::new(Duration::from_millis(300), Duration::from_secs(5), Duration::from_secs(60))
  }

  fn unit(n: u8) -> UnitId {
    UnitId::new(n).unwrap()
  }

  #[test]
  fn upsert_then_success_goes_online() {
    let cache = cache();
    cache.upsert_identity(unit(2), DeviceIdentity::new(unit(2), 0x4C6F, 0x0000));
    cache.note_success(unit(2));
    let (_, state) = cache.get(unit(2)).unwrap();
    assert_eq!(state.lifecycle, Lifecycle::Online);
    assert_eq!(state.consecutive_error_count, 0);
  }

  #[test]
  fn three_failures_goes_offline_and_caps_timeout() {
    let cache = cache();
    cache.upsert_identity(unit(2), DeviceIdentity::new(unit(2), 0x4C6F, 0x0000));
    cache.note_failure(unit(2));
    cache.note_failure(unit(2));
    cache.note_failure(unit(2));
    let (_, state) = cache.get(unit(2)).unwrap();
    assert_eq!(state.lifecycle, Lifecycle::Offline);
    assert_eq!(state.consecutive_error_count, 3);
    assert!(state.adaptive_timeout <= ADAPTIVE_TIMEOUT_CEILING);
  }

  #[test]
  fn single_failure_is_degraded_not_offline() {
    let cache = cache();
    cache.upsert_identity(unit(3), DeviceIdentity::new(unit(3), 0x4C6F, 0x0000));
    cache.note_failure(unit(3));
    let (_, state) = cache.get(unit(3)).unwrap();
    assert_eq!(state.lifecycle, Lifecycle::Degraded);
  }

  #[test]
  fn rename_moves_entry_and_rejects_collision() {
    let cache = cache();
    cache.upsert_identity(unit(2), DeviceIdentity::new(unit(2), 0x4C6F, 0x0000));
    cache.upsert_identity(unit(3), DeviceIdentity::new(unit(3), 0x4C6F, 0x0000));
    assert!(cache.rename_unit(unit(2), unit(3)).is_err());
    assert!(cache.rename_unit(unit(2), unit(9)).is_ok());
    assert!(!cache.contains(unit(2)));
    assert!(cache.contains(unit(9)));
  }

  #[test]
  fn three_consecutive_failures_back_off_5s_then_10s_then_20s() {
    // Scenario S3, with the default backoff_base=5s / backoff_cap=60s:
    // next_allowed_poll after failure k is now + min(5 * 2^(k-1), 60).
    let cache = cache();
    cache.upsert_identity(unit(3), DeviceIdentity::new(unit(3), 0x4C6F, 0x0000));

    let before = Instant::now();
    cache.note_failure(unit(3));
    let (_, state) = cache.get(unit(3)).unwrap();
    let deadline = state.next_allowed_poll.unwrap();
    assert!(deadline >= before + Duration::from_secs(5));
    assert!(deadline < before + Duration::from_secs(6));

    let before = Instant::now();
    cache.note_failure(unit(3));
    let (_, state) = cache.get(unit(3)).unwrap();
    let deadline = state.next_allowed_poll.unwrap();
    assert!(deadline >= before + Duration::from_secs(10));
    assert!(deadline < before + Duration::from_secs(11));

    let before = Instant::now();
    cache.note_failure(unit(3));
    let (_, state) = cache.get(unit(3)).unwrap();
    let deadline = state.next_allowed_poll.unwrap();
    assert!(deadline >= before + Duration::from_secs(20));
    assert!(deadline < before + Duration::from_secs(21));
  }

  #[test]
  fn success_resets_adaptive_timeout_to_baseline() {
    let cache = cache();
    cache.upsert_identity(unit(2), DeviceIdentity::new(unit(2), 0x4C6F, 0x0000));
    cache.note_failure(unit(2));
    cache.note_failure(unit(2));
    cache.note_success(unit(2));
    let (_, state) = cache.get(unit(2)).unwrap();
    assert_eq!(state.adaptive_timeout, Duration::from_millis(300));
  }
}

use std::sync::Arc;

use crate::bus::BusArbiter;
use crate::frame::ErrorKind;
use crate::identity::{IdentityCache, UnitId};
use crate::register;

const IDENTIFY_DURATION_ADDR: u16 = 0x0013;
const UNIT_ID_CONFIG_ADDR: u16 = 0x0014;
const COMMIT_TO_EEPROM_ADDR: u16 = 0x0012;
const ALIAS_LENGTH_ADDR: u16 = 0x0030;
const COMMIT_MAGIC: u16 = 0xA55A;

/// Result of an Identify (blink + info) exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyResult {
  pub slave_id: u8,
  pub run_indicator: u8,
  pub info: String,
}

/// Stateful, externally-triggered device operations: identify, alias
/// write, Unit-ID change, and EEPROM commit. Each call is one
/// exclusive-transaction with no implicit retry (writes never
/// auto-retry, per §7).
pub struct CommandSurface {
  arbiter: Arc<BusArbiter>,
  cache: Arc<IdentityCache>,
}

impl CommandSurface {
  pub fn new(arbiter: Arc<BusArbiter>, cache: Arc<IdentityCache>) -> Self {
    CommandSurface { arbiter, cache }
  }

  /// Custom function 0x41: blinks the unit's indicator and returns its
  /// ASCII info block, which is cached onto the identity.
  pub fn identify(&self, unit_id: UnitId) -> Result<IdentifyResult, ErrorKind> {
    let txn = self.arbiter.exclusive_transaction(None);
    let (slave_id, run_indicator, info_bytes) = txn.identify(unit_id)?;
    let info: String = info_bytes.into_iter().filter(|b| b.is_ascii_graphic() || *b == b' ').map(|b| b as char).collect();
    drop(txn);

    if let Some((mut identity, _)) = self.cache.get(unit_id) {
      identity.last_identify_text = Some(info.clone());
      self.cache.upsert_identity(unit_id, identity);
    }

    Ok(IdentifyResult { slave_id, run_indicator, info })
  }

  /// Fire-and-forget: writes an identify-blink duration in seconds.
  /// `0` stops an in-progress blink. Retries are disabled to avoid a
  /// duplicate blink side effect.
  pub fn identify_for_duration(&self, unit_id: UnitId, seconds: u8) -> Result<(), ErrorKind> {
    let txn = self.arbiter.exclusive_transaction(None);
    txn.write_single_register(unit_id, IDENTIFY_DURATION_ADDR, seconds as u16)
  }

  /// Writes `alias` to RAM only (the command surface never commits to
  /// EEPROM implicitly — see [`CommandSurface::commit_to_eeprom`]).
  /// Updates the cached alias on success.
  pub fn write_alias(&self, unit_id: UnitId, alias: &str) -> Result<(), ErrorKind> {
    if alias.len() > register::ALIAS_MAX_LEN {
      return Err(ErrorKind::InvalidArgument(format!("alias longer than {} bytes", register::ALIAS_MAX_LEN)));
    }
    let (length, data_registers) = register::pack_alias(alias);

    let mut values = Vec::with_capacity(1 + data_registers.len());
    values.push(length as u16);
    values.extend(data_registers);

    let txn = self.arbiter.exclusive_transaction(None);
    txn.write_multiple_registers(unit_id, ALIAS_LENGTH_ADDR, values)?;
    drop(txn);

    self.cache.set_alias_local(unit_id, alias.to_string());
    Ok(())
  }

  /// Writes a new Unit-ID to RAM only. On success, renames the cache
  /// entry so subsequent lookups under the new id succeed.
  pub fn change_unit_id(&self, current: UnitId, new: UnitId) -> Result<(), ErrorKind> {
    let txn = self.arbiter.exclusive_transaction(None);
    txn.write_single_register(current, UNIT_ID_CONFIG_ADDR, new.value() as u16)?;
    drop(txn);

    self.cache.rename_unit(current, new)
  }

  /// Persists current RAM configuration on the slave by writing the
  /// commit magic value to the commit register.
  pub fn commit_to_eeprom(&self, unit_id: UnitId) -> Result<(), ErrorKind> {
    let txn = self.arbiter.exclusive_transaction(None);
    txn.write_single_register(unit_id, COMMIT_TO_EEPROM_ADDR, COMMIT_MAGIC)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bus::BusArbiter;
  use crate::frame::{crc, FunctionCode, Transport};
  use std::time::Duration;

  /// Always acknowledges a write with the address/count the request
  /// carried, mirroring a cooperative slave for the write-path tests
  /// below — the decode path is already covered by `frame::codec`'s
  /// own tests.
  struct AckingTransport;

  impl Transport for AckingTransport {
    fn transact(&mut self, frame: &[u8], _timeout: Duration) -> Result<Vec<u8>, ErrorKind> {
      let unit = frame[0];
      let function = frame[1];
      let mut response = vec![unit, function];
      if function == FunctionCode::WriteMultipleRegisters.code() {
        response.extend_from_slice(&frame[2..6]); // echo address + count
      } else {
        response.extend_from_slice(&frame[2..6]); // echo address + value
      }
      crc::push_crc(&mut response);
      Ok(response)
    }

    fn reconnect(&mut self) -> Result<(), ErrorKind> {
      Ok(())
    }
  }

  fn surface() -> CommandSurface {
    let arbiter = Arc::new(BusArbiter::new(Box::new(AckingTransport), Duration::from_millis(300)));
    let cache = Arc::new(IdentityCache::new(Duration::from_millis(300), Duration::from_secs(5), Duration::from_secs(60)));
    CommandSurface::new(arbiter, cache)
  }

  #[test]
  fn a_64_byte_alias_is_accepted() {
    let surface = surface();
    let alias = "x".repeat(register::ALIAS_MAX_LEN);
    assert!(surface.write_alias(UnitId::new(2).unwrap(), &alias).is_ok());
  }

  #[test]
  fn a_65_byte_alias_is_rejected_before_any_bus_traffic() {
    let surface = surface();
    let alias = "x".repeat(register::ALIAS_MAX_LEN + 1);
    assert!(matches!(surface.write_alias(UnitId::new(2).unwrap(), &alias), Err(ErrorKind::InvalidArgument(_))));
  }

  #[test]
  fn alias_write_updates_the_cached_alias_on_success() {
    let surface = surface();
    let unit_id = UnitId::new(2).unwrap();
    surface.cache.upsert_identity(unit_id, crate::identity::DeviceIdentity::new(unit_id, 0x4C6F, 0x0000));
    surface.write_alias(unit_id, "Tower_A").unwrap();
    let (identity, _) = surface.cache.get(unit_id).unwrap();
    assert_eq!(identity.alias, "Tower_A");
  }
}

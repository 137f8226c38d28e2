//! Inverse of [`super::decode`]: packs values back into registers for
//! writes (alias encode is the only non-trivial case; everything else
//! the command surface writes is already a plain `u16`).

/// Maximum alias length in bytes, per the register-map alias-length field.
pub const ALIAS_MAX_LEN: usize = 64;

/// Encodes `alias` into the `(length, data_registers)` shape the alias
/// write command sends: byte-padded to even length with `0x00`, packed
/// MSB-first two bytes per register. `alias` longer than
/// [`ALIAS_MAX_LEN`] is truncated; the caller is expected to have already
/// validated length and surfaced `ErrorKind::InvalidArgument` if it chose
/// not to truncate silently.
pub fn pack_alias(alias: &str) -> (u8, Vec<u16>) {
  let mut bytes: Vec<u8> = alias.bytes().take(ALIAS_MAX_LEN).collect();
  let length = bytes.len() as u8;
  if bytes.len() % 2 != 0 {
    bytes.push(0x00);
  }
  let registers = bytes.chunks_exact(2).map(|pair| ((pair[0] as u16) << 8) | pair[1] as u16).collect();
  (length, registers)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pack_alias_pads_odd_length_and_reports_unpadded_length() {
    let (length, registers) = pack_alias("Tower_A");
    assert_eq!(length, 7);
    assert_eq!(registers, vec![0x546F, 0x7765, 0x725F, 0x4100]);
  }

  #[test]
  fn pack_alias_even_length_needs_no_padding() {
    let (length, registers) = pack_alias("Tower");
    assert_eq!(length, 5);
    // "Tower" = 5 bytes, padded to 6 with one trailing 0x00.
    assert_eq!(registers, vec![0x546F, 0x7765, 0x7200]);
  }

  #[test]
  fn pack_alias_truncates_beyond_max_len() {
    let long = "x".repeat(ALIAS_MAX_LEN + 10);
    let (length, registers) = pack_alias(&long);
    assert_eq!(length as usize, ALIAS_MAX_LEN);
    assert_eq!(registers.len(), ALIAS_MAX_LEN / 2);
  }
}

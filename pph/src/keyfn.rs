//! Registry of byte-string key functions, identified by UUID.
//!
//! Every primitive maps `(bytes, multiplier, adjustment)` to a 64-bit value
//! and adds the adjustment after mixing. Not all primitives consume the
//! multiplier; the table still advances it to stay coprime with the header
//! count, and the secondary-hash search varies it per family entry.

use crate::spooky;

/// A key function, the first level of both the primary and secondary hashes.
pub type KeyFn = fn(&[u8], u64, u64) -> u64;

/// CRC-64/XZ.
pub const CRC64_UUID: &str = "F80F007A-26C3-4BD0-A481-24EE9AE94D01";
/// Multiplicative xor hash attributed to D. J. Bernstein; the default.
pub const DJB_UUID: &str = "BCC54D42-34F0-43FF-88EB-59C7B47EE210";
/// FNV-1a, 64 bit.
pub const FNV64A_UUID: &str = "87333E59-7C1A-4613-9C6F-81F1BB1F6AED";
/// Jenkins one-at-a-time.
pub const OAT_UUID: &str = "3AC2A805-6771-4189-8C62-5F41297126FE";
/// SpookyHash V2, 64 bit; the multiplier is used as the seed.
pub const SPOOKY_UUID: &str = "A647F03D-A02E-477F-9635-420F3BCEB394";

/// CRC-64/XZ checksum (reflected, init and xorout all ones).
pub fn crc64(key: &[u8], _multiplier: u64, adjustment: u64) -> u64 {
    const CRC: crc::Crc<u64> = crc::Crc::<u64>::new(&crc::CRC_64_XZ);
    CRC.checksum(key).wrapping_add(adjustment)
}

/// `h ← h·multiplier ⊕ byte`, starting from 0.
pub fn djb(key: &[u8], multiplier: u64, adjustment: u64) -> u64 {
    let mut h = 0u64;
    for &byte in key {
        h = h.wrapping_mul(multiplier) ^ byte as u64;
    }
    h.wrapping_add(adjustment)
}

/// FNV-1a with the standard 64-bit offset basis and prime.
pub fn fnv64a(key: &[u8], _multiplier: u64, adjustment: u64) -> u64 {
    let mut h = 0xCBF29CE484222325u64;
    for &byte in key {
        h ^= byte as u64;
        h = h.wrapping_mul(0x100000001B3);
    }
    h.wrapping_add(adjustment)
}

/// Jenkins one-at-a-time.
pub fn oat(key: &[u8], _multiplier: u64, adjustment: u64) -> u64 {
    let mut h = 0u64;
    for &byte in key {
        h = h.wrapping_add(byte as u64);
        h = h.wrapping_add(h << 10);
        h ^= h >> 6;
    }
    h = h.wrapping_add(h << 3);
    h ^= h >> 11;
    h = h.wrapping_add(h << 15);
    h.wrapping_add(adjustment)
}

/// SpookyHash V2 seeded with the multiplier.
pub fn spooky64(key: &[u8], multiplier: u64, adjustment: u64) -> u64 {
    spooky::hash64(key, multiplier).wrapping_add(adjustment)
}

/// Returns the key function registered under `uuid`, if any.
pub fn for_uuid(uuid: &str) -> Option<KeyFn> {
    match uuid {
        CRC64_UUID => Some(crc64),
        DJB_UUID => Some(djb),
        FNV64A_UUID => Some(fnv64a),
        OAT_UUID => Some(oat),
        SPOOKY_UUID => Some(spooky64),
        _ => None,
    }
}

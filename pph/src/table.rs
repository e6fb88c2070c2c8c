//! The two-level order-preserving perfect hash table.

use std::time::Instant;

use bitm::{BitAccess, BitVec};
use dyn_size_of::GetSize;

use crate::error::Error;
use crate::family::{Family, FamilyEntry};
use crate::keyfn::{self, KeyFn};
use crate::rng::XorShift1024Star;
use crate::utils::{gcd_binary, modulo, round_up_pow2};

/// Value returned by [`Table::find_val`] for keys outside the loaded set.
pub const EMPTY_VAL: u64 = u64::MAX;

/// Default loading factor `n / s` of the header array.
pub const DEFAULT_LOADING_FACTOR: f64 = 0.97;

/// Default multiplier of the key functions.
pub const HASH_MULTIPLIER: u64 = 65;

/// Default wall-clock budget of the per-bucket secondary-hash search.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Raw key hashes below `modulus * KEY_ADJUSTMENT_FACTOR` are lifted above
/// it, so the inner modulus fold acts on values much larger than the modulus.
const KEY_ADJUSTMENT_FACTOR: u64 = 10_000_000;

/// Failed candidates tolerated before the window size is increased.
const DEFAULT_ATTEMPTS: u64 = 100;

/// Free-slot marker in [`Slot::key`].
const FREE_KEY: u32 = u32::MAX;

/// Header of one primary bucket.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub(crate) struct Header {
    /// First slot of the bucket's window.
    pub p: u64,
    /// Index of the bucket's secondary hash in the family.
    pub i: u32,
    /// Window size; 0 if and only if the bucket is empty.
    pub r: u32,
}

impl GetSize for Header {}

/// One slot of the dense array.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Slot {
    /// Index of the stored key, or [`FREE_KEY`] for a free slot.
    pub key: u32,
    /// Caller-supplied payload, usually the key's rank in the input.
    pub val: u64,
    /// Primary bucket that placed the key; consulted only while relocating.
    pub owner: u32,
}

impl Slot {
    pub const FREE: Self = Self { key: FREE_KEY, val: 0, owner: 0 };

    #[inline(always)]
    pub fn is_free(&self) -> bool {
        self.key == FREE_KEY
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::FREE
    }
}

impl GetSize for Slot {}

/// Construction parameters accepted by [`Table::setup`].
///
/// See field descriptions for details.
#[derive(Clone, Debug)]
pub struct BuildConf {
    /// Target loading factor `p` of the header array. Values outside
    /// `(0, 1]` fall back to [`DEFAULT_LOADING_FACTOR`].
    pub loading_factor: f64,

    /// If `true` the header array has exactly `n / p` (truncated) buckets,
    /// which gives a more compact table; otherwise the count is rounded up
    /// to a power of two (making the primary reduction a mask) and `p` is
    /// recomputed. (default: `false`)
    pub exact_loading: bool,

    /// Wall-clock budget of the secondary-hash search, per bucket, in
    /// milliseconds. (default: [`DEFAULT_TIMEOUT_MS`])
    pub timeout_ms: u64,

    /// Seed of the candidate generator. Equal seeds reproduce equal tables.
    pub seed: u64,

    /// Multiplier of the top-level hash; advanced until coprime with the
    /// header count. (default: [`HASH_MULTIPLIER`])
    pub multiplier: u64,

    /// Adjustment added to the top-level hash. (default: 0)
    pub adjustment: u64,

    /// UUID of the key function; unknown UUIDs fall back to DJB.
    pub uuid: String,
}

impl Default for BuildConf {
    fn default() -> Self {
        Self {
            loading_factor: DEFAULT_LOADING_FACTOR,
            exact_loading: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            seed: 0,
            multiplier: HASH_MULTIPLIER,
            adjustment: 0,
            uuid: keyfn::DJB_UUID.to_string(),
        }
    }
}

impl BuildConf {
    /// Returns a configuration with the given `seed`.
    pub fn seed(seed: u64) -> Self {
        Self { seed, ..Default::default() }
    }

    /// Returns a configuration with the given `seed` and search budget.
    pub fn seed_timeout(seed: u64, timeout_ms: u64) -> Self {
        Self { seed, timeout_ms, ..Default::default() }
    }

    /// Returns a configuration with the given key-function `uuid`.
    pub fn uuid(uuid: &str) -> Self {
        Self { uuid: uuid.to_string(), ..Default::default() }
    }
}

/// Minimal order-preserving perfect hash table over a static set of
/// byte-string keys.
///
/// Construction follows the two-level scheme of Cormack, Horspool and
/// Kaiserswerth (*Practical perfect hashing*, The Computer Journal, 1985):
/// a primary hash selects a bucket of the header array, and a secondary
/// hash drawn from a family shared by all buckets places the bucket's keys
/// at pairwise distinct offsets of its window in the dense slot array.
///
/// [`Table::find_val`] returns the value supplied with the key at load
/// time, so loading keys with their ordinals makes lookups return ranks.
/// After [`Table::load`] (or [`Table::read`]) the table is read-only.
#[derive(Debug)]
pub struct Table {
    n: u64,
    p: f64,
    s: u64,
    headers: Box<[Header]>,
    slots: Vec<Slot>,
    keys: Vec<Box<[u8]>>,
    family: Family,
    uuid: String,
    keyfn: KeyFn,
    multiplier: u64,
    adjustment: u64,
    timeout_ms: u64,
    seed: u64,
    rng: XorShift1024Star,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            n: 0,
            p: DEFAULT_LOADING_FACTOR,
            s: 0,
            headers: Box::default(),
            slots: Vec::new(),
            keys: Vec::new(),
            family: Family::new(),
            uuid: keyfn::DJB_UUID.to_string(),
            keyfn: keyfn::djb,
            multiplier: HASH_MULTIPLIER,
            adjustment: 0,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            seed: 0,
            rng: XorShift1024Star::new(0),
        }
    }
}

impl Table {
    pub fn new() -> Self {
        Default::default()
    }

    /// Sizes the table for `n` keys and resets all construction state.
    /// Must be called before [`Table::load`].
    pub fn setup(&mut self, n: u64, conf: &BuildConf) {
        self.n = n;
        self.p = if conf.loading_factor > 1.0 || conf.loading_factor <= 0.0 {
            DEFAULT_LOADING_FACTOR
        } else {
            conf.loading_factor
        };
        let mut s = (n as f64 / self.p) as u64;
        if !conf.exact_loading {
            s = round_up_pow2(s + 1);
            self.p = n as f64 / s as f64;
        }
        self.s = s.max(1);
        self.multiplier = conf.multiplier;
        while gcd_binary(self.multiplier, self.s) != 1 {
            self.multiplier += 1;
        }
        self.adjustment = conf.adjustment;
        self.headers = vec![Header::default(); self.s as usize].into_boxed_slice();
        self.slots = vec![Slot::FREE; n as usize];
        self.keys = Vec::new();
        self.family = Family::new();
        self.timeout_ms = conf.timeout_ms;
        self.seed = conf.seed;
        self.rng = XorShift1024Star::new(conf.seed);
        self.set_uuid(&conf.uuid);
        log::debug!("sized for {} keys: {} buckets, loading factor {}", n, self.s, self.p);
    }

    /// UUID of the key function bound to the table.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Binds the key function registered under `uuid`.
    /// Unknown UUIDs fall back to DJB.
    pub fn set_uuid(&mut self, uuid: &str) {
        self.uuid = uuid.to_string();
        self.keyfn = match keyfn::for_uuid(uuid) {
            Some(f) => f,
            None => {
                log::warn!("unknown key function UUID {uuid:?}, falling back to DJB");
                keyfn::djb
            }
        };
    }

    /// Number of keys the table was sized for.
    pub fn len(&self) -> u64 {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Number of primary buckets.
    pub fn header_size(&self) -> u64 {
        self.s
    }

    /// Current loading factor `n / s`.
    pub fn loading_factor(&self) -> f64 {
        self.p
    }

    /// Current size of the dense slot array.
    pub fn num_slots(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Number of secondary hash functions, including the unused sentinel.
    pub fn family_size(&self) -> u64 {
        self.family.len() as u64
    }

    /// Keys stored in the table. After [`Table::read`] the order is the slot
    /// order of the file, not the original load order.
    pub fn keys(&self) -> &[Box<[u8]>] {
        &self.keys
    }

    /// Primary bucket of `key`.
    #[inline]
    pub fn bucket(&self, key: &[u8]) -> u64 {
        modulo((self.keyfn)(key, self.multiplier, self.adjustment), self.s)
    }

    /// Returns the value stored with `key`, or [`EMPTY_VAL`] if absent.
    ///
    /// A secondary hash may send an outside key onto an occupied slot, so
    /// the slot's key is always compared before its value is returned.
    pub fn find_val(&self, key: &[u8]) -> u64 {
        let Some(hdr) = self.headers.get(self.bucket(key) as usize) else {
            return EMPTY_VAL;
        };
        if hdr.r == 0 {
            return EMPTY_VAL;
        }
        let q = self.family.get(hdr.i).offset(self.keyfn, key, hdr.r as u64);
        let slot = &self.slots[(hdr.p + q) as usize];
        if !slot.is_free() && self.keys[slot.key as usize].as_ref() == key {
            slot.val
        } else {
            EMPTY_VAL
        }
    }

    /// Whether `val` is the miss sentinel.
    #[inline]
    pub const fn not_found(val: u64) -> bool {
        val == EMPTY_VAL
    }

    /// Value stored with `key` as an [`Option`].
    #[inline]
    pub fn get(&self, key: &[u8]) -> Option<u64> {
        match self.find_val(key) {
            EMPTY_VAL => None,
            val => Some(val),
        }
    }

    /// Moves `keys` into the table, inserts them with the paired `values`
    /// and re-checks every stored key.
    ///
    /// Values are typically `0..n`, which makes lookups return each key's
    /// rank in the input order. After a successful load the table is
    /// read-only.
    pub fn load(&mut self, keys: Vec<Box<[u8]>>, values: &[u64]) -> Result<(), Error> {
        if keys.len() != values.len() {
            return Err(Error::LengthMismatch);
        }
        if keys.iter().any(|key| key.is_empty()) {
            return Err(Error::EmptyKey);
        }
        self.keys = keys;
        for (j, &val) in values.iter().enumerate() {
            self.insert(j as u32, val)?;
        }
        self.verify()
    }

    /// Re-looks-up the key of every live slot and checks its stored value.
    /// Run automatically at the end of [`Table::load`].
    pub fn verify(&self) -> Result<(), Error> {
        for (x, slot) in self.slots.iter().enumerate() {
            if slot.is_free() {
                continue;
            }
            if self.find_val(&self.keys[slot.key as usize]) != slot.val {
                return Err(Error::SelfCheck(x as u64));
            }
        }
        Ok(())
    }

    fn insert(&mut self, key: u32, val: u64) -> Result<(), Error> {
        let b = self.bucket(&self.keys[key as usize]);
        let hdr = self.headers[b as usize];
        if hdr.r == 0 {
            let y = self.find_r(0, 1, 1)?;
            self.headers[b as usize] = Header { p: y, i: 0, r: 1 };
            self.slots[y as usize] = Slot { key, val, owner: b as u32 };
            return Ok(());
        }
        let (i, r) = self.find_h(hdr.p, hdr.r, key, b as u32)?;
        let y = self.find_r(hdr.p, hdr.r as u64, r as u64)?;
        self.move_nonoverlap(b as u32, hdr.p, y, hdr.r as u64, i, r as u64);
        let q = self.family.get(i).offset(self.keyfn, &self.keys[key as usize], r as u64);
        self.slots[(y + q) as usize] = Slot { key, val, owner: b as u32 };
        self.headers[b as usize] = Header { p: y, i, r };
        Ok(())
    }

    /// Searches for a secondary hash that maps the bucket's live members
    /// together with the incoming key to pairwise distinct offsets, first
    /// among the existing family members and then among fresh candidates.
    ///
    /// The window size starts at one above the current size and grows every
    /// [`DEFAULT_ATTEMPTS`] failed candidates, easing the pigeonhole
    /// pressure at the cost of a sparser window.
    fn find_h(&mut self, p: u64, r: u32, new_key: u32, bucket: u32) -> Result<(u32, u32), Error> {
        let started = Instant::now();
        let mut next_r = r as u64 + 1;

        // Live members of the current window. Tenants of other buckets
        // parked in free gaps stay where they are and are not rehashed.
        let mut members: Vec<u32> = Vec::with_capacity(r as usize + 1);
        members.push(new_key);
        for q in 0..r as u64 {
            let slot = &self.slots[(p + q) as usize];
            if !slot.is_free() && slot.owner == bucket {
                members.push(slot.key);
            }
        }

        for i in 1..self.family.len() as u32 {
            if !self.family.is_candidate(i, next_r) {
                continue;
            }
            if self.separates(&self.family.get(i), &members, next_r) {
                return Ok((i, next_r as u32));
            }
        }

        let mut attempts = 0u64;
        let mut trial = 0u64;
        loop {
            let lo = 2 * trial + 100 * next_r + 1;
            let span = (1u64 << 32).saturating_sub(lo);
            let mut modulus = if span == 0 { lo } else { lo + self.rng.next() % span };
            if modulus & 1 == 0 {
                modulus += 1;
            }

            let mut multiplier = self.multiplier;
            if multiplier & 1 == 0 {
                multiplier += 1;
            }
            while gcd_binary(multiplier, next_r) != 1 {
                multiplier += 2;
            }
            while gcd_binary(modulus, multiplier) != 1 {
                modulus += 2;
            }

            let floor = modulus * KEY_ADJUSTMENT_FACTOR;
            let mut adjustment = 0u64;
            for &key in &members {
                let raw = (self.keyfn)(&self.keys[key as usize], multiplier, 0);
                if raw < floor {
                    adjustment = adjustment.max(floor - raw);
                }
            }

            let entry = FamilyEntry { modulus, multiplier, adjustment };
            if self.separates(&entry, &members, next_r) {
                return Ok((self.family.push(entry), next_r as u32));
            }

            if started.elapsed().as_millis() as u64 > self.timeout_ms {
                log::debug!(
                    "bucket {bucket}: no separating hash for {} keys within {} ms",
                    members.len(),
                    self.timeout_ms
                );
                return Err(Error::BuildTimeout);
            }

            attempts += 1;
            if attempts >= DEFAULT_ATTEMPTS {
                next_r += 1;
                attempts = 0;
                log::trace!("bucket {bucket}: widening window to {next_r}");
            }
            trial += 1;
        }
    }

    /// Whether `entry` maps the keys of `members` to pairwise distinct
    /// offsets in `[0, r)`.
    fn separates(&self, entry: &FamilyEntry, members: &[u32], r: u64) -> bool {
        let mut used = Box::<[u64]>::with_zeroed_bits(r as usize);
        for &key in members {
            let q = entry.offset(self.keyfn, &self.keys[key as usize], r) as usize;
            if used.get_bit(q) {
                return false;
            }
            used.set_bit(q);
        }
        true
    }

    /// Finds a run of `newsize` free slots that does not overlap the window
    /// `[src, src + size)`: first strictly below `src`, then, after growing
    /// the slot array by `newsize`, strictly above the window. The appended
    /// tail guarantees the second scan succeeds.
    fn find_r(&mut self, src: u64, size: u64, newsize: u64) -> Result<u64, Error> {
        if src > newsize {
            for x in 0..src {
                if !self.slots[x as usize].is_free() {
                    continue;
                }
                let upper = (x + newsize).min(src);
                let free = self.slots[x as usize..upper as usize]
                    .iter()
                    .filter(|slot| slot.is_free())
                    .count() as u64;
                if free == newsize {
                    return Ok(x);
                }
            }
        }
        let grown = self.slots.len() as u64 + newsize;
        self.slots.resize(grown as usize, Slot::FREE);
        for x in src + size..grown {
            if !self.slots[x as usize].is_free() {
                continue;
            }
            let upper = (x + newsize).min(grown);
            let free = self.slots[x as usize..upper as usize]
                .iter()
                .filter(|slot| slot.is_free())
                .count() as u64;
            if free == newsize {
                return Ok(x);
            }
        }
        Err(Error::Allocator)
    }

    /// Relocates the bucket's live members from `[src, src + size)` to the
    /// window at `dst` under family member `i` at window size `r`. The two
    /// windows never overlap, so each source slot can be cleared right after
    /// the copy. Slots owned by other buckets stay in place.
    fn move_nonoverlap(&mut self, bucket: u32, src: u64, dst: u64, size: u64, i: u32, r: u64) {
        if src == dst {
            return;
        }
        let entry = self.family.get(i);
        for x in src..src + size {
            let slot = self.slots[x as usize];
            if slot.is_free() || slot.owner != bucket {
                continue;
            }
            let q = entry.offset(self.keyfn, &self.keys[slot.key as usize], r);
            self.slots[(dst + q) as usize] = slot;
            let old = &mut self.slots[x as usize];
            old.key = FREE_KEY;
            old.val = 0;
        }
    }

    // Accessors used by the serializer.

    pub(crate) fn parts(&self) -> TableParts<'_> {
        TableParts {
            n: self.n,
            p: self.p,
            s: self.s,
            headers: &self.headers,
            slots: &self.slots,
            keys: &self.keys,
            family: &self.family,
            uuid: &self.uuid,
            multiplier: self.multiplier,
            adjustment: self.adjustment,
            timeout_ms: self.timeout_ms,
            seed: self.seed,
        }
    }

    pub(crate) fn from_parts(
        n: u64,
        p: f64,
        s: u64,
        headers: Box<[Header]>,
        slots: Vec<Slot>,
        keys: Vec<Box<[u8]>>,
        family: Family,
        uuid: String,
        multiplier: u64,
        adjustment: u64,
        timeout_ms: u64,
        seed: u64,
    ) -> Self {
        let mut table = Self {
            n,
            p,
            s,
            headers,
            slots,
            keys,
            family,
            uuid: String::new(),
            keyfn: keyfn::djb,
            multiplier,
            adjustment,
            timeout_ms,
            seed,
            rng: XorShift1024Star::new(seed),
        };
        table.set_uuid(&uuid);
        table
    }
}

/// Borrowed view of the table state, consumed by the serializer.
pub(crate) struct TableParts<'a> {
    pub n: u64,
    pub p: f64,
    pub s: u64,
    pub headers: &'a [Header],
    pub slots: &'a [Slot],
    pub keys: &'a [Box<[u8]>],
    pub family: &'a Family,
    pub uuid: &'a str,
    pub multiplier: u64,
    pub adjustment: u64,
    pub timeout_ms: u64,
    pub seed: u64,
}

impl GetSize for Table {
    fn size_bytes_dyn(&self) -> usize {
        self.headers.size_bytes_dyn()
            + self.slots.size_bytes_dyn()
            + self.keys.size_bytes_dyn()
            + self.family.size_bytes_dyn()
            + self.uuid.capacity()
    }
    const USES_DYN_MEM: bool = true;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use test_log::test;

    pub fn boxed_keys<const N: usize>(keys: [&str; N]) -> Vec<Box<[u8]>> {
        keys.iter().map(|key| key.as_bytes().into()).collect()
    }

    pub fn build(keys: Vec<Box<[u8]>>, conf: &BuildConf) -> Result<Table, Error> {
        let values: Vec<u64> = (0..keys.len() as u64).collect();
        let mut table = Table::new();
        table.setup(keys.len() as u64, conf);
        table.load(keys, &values)?;
        Ok(table)
    }

    #[test]
    fn three_greek_keys() {
        let table = build(boxed_keys(["alpha", "beta", "gamma"]), &BuildConf::seed(1)).unwrap();
        assert_eq!(table.header_size(), 4);
        assert_eq!(table.find_val(b"alpha"), 0);
        assert_eq!(table.find_val(b"beta"), 1);
        assert_eq!(table.find_val(b"gamma"), 2);
        assert_eq!(table.find_val(b"delta"), EMPTY_VAL);
        assert!(Table::not_found(table.find_val(b"delta")));
        assert_eq!(table.get(b"beta"), Some(1));
        assert_eq!(table.get(b"delta"), None);
    }

    #[test]
    fn empty_input() {
        let table = build(Vec::new(), &BuildConf::seed(1)).unwrap();
        assert!(table.is_empty());
        assert!(Table::not_found(table.find_val(b"anything")));
        assert!(Table::not_found(table.find_val(b"")));
    }

    #[test]
    fn single_key() {
        let table = build(boxed_keys(["only"]), &BuildConf::seed(1)).unwrap();
        assert_eq!(table.header_size(), 2);
        assert_eq!(table.find_val(b"only"), 0);
        assert!(Table::not_found(table.find_val(b"other")));
    }

    #[test]
    fn primary_collision_grows_bucket() {
        // "a" and "e" share bucket 1 of the 4-bucket table built for two keys
        // under DJB with multiplier 65, so the second insert must rebuild the
        // bucket at window size 2.
        let table = build(boxed_keys(["a", "e"]), &BuildConf::seed(1)).unwrap();
        assert_eq!(table.header_size(), 4);
        assert_eq!(table.bucket(b"a"), table.bucket(b"e"));
        assert_eq!(table.find_val(b"a"), 0);
        assert_eq!(table.find_val(b"e"), 1);
        assert!(table.family_size() >= 2);
    }

    #[test]
    fn hundred_keys() {
        let keys: Vec<Box<[u8]>> = (0..100).map(|i| format!("k{i}").into_bytes().into_boxed_slice()).collect();
        let table = build(keys.clone(), &BuildConf::seed(1)).unwrap();
        for (j, key) in keys.iter().enumerate() {
            assert_eq!(table.find_val(key), j as u64);
        }
        assert!(table.num_slots() >= 100);
        assert!(table.family_size() >= 2);
        assert!(Table::not_found(table.find_val(b"k100")));
        assert!(Table::not_found(table.find_val(b"unrelated")));
    }

    #[test]
    fn values_need_not_be_ranks() {
        let keys = boxed_keys(["x", "y", "z"]);
        let mut table = Table::new();
        table.setup(3, &BuildConf::seed(1));
        table.load(keys, &[700, 800, 900]).unwrap();
        assert_eq!(table.find_val(b"x"), 700);
        assert_eq!(table.find_val(b"y"), 800);
        assert_eq!(table.find_val(b"z"), 900);
    }

    #[test]
    fn duplicate_keys_time_out() {
        let started = Instant::now();
        let err = build(boxed_keys(["x", "x"]), &BuildConf::seed_timeout(1, 200)).unwrap_err();
        assert!(matches!(err, Error::BuildTimeout));
        // The search must stop shortly after its budget, not loop forever.
        assert!(started.elapsed().as_millis() < 5_000);
    }

    #[test]
    fn equal_hash_keys_time_out() {
        // Distinct keys with equal DJB-65 hashes are as inseparable as
        // duplicates: every secondary hash sends both to the same offset.
        let a: &[u8] = b"\x22\x60";
        let b: &[u8] = b"#!";
        assert_eq!(keyfn::djb(a, 65, 0), keyfn::djb(b, 65, 0));
        let keys = vec![a.into(), b.into()];
        let values = [0, 1];
        let mut table = Table::new();
        table.setup(2, &BuildConf::seed_timeout(1, 200));
        let err = table.load(keys, &values).unwrap_err();
        assert!(matches!(err, Error::BuildTimeout));
    }

    #[test]
    fn crowded_bucket_escalates_window_size() {
        // All keys land in bucket 5 of the 16-bucket table sized for them,
        // so one bucket must repeatedly rebuild and widen its window.
        let keys = [
            "key2", "key13", "key20", "key31", "key46", "key57",
            "key64", "key75", "key103", "key112", "key121", "key130",
        ];
        let table = build(boxed_keys(keys), &BuildConf::seed(1)).unwrap();
        assert_eq!(table.header_size(), 16);
        for key in keys {
            assert_eq!(table.bucket(key.as_bytes()), 5);
        }
        for (j, key) in keys.iter().enumerate() {
            assert_eq!(table.find_val(key.as_bytes()), j as u64);
        }
        assert!(table.family_size() >= 2);
    }

    #[test]
    fn slot_and_family_growth_is_monotone() {
        let keys: Vec<Box<[u8]>> = (0..60).map(|i| format!("m{i}").into_bytes().into_boxed_slice()).collect();
        let mut table = Table::new();
        table.setup(60, &BuildConf::seed(3));
        let header_size = table.header_size();
        table.keys = keys;
        let mut slots = table.num_slots();
        let mut family = table.family_size();
        for j in 0..60u32 {
            table.insert(j, j as u64).unwrap();
            assert!(table.num_slots() >= slots);
            assert!(table.family_size() >= family);
            assert_eq!(table.header_size(), header_size);
            slots = table.num_slots();
            family = table.family_size();
        }
        table.verify().unwrap();
    }

    #[test]
    fn exact_loading_header_count() {
        let keys: Vec<Box<[u8]>> = (0..50).map(|i| format!("e{i}").into_bytes().into_boxed_slice()).collect();
        let conf = BuildConf { exact_loading: true, seed: 1, ..Default::default() };
        let table = build(keys.clone(), &conf).unwrap();
        // 50 / 0.97 truncates to 51
        assert_eq!(table.header_size(), 51);
        for (j, key) in keys.iter().enumerate() {
            assert_eq!(table.find_val(key), j as u64);
        }
    }

    #[test]
    fn bucket_is_deterministic() {
        let conf = BuildConf::seed(1);
        let mut a = Table::new();
        a.setup(3, &conf);
        let mut b = Table::new();
        b.setup(3, &conf);
        assert_eq!(a.bucket(b"alpha"), b.bucket(b"alpha"));
        assert_eq!(a.bucket(b"alpha"), 0);
    }

    #[test]
    fn equal_seeds_reproduce_equal_tables() {
        let keys: Vec<Box<[u8]>> = (0..40).map(|i| format!("r{i}").into_bytes().into_boxed_slice()).collect();
        let a = build(keys.clone(), &BuildConf::seed(9)).unwrap();
        let b = build(keys.clone(), &BuildConf::seed(9)).unwrap();
        assert_eq!(a.num_slots(), b.num_slots());
        assert_eq!(a.family_size(), b.family_size());
        assert_eq!(a.headers, b.headers);
        assert_eq!(a.slots, b.slots);
    }

    #[test]
    fn load_rejects_bad_input() {
        let mut table = Table::new();
        table.setup(2, &BuildConf::seed(1));
        assert!(matches!(
            table.load(boxed_keys(["a", "b"]), &[0]),
            Err(Error::LengthMismatch)
        ));
        let mut table = Table::new();
        table.setup(2, &BuildConf::seed(1));
        assert!(matches!(
            table.load(boxed_keys(["a", ""]), &[0, 1]),
            Err(Error::EmptyKey)
        ));
    }

    #[test]
    fn unknown_uuid_falls_back_to_djb() {
        let conf = BuildConf::uuid("00000000-0000-0000-0000-000000000000");
        let table = build(boxed_keys(["alpha", "beta"]), &conf).unwrap();
        assert_eq!(table.uuid(), "00000000-0000-0000-0000-000000000000");
        // Bucket computation matches a DJB-built table of the same shape.
        let djb = build(boxed_keys(["alpha", "beta"]), &BuildConf::default()).unwrap();
        assert_eq!(table.bucket(b"alpha"), djb.bucket(b"alpha"));
    }

    #[test]
    fn every_registered_primitive_builds() {
        for uuid in [
            keyfn::CRC64_UUID,
            keyfn::DJB_UUID,
            keyfn::FNV64A_UUID,
            keyfn::OAT_UUID,
            keyfn::SPOOKY_UUID,
        ] {
            let keys: Vec<Box<[u8]>> = (0..30).map(|i| format!("p{i}").into_bytes().into_boxed_slice()).collect();
            let conf = BuildConf { uuid: uuid.to_string(), seed: 5, ..Default::default() };
            let table = build(keys.clone(), &conf).expect(uuid);
            for (j, key) in keys.iter().enumerate() {
                assert_eq!(table.find_val(key), j as u64, "lookup under {uuid}");
            }
        }
    }

    #[test]
    fn header_windows_hold_distinct_offsets() {
        // Every live slot of every bucket must sit at the offset its
        // bucket's secondary hash assigns, with no two members colliding.
        let keys: Vec<Box<[u8]>> = (0..80).map(|i| format!("w{i}").into_bytes().into_boxed_slice()).collect();
        let table = build(keys, &BuildConf::seed(2)).unwrap();
        for (b, hdr) in table.headers.iter().enumerate() {
            if hdr.r == 0 {
                continue;
            }
            let mut seen = vec![false; hdr.r as usize];
            for q in 0..hdr.r as u64 {
                let slot = &table.slots[(hdr.p + q) as usize];
                if slot.is_free() || slot.owner != b as u32 {
                    continue;
                }
                let key = &table.keys[slot.key as usize];
                let offset = table.family.get(hdr.i).offset(table.keyfn, key, hdr.r as u64);
                assert_eq!(offset, q, "member stored off its hash offset");
                assert!(!seen[q as usize]);
                seen[q as usize] = true;
            }
        }
    }
}

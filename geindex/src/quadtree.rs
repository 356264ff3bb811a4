//! Quadtree paths, bucket paths and the slot addressing inside buckets.
//!
//! A [`QuadtreePath`] packs up to [`MAX_LEVEL`] quadrants two bits each,
//! left-aligned in a `u64`. Comparing `(bits, level)` lexicographically
//! yields preorder: a parent sorts before all of its descendants and
//! siblings sort by quadrant.
//!
//! Buckets cover [`QUAD_LEVELS_PER_BUCKET`] levels. An entry bucket rooted
//! at a [`BucketPath`] numbers its 85 slots in preorder of the 4-level
//! subtree, a child bucket numbers its 256 slots by the base-4 value of the
//! 4-level sub-path.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use smallvec::SmallVec;

use crate::errors::{GeIndexError, GeIndexResult};

/// Deepest quadtree level a path can address.
pub const MAX_LEVEL: u32 = 24;

/// Number of quadtree levels covered by one bucket.
pub const QUAD_LEVELS_PER_BUCKET: u32 = 4;

/// Slots of an entry bucket: 1 + 4 + 16 + 64.
pub const ENTRY_SLOTS_PER_BUCKET: usize = 85;

/// Slots of a child bucket: 4^4.
pub const CHILD_ADDRS_PER_BUCKET: usize = 256;

/// Number of entry slots spanned by one quadrant at sub-depth 0, 1 and 2.
const ENTRY_SLOT_SPACING: [usize; 3] = [21, 5, 1];

/// A path from the quadtree root, one quadrant (0..=3) per level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QuadtreePath {
    bits: u64,
    level: u32,
}

impl QuadtreePath {
    /// The root path (level 0).
    pub const fn root() -> Self {
        Self { bits: 0, level: 0 }
    }

    pub fn from_quadrants(quadrants: &[u8]) -> GeIndexResult<Self> {
        if quadrants.len() > MAX_LEVEL as usize {
            return Err(GeIndexError::usage(format!(
                "quadtree path of {} levels exceeds max level {}",
                quadrants.len(),
                MAX_LEVEL
            )));
        }
        let mut path = Self::root();
        for &q in quadrants {
            if q > 3 {
                return Err(GeIndexError::usage(format!("invalid quadrant {}", q)));
            }
            path = path.child(q);
        }
        Ok(path)
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_root(&self) -> bool {
        self.level == 0
    }

    fn shift(depth: u32) -> u32 {
        62 - 2 * depth
    }

    /// Quadrant taken at `depth` (0-based, `depth < level`).
    pub fn quadrant(&self, depth: u32) -> u8 {
        debug_assert!(depth < self.level);
        ((self.bits >> Self::shift(depth)) & 0x3) as u8
    }

    /// Path one level deeper through quadrant `q`.
    ///
    /// Panics when called on a path already at [`MAX_LEVEL`].
    pub fn child(&self, q: u8) -> Self {
        assert!(self.level < MAX_LEVEL, "quadtree path already at max level");
        Self {
            bits: self.bits | (u64::from(q & 0x3) << Self::shift(self.level)),
            level: self.level + 1,
        }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            None
        } else {
            Some(self.truncated(self.level - 1))
        }
    }

    /// The ancestor of this path at `level` (itself when `level >= self.level`).
    pub fn truncated(&self, level: u32) -> Self {
        if level >= self.level {
            return *self;
        }
        let mask = if level == 0 {
            0
        } else {
            !0u64 << (64 - 2 * level)
        };
        Self {
            bits: self.bits & mask,
            level,
        }
    }

    /// True when `self` is `other` or one of its ancestors.
    pub fn is_ancestor_of(&self, other: &QuadtreePath) -> bool {
        self.level <= other.level && other.truncated(self.level) == *self
    }

    pub fn quadrants(&self) -> SmallVec<[u8; 24]> {
        (0..self.level).map(|d| self.quadrant(d)).collect()
    }
}

impl Ord for QuadtreePath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bits
            .cmp(&other.bits)
            .then_with(|| self.level.cmp(&other.level))
    }
}

impl PartialOrd for QuadtreePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for QuadtreePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.level == 0 {
            return write!(f, "<root>");
        }
        for d in 0..self.level {
            write!(f, "{}", self.quadrant(d))?;
        }
        Ok(())
    }
}

impl FromStr for QuadtreePath {
    type Err = GeIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let quadrants = s
            .bytes()
            .map(|b| match b {
                b'0'..=b'3' => Ok(b - b'0'),
                _ => Err(GeIndexError::usage(format!(
                    "invalid character '{}' in quadtree path '{}'",
                    b as char, s
                ))),
            })
            .collect::<GeIndexResult<SmallVec<[u8; 24]>>>()?;
        Self::from_quadrants(&quadrants)
    }
}

/// A quadtree path truncated to a multiple of [`QUAD_LEVELS_PER_BUCKET`]
/// levels. Addresses one on-disk bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BucketPath(QuadtreePath);

impl BucketPath {
    pub const fn root() -> Self {
        Self(QuadtreePath::root())
    }

    /// The bucket whose entry slots hold `path`.
    pub fn containing(path: &QuadtreePath) -> Self {
        let level = path.level() - path.level() % QUAD_LEVELS_PER_BUCKET;
        Self(path.truncated(level))
    }

    pub fn path(&self) -> &QuadtreePath {
        &self.0
    }

    pub fn level(&self) -> u32 {
        self.0.level()
    }

    /// Bucket depth counted in buckets (root = 0).
    pub fn bucket_depth(&self) -> u32 {
        self.0.level() / QUAD_LEVELS_PER_BUCKET
    }

    pub fn is_root(&self) -> bool {
        self.0.is_root()
    }

    /// The child bucket holding this bucket's address.
    pub fn parent(&self) -> Option<BucketPath> {
        if self.is_root() {
            None
        } else {
            Some(Self(self.0.truncated(self.level() - QUAD_LEVELS_PER_BUCKET)))
        }
    }

    /// The ancestor bucket at `bucket_depth` (itself when deeper or equal).
    pub fn ancestor_at_depth(&self, bucket_depth: u32) -> BucketPath {
        Self(self.0.truncated(bucket_depth * QUAD_LEVELS_PER_BUCKET))
    }

    /// Slot holding this bucket in its parent child bucket.
    pub fn slot_in_parent(&self) -> usize {
        debug_assert!(!self.is_root());
        let base = self.level() - QUAD_LEVELS_PER_BUCKET;
        (base..self.level()).fold(0usize, |acc, d| acc * 4 + self.0.quadrant(d) as usize)
    }

    /// Child-bucket slot of a descendant at least one bucket deeper.
    pub fn child_slot_of(&self, path: &QuadtreePath) -> usize {
        debug_assert!(path.level() >= self.level() + QUAD_LEVELS_PER_BUCKET);
        debug_assert!(self.0.is_ancestor_of(path));
        let base = self.level();
        (base..base + QUAD_LEVELS_PER_BUCKET)
            .fold(0usize, |acc, d| acc * 4 + path.quadrant(d) as usize)
    }

    /// The bucket one hop below this one at child slot `slot`.
    pub fn child(&self, slot: usize) -> BucketPath {
        debug_assert!(slot < CHILD_ADDRS_PER_BUCKET);
        let mut path = self.0;
        for shift in [6u32, 4, 2, 0] {
            path = path.child(((slot >> shift) & 0x3) as u8);
        }
        Self(path)
    }

    /// The bucket one hop below this one on the way to `path`.
    pub fn child_toward(&self, path: &QuadtreePath) -> BucketPath {
        Self(path.truncated(self.level() + QUAD_LEVELS_PER_BUCKET))
    }

    /// Entry slot of `path` inside this bucket.
    pub fn entry_slot_of(&self, path: &QuadtreePath) -> usize {
        debug_assert_eq!(BucketPath::containing(path), *self);
        let quadrants: SmallVec<[u8; 3]> =
            (self.level()..path.level()).map(|d| path.quadrant(d)).collect();
        sub_addr_as_entry_slot(&quadrants)
    }

    /// Full path addressed by entry slot `slot` of this bucket.
    pub fn entry_slot_path(&self, slot: usize) -> QuadtreePath {
        entry_slot_as_sub_addr(slot)
            .iter()
            .fold(self.0, |path, &q| path.child(q))
    }
}

impl Display for BucketPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "bucket({})", self.0)
    }
}

/// Preorder slot number of a bucket-relative sub-path of depth 0..=3.
pub fn sub_addr_as_entry_slot(quadrants: &[u8]) -> usize {
    debug_assert!(quadrants.len() < QUAD_LEVELS_PER_BUCKET as usize);
    quadrants.len()
        + quadrants
            .iter()
            .zip(ENTRY_SLOT_SPACING.iter())
            .map(|(&q, &spacing)| q as usize * spacing)
            .sum::<usize>()
}

/// Inverse of [`sub_addr_as_entry_slot`].
pub fn entry_slot_as_sub_addr(slot: usize) -> SmallVec<[u8; 3]> {
    debug_assert!(slot < ENTRY_SLOTS_PER_BUCKET);
    let mut quadrants = SmallVec::new();
    let mut remaining = slot;
    for spacing in ENTRY_SLOT_SPACING {
        if remaining == 0 {
            break;
        }
        remaining -= 1;
        quadrants.push((remaining / spacing) as u8);
        remaining %= spacing;
    }
    quadrants
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qt(s: &str) -> QuadtreePath {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(qt("").level(), 0);
        assert_eq!(qt("0123").level(), 4);
        assert_eq!(qt("0123").to_string(), "0123");
        assert_eq!(QuadtreePath::root().to_string(), "<root>");
        assert!("0124".parse::<QuadtreePath>().is_err());
        assert!("0".repeat(25).parse::<QuadtreePath>().is_err());
        assert_eq!(qt(&"3".repeat(24)).level(), 24);
    }

    #[test]
    fn test_preorder_ordering() {
        let ordered = ["", "0", "00", "000", "001", "01", "012", "0123", "02", "1", "3", "33"];
        for pair in ordered.windows(2) {
            assert!(qt(pair[0]) < qt(pair[1]), "{} < {}", pair[0], pair[1]);
        }
        assert!(qt("00000000") < qt("00001"));
        assert!(qt("0000123") > qt("00000000"));
    }

    #[test]
    fn test_parent_truncate_ancestor() {
        let path = qt("0123");
        assert_eq!(path.parent(), Some(qt("012")));
        assert_eq!(path.truncated(1), qt("0"));
        assert_eq!(path.truncated(0), QuadtreePath::root());
        assert_eq!(path.truncated(9), path);
        assert!(qt("01").is_ancestor_of(&path));
        assert!(path.is_ancestor_of(&path));
        assert!(!qt("02").is_ancestor_of(&path));
        assert_eq!(QuadtreePath::root().parent(), None);
    }

    #[test]
    fn test_bucket_path_containing() {
        assert!(BucketPath::containing(&qt("012")).is_root());
        let bucket = BucketPath::containing(&qt("0123012"));
        assert_eq!(*bucket.path(), qt("0123"));
        assert_eq!(bucket.bucket_depth(), 1);
        assert_eq!(bucket.parent(), Some(BucketPath::root()));
        assert_eq!(bucket.slot_in_parent(), 0b00_01_10_11);
    }

    #[test]
    fn test_child_slot_round_trip() {
        let root = BucketPath::root();
        for slot in [0usize, 1, 27, 128, 255] {
            let child = root.child(slot);
            assert_eq!(child.level(), 4);
            assert_eq!(child.slot_in_parent(), slot);
            assert_eq!(root.child_slot_of(child.path()), slot);
            assert_eq!(root.child_toward(&child.path().child(2)), child);
        }
    }

    #[test]
    fn test_entry_slot_formula_preorder() {
        assert_eq!(sub_addr_as_entry_slot(&[]), 0);
        assert_eq!(sub_addr_as_entry_slot(&[0]), 1);
        assert_eq!(sub_addr_as_entry_slot(&[0, 0]), 2);
        assert_eq!(sub_addr_as_entry_slot(&[0, 0, 0]), 3);
        assert_eq!(sub_addr_as_entry_slot(&[0, 1]), 7);
        assert_eq!(sub_addr_as_entry_slot(&[1]), 22);
        assert_eq!(sub_addr_as_entry_slot(&[3, 3, 3]), 84);
    }

    #[test]
    fn test_entry_slot_bijection() {
        let mut seen = vec![false; ENTRY_SLOTS_PER_BUCKET];
        for slot in 0..ENTRY_SLOTS_PER_BUCKET {
            let sub = entry_slot_as_sub_addr(slot);
            assert!(sub.len() < 4);
            assert_eq!(sub_addr_as_entry_slot(&sub), slot);
            seen[slot] = true;
        }
        assert!(seen.iter().all(|s| *s));

        // every sub-path of depth 0..=3 maps to a distinct slot
        let bucket = BucketPath::containing(&qt("2103"));
        let mut paths = vec![*bucket.path()];
        let mut frontier = vec![*bucket.path()];
        for _ in 0..3 {
            frontier = frontier
                .iter()
                .flat_map(|p| (0..4).map(move |q| p.child(q)))
                .collect();
            paths.extend(frontier.iter().copied());
        }
        assert_eq!(paths.len(), ENTRY_SLOTS_PER_BUCKET);
        for path in paths {
            let slot = bucket.entry_slot_of(&path);
            assert_eq!(bucket.entry_slot_path(slot), path);
        }
    }

    #[test]
    fn test_entry_slot_order_is_preorder() {
        let bucket = BucketPath::root();
        let paths: Vec<_> = (0..ENTRY_SLOTS_PER_BUCKET)
            .map(|slot| bucket.entry_slot_path(slot))
            .collect();
        for pair in paths.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}

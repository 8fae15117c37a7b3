//! CPU sets and their bitmask form.
//!
//! A `CpuSet` is a set of CPU indices. Its bitmask form, `CpuMask`, has bit
//! `i` set exactly when CPU `i` is a member. Masks are not limited to a
//! machine word: they are stored as little-endian `u64` words, so the
//! conversion between the two forms is exact for any index.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use crate::error::{Error, Result};

const WORD_BITS: usize = u64::BITS as usize;

/// Widest range a single cpulist item may name.
pub const MAX_CPULIST_RANGE: usize = 1 << 16;

/// An unbounded-width CPU bitmask.
///
/// Masks are kept normalized (no trailing zero words), so two masks with the
/// same bits always compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuMask {
    words: Vec<u64>,
}

impl CpuMask {
    /// The empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mask with only bit `index` set, i.e. `1 << index`.
    pub fn bit(index: usize) -> Self {
        let mut mask = Self::new();
        mask.set(index);
        mask
    }

    /// Build a mask from little-endian words.
    pub fn from_words(words: impl Into<Vec<u64>>) -> Self {
        let mut mask = Self {
            words: words.into(),
        };
        mask.normalize();
        mask
    }

    /// The little-endian words of this mask, without trailing zero words.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Set bit `index`.
    pub fn set(&mut self, index: usize) {
        let (word, bit) = (index / WORD_BITS, index % WORD_BITS);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << bit;
    }

    /// Check whether bit `index` is set.
    pub fn test(&self, index: usize) -> bool {
        self.words
            .get(index / WORD_BITS)
            .is_some_and(|w| w & (1 << (index % WORD_BITS)) != 0)
    }

    /// Check whether no bit is set.
    pub fn is_zero(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of significant bits (index of the highest set bit plus one).
    pub fn bit_len(&self) -> usize {
        match self.words.last() {
            Some(last) => {
                (self.words.len() - 1) * WORD_BITS + (WORD_BITS - last.leading_zeros() as usize)
            }
            None => 0,
        }
    }

    /// The mask as a `u64`, if it fits.
    pub fn to_u64(&self) -> Option<u64> {
        match self.words.as_slice() {
            [] => Some(0),
            [w] => Some(*w),
            _ => None,
        }
    }

    /// The mask as a `u128`, if it fits.
    pub fn to_u128(&self) -> Option<u128> {
        match self.words.as_slice() {
            [] => Some(0),
            [lo] => Some(*lo as u128),
            [lo, hi] => Some((*hi as u128) << 64 | *lo as u128),
            _ => None,
        }
    }

    /// Iterate over the indices of set bits in ascending order.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            (0..WORD_BITS)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| i * WORD_BITS + bit)
        })
    }

    fn normalize(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl From<u64> for CpuMask {
    fn from(value: u64) -> Self {
        Self::from_words(vec![value])
    }
}

impl From<u128> for CpuMask {
    fn from(value: u128) -> Self {
        Self::from_words(vec![value as u64, (value >> 64) as u64])
    }
}

impl BitOrAssign<&CpuMask> for CpuMask {
    fn bitor_assign(&mut self, rhs: &CpuMask) {
        if self.words.len() < rhs.words.len() {
            self.words.resize(rhs.words.len(), 0);
        }
        for (lhs, rhs) in self.words.iter_mut().zip(&rhs.words) {
            *lhs |= rhs;
        }
    }
}

impl BitOr for CpuMask {
    type Output = CpuMask;

    fn bitor(mut self, rhs: CpuMask) -> CpuMask {
        self |= &rhs;
        self
    }
}

impl fmt::LowerHex for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(f, "0x")?;
        }
        match self.words.split_last() {
            None => write!(f, "0"),
            Some((last, rest)) => {
                write!(f, "{:x}", last)?;
                for word in rest.iter().rev() {
                    write!(f, "{:016x}", word)?;
                }
                Ok(())
            }
        }
    }
}

/// A set of CPU indices.
///
/// Element order is irrelevant; iteration is always ascending.
///
/// # Examples
///
/// ```
/// use strand_core::{CpuMask, CpuSet};
///
/// let cpus: CpuSet = [0, 3, 2].into_iter().collect();
/// assert_eq!(cpus.to_string(), "0,2-3");
/// assert_eq!(cpus.to_bitmask(), CpuMask::from(0b1101u64));
///
/// let wide = CpuSet::from_mask(CpuMask::bit(130));
/// assert!(wide.contains(130));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<usize>", into = "Vec<usize>")]
pub struct CpuSet {
    cpus: BTreeSet<usize>,
}

impl CpuSet {
    /// Create an empty CPU set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a CPU set from a bitmask: bit `i` set means CPU `i` is present.
    pub fn from_mask(mask: impl Into<CpuMask>) -> Self {
        mask.into().ones().collect()
    }

    /// The bitmask form of this set: the OR of `1 << i` for every member `i`.
    pub fn to_bitmask(&self) -> CpuMask {
        let mut mask = CpuMask::new();
        for &cpu in &self.cpus {
            mask.set(cpu);
        }
        mask
    }

    /// Add a CPU index, validating that it is a non-negative integer.
    pub fn add<I>(&mut self, cpu: I) -> Result<()>
    where
        I: TryInto<usize> + fmt::Display + Copy,
    {
        let index = cpu
            .try_into()
            .map_err(|_| Error::Range(format!("invalid CPU index {}", cpu)))?;
        self.cpus.insert(index);
        Ok(())
    }

    /// Insert a CPU index, returning whether it was newly added.
    pub fn insert(&mut self, cpu: usize) -> bool {
        self.cpus.insert(cpu)
    }

    /// Remove a CPU index, returning whether it was present.
    pub fn remove(&mut self, cpu: usize) -> bool {
        self.cpus.remove(&cpu)
    }

    /// Check whether a CPU index is a member.
    pub fn contains(&self, cpu: usize) -> bool {
        self.cpus.contains(&cpu)
    }

    /// Number of CPUs in the set.
    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    /// Check whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    /// Highest CPU index in the set.
    pub fn max(&self) -> Option<usize> {
        self.cpus.last().copied()
    }

    /// Iterate over members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.cpus.iter().copied()
    }

    /// Members of either set.
    pub fn union(&self, other: &CpuSet) -> CpuSet {
        self.cpus.union(&other.cpus).copied().collect()
    }

    /// Members of both sets.
    pub fn intersection(&self, other: &CpuSet) -> CpuSet {
        self.cpus.intersection(&other.cpus).copied().collect()
    }

    /// Check whether every member of this set is in `other`.
    pub fn is_subset(&self, other: &CpuSet) -> bool {
        self.cpus.is_subset(&other.cpus)
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        Self {
            cpus: iter.into_iter().collect(),
        }
    }
}

impl Extend<usize> for CpuSet {
    fn extend<T: IntoIterator<Item = usize>>(&mut self, iter: T) {
        self.cpus.extend(iter);
    }
}

impl<'a> IntoIterator for &'a CpuSet {
    type Item = usize;
    type IntoIter = std::iter::Copied<std::collections::btree_set::Iter<'a, usize>>;

    fn into_iter(self) -> Self::IntoIter {
        self.cpus.iter().copied()
    }
}

impl From<CpuMask> for CpuSet {
    fn from(mask: CpuMask) -> Self {
        Self::from_mask(mask)
    }
}

impl From<Vec<usize>> for CpuSet {
    fn from(cpus: Vec<usize>) -> Self {
        cpus.into_iter().collect()
    }
}

impl From<&[usize]> for CpuSet {
    fn from(cpus: &[usize]) -> Self {
        cpus.iter().copied().collect()
    }
}

impl<const N: usize> From<[usize; N]> for CpuSet {
    fn from(cpus: [usize; N]) -> Self {
        cpus.into_iter().collect()
    }
}

impl From<BTreeSet<usize>> for CpuSet {
    fn from(cpus: BTreeSet<usize>) -> Self {
        Self { cpus }
    }
}

impl From<HashSet<usize>> for CpuSet {
    fn from(cpus: HashSet<usize>) -> Self {
        cpus.into_iter().collect()
    }
}

impl From<CpuSet> for Vec<usize> {
    fn from(set: CpuSet) -> Self {
        set.cpus.into_iter().collect()
    }
}

/// Formats the set in the Linux cpulist style, e.g. `0-3,8,10-11`.
impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.cpus.iter().copied().peekable();
        let mut first = true;
        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }
        Ok(())
    }
}

impl FromStr for CpuSet {
    type Err = Error;

    /// Parse the kernel's cpulist format, e.g. `0-3,8,10-11`.
    ///
    /// Fails with `Error::Range` on malformed input and on any range
    /// spanning more than [`MAX_CPULIST_RANGE`] CPUs.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Range(format!("invalid CPU list {:?}", s));
        let mut set = CpuSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: usize = lo.trim().parse().map_err(|_| invalid())?;
                    let hi: usize = hi.trim().parse().map_err(|_| invalid())?;
                    if lo > hi {
                        return Err(invalid());
                    }
                    if hi - lo >= MAX_CPULIST_RANGE {
                        return Err(Error::Range(format!(
                            "CPU range {} spans more than {} CPUs",
                            part, MAX_CPULIST_RANGE
                        )));
                    }
                    set.extend(lo..=hi);
                }
                None => {
                    set.insert(part.parse().map_err(|_| invalid())?);
                }
            }
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(set: &CpuSet) -> Vec<usize> {
        set.iter().collect()
    }

    #[test]
    fn test_initialisation_from_iterables() {
        assert_eq!(sorted(&CpuSet::new()), Vec::<usize>::new());
        assert_eq!(sorted(&CpuSet::from([0, 3, 2])), vec![0, 2, 3]);
        assert_eq!(sorted(&CpuSet::from(vec![5, 5, 1])), vec![1, 5]);

        let hashed: HashSet<usize> = [7, 1].into_iter().collect();
        assert_eq!(sorted(&CpuSet::from(hashed)), vec![1, 7]);
    }

    #[test]
    fn test_initialisation_from_bitmasks() {
        let cases: [(u64, &[usize]); 8] = [
            (0, &[]),
            (1, &[0]),
            (2, &[1]),
            (3, &[0, 1]),
            (4, &[2]),
            (5, &[0, 2]),
            (6, &[1, 2]),
            (7, &[0, 1, 2]),
        ];
        for (mask, expected) in cases {
            assert_eq!(sorted(&CpuSet::from_mask(mask)), expected);
        }

        assert_eq!(sorted(&CpuSet::from_mask(1u64 << 7)), vec![7]);
        assert_eq!(sorted(&CpuSet::from_mask(1u128 << 127)), vec![127]);
        assert_eq!(sorted(&CpuSet::from_mask(CpuMask::bit(128))), vec![128]);
    }

    #[test]
    fn test_to_bitmask_small_values() {
        assert!(CpuSet::new().to_bitmask().is_zero());
        for i in 0u64..100 {
            assert_eq!(CpuSet::from_mask(i).to_bitmask().to_u64(), Some(i));
        }
    }

    #[test]
    fn test_bitmask_round_trip_beyond_word_width() {
        let mut mask = CpuMask::new();
        for i in (0..=200).step_by(3) {
            mask |= &CpuMask::bit(i);
            assert_eq!(CpuSet::from_mask(mask.clone()).to_bitmask(), mask);
        }
        assert_eq!(mask.bit_len(), 199);
        assert!(mask.to_u128().is_none());
    }

    #[test]
    fn test_mask_normalization() {
        assert_eq!(CpuMask::from_words(vec![5, 0, 0]), CpuMask::from(5u64));
        assert_eq!(CpuMask::from(0u128), CpuMask::new());
        assert_eq!(CpuMask::from(u128::MAX).to_u128(), Some(u128::MAX));
        assert_eq!(format!("{:#x}", CpuMask::bit(64)), "0x10000000000000000");
    }

    #[test]
    fn test_add_validates_index() {
        let mut set = CpuSet::new();
        set.add(3u8).unwrap();
        set.add(4i64).unwrap();
        assert!(matches!(set.add(-1i64), Err(Error::Range(_))));
        assert_eq!(sorted(&set), vec![3, 4]);
    }

    #[test]
    fn test_cpulist_format() {
        let set: CpuSet = "0-3, 8,10-11".parse().unwrap();
        assert_eq!(sorted(&set), vec![0, 1, 2, 3, 8, 10, 11]);
        assert_eq!(set.to_string(), "0-3,8,10-11");
        assert_eq!("".parse::<CpuSet>().unwrap(), CpuSet::new());
        assert!("3-1".parse::<CpuSet>().is_err());
        assert!("x".parse::<CpuSet>().is_err());
    }

    #[test]
    fn test_cpulist_rejects_huge_ranges() {
        assert!(matches!(
            "0-18446744073709551615".parse::<CpuSet>(),
            Err(Error::Range(_))
        ));
        let widest = format!("0-{}", MAX_CPULIST_RANGE - 1);
        assert_eq!(widest.parse::<CpuSet>().unwrap().len(), MAX_CPULIST_RANGE);
        let too_wide = format!("0-{}", MAX_CPULIST_RANGE);
        assert!(matches!(too_wide.parse::<CpuSet>(), Err(Error::Range(_))));
    }

    #[test]
    fn test_set_operations() {
        let a = CpuSet::from([0, 1, 2]);
        let b = CpuSet::from([2, 3]);
        assert_eq!(a.union(&b), CpuSet::from([0, 1, 2, 3]));
        assert_eq!(a.intersection(&b), CpuSet::from([2]));
        assert!(CpuSet::from([1, 2]).is_subset(&a));
        assert!(!b.is_subset(&a));
        assert_eq!(a.max(), Some(2));
    }

    #[test]
    fn test_serde_as_sorted_list() {
        let set = CpuSet::from([4, 1]);
        assert_eq!(serde_json::to_string(&set).unwrap(), "[1,4]");
        let back: CpuSet = serde_json::from_str("[4,1,1]").unwrap();
        assert_eq!(back, set);
    }
}

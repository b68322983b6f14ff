//! Unordered document sets.
//!
//! A bitset over composite document ids `0..max_doc`. Sets produced by one
//! searcher are only meaningful against that searcher's id space.

use std::fmt;

/// A set of composite document ids.
#[derive(Clone, PartialEq, Eq)]
pub struct DocSet {
    words: Vec<u64>,
    max_doc: u32,
    len: usize,
}

impl DocSet {
    pub fn empty(max_doc: u32) -> Self {
        Self {
            words: vec![0; words_for(max_doc)],
            max_doc,
            len: 0,
        }
    }

    /// Every id in `0..max_doc`.
    pub fn full(max_doc: u32) -> Self {
        Self::from_docs(max_doc, 0..max_doc)
    }

    /// Build from ids; ids `>= max_doc` are ignored.
    pub fn from_docs(max_doc: u32, docs: impl IntoIterator<Item = u32>) -> Self {
        let mut set = Self::empty(max_doc);
        for doc in docs {
            set.insert(doc);
        }
        set
    }

    /// Returns true if the id was newly added.
    pub fn insert(&mut self, doc: u32) -> bool {
        if doc >= self.max_doc {
            return false;
        }
        let (word, bit) = slot(doc);
        let added = self.words[word] & bit == 0;
        if added {
            self.words[word] |= bit;
            self.len += 1;
        }
        added
    }

    pub fn contains(&self, doc: u32) -> bool {
        if doc >= self.max_doc {
            return false;
        }
        let (word, bit) = slot(doc);
        self.words[word] & bit != 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    /// Ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let base = (i as u32) * 64;
            BitIter(word).map(move |bit| base + bit)
        })
    }

    pub fn intersection(&self, other: &DocSet) -> DocSet {
        self.combine(other, |a, b| a & b)
    }

    pub fn union(&self, other: &DocSet) -> DocSet {
        self.combine(other, |a, b| a | b)
    }

    /// Ids in `self` but not in `other`.
    pub fn and_not(&self, other: &DocSet) -> DocSet {
        self.combine(other, |a, b| a & !b)
    }

    pub fn intersection_size(&self, other: &DocSet) -> usize {
        self.words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| (a & b).count_ones() as usize)
            .sum()
    }

    fn combine(&self, other: &DocSet, op: impl Fn(u64, u64) -> u64) -> DocSet {
        let max_doc = self.max_doc.max(other.max_doc);
        let mut words = vec![0u64; words_for(max_doc)];
        for (i, word) in words.iter_mut().enumerate() {
            let a = self.words.get(i).copied().unwrap_or(0);
            let b = other.words.get(i).copied().unwrap_or(0);
            *word = op(a, b);
        }
        let len = words.iter().map(|w| w.count_ones() as usize).sum();
        DocSet {
            words,
            max_doc,
            len,
        }
    }
}

impl fmt::Debug for DocSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocSet")
            .field("len", &self.len)
            .field("max_doc", &self.max_doc)
            .finish()
    }
}

fn words_for(max_doc: u32) -> usize {
    (max_doc as usize).div_ceil(64)
}

fn slot(doc: u32) -> (usize, u64) {
    ((doc / 64) as usize, 1u64 << (doc % 64))
}

struct BitIter(u64);

impl Iterator for BitIter {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.0 == 0 {
            return None;
        }
        let bit = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_and_contains() {
        let mut set = DocSet::empty(130);
        assert!(set.insert(0));
        assert!(set.insert(64));
        assert!(set.insert(129));
        assert!(!set.insert(64));
        assert!(!set.insert(130));

        assert_eq!(set.len(), 3);
        assert!(set.contains(129));
        assert!(!set.contains(1));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 64, 129]);
    }

    #[test]
    fn test_set_algebra() {
        let a = DocSet::from_docs(100, [1, 2, 3, 70]);
        let b = DocSet::from_docs(100, [2, 3, 4]);

        assert_eq!(a.intersection(&b).iter().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(a.union(&b).len(), 5);
        assert_eq!(a.and_not(&b).iter().collect::<Vec<_>>(), vec![1, 70]);
        assert_eq!(a.intersection_size(&b), 2);
    }

    #[test]
    fn test_complement_partitions_full_set() {
        let all = DocSet::full(200);
        let evens = DocSet::from_docs(200, (0..200).step_by(2));
        let odds = all.and_not(&evens);

        assert_eq!(evens.len() + odds.len(), all.len());
        assert_eq!(evens.intersection_size(&odds), 0);
    }

    #[test]
    fn test_empty_universe() {
        let set = DocSet::full(0);
        assert!(set.is_empty());
        assert_eq!(set.iter().count(), 0);
    }
}

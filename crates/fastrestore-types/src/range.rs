//! Key ranges and the per-batch key-range-to-applier assignment.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Key, NodeId};

/// First key of the system keyspace; user data lives below it.
const SYSTEM_KEYS_BEGIN: &[u8] = b"\xff";

/// Half-open key range `[begin, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    pub begin: Key,
    pub end: Key,
}

impl KeyRange {
    pub fn new(begin: impl Into<Key>, end: impl Into<Key>) -> Self {
        Self {
            begin: begin.into(),
            end: end.into(),
        }
    }

    /// The whole user keyspace `["", "\xff")`.
    pub fn normal_keys() -> Self {
        Self::new(Bytes::new(), Bytes::from_static(SYSTEM_KEYS_BEGIN))
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= &self.begin[..] && key < &self.end[..]
    }

    /// Returns true if the closed interval `[first, last]` shares a key with
    /// this range.
    pub fn intersects_closed(&self, first: &[u8], last: &[u8]) -> bool {
        first < &self.end[..] && last >= &self.begin[..]
    }

    /// Returns the overlap with `other`, if any.
    pub fn intersection(&self, other: &KeyRange) -> Option<KeyRange> {
        let begin = std::cmp::max(&self.begin, &other.begin).clone();
        let end = std::cmp::min(&self.end, &other.end).clone();
        let range = KeyRange { begin, end };
        (!range.is_empty()).then_some(range)
    }
}

impl std::fmt::Display for KeyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            crate::printable(&self.begin),
            crate::printable(&self.end)
        )
    }
}

// ============================================================================
// KeyRangeAssignment
// ============================================================================

/// Ordered `lower_bound -> applier` map covering the whole keyspace.
///
/// The first lower bound is always the empty key, so every key has an
/// owner: the applier of the greatest lower bound `<= key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRangeAssignment {
    bounds: BTreeMap<Key, NodeId>,
}

impl KeyRangeAssignment {
    /// Builds an assignment from sorted lower bounds, pairing bound `i` with
    /// `appliers[i]`.
    ///
    /// The first bound is forced to the empty key. Extra appliers beyond the
    /// number of bounds stay unassigned; extra bounds beyond the number of
    /// appliers are dropped. Returns `None` if either side is empty.
    pub fn from_bounds(bounds: &[Key], appliers: &[NodeId]) -> Option<Self> {
        if bounds.is_empty() || appliers.is_empty() {
            return None;
        }
        let mut map = BTreeMap::new();
        for (i, (bound, applier)) in bounds.iter().zip(appliers).enumerate() {
            let bound = if i == 0 { Bytes::new() } else { bound.clone() };
            map.insert(bound, *applier);
        }
        Some(Self { bounds: map })
    }

    /// Assigns the whole keyspace to one applier.
    pub fn single(applier: NodeId) -> Self {
        let mut bounds = BTreeMap::new();
        bounds.insert(Bytes::new(), applier);
        Self { bounds }
    }

    /// Owner of `key`.
    pub fn owner(&self, key: &[u8]) -> NodeId {
        self.bounds
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(_, node)| *node)
            .unwrap_or_else(|| self.first_owner())
    }

    fn first_owner(&self) -> NodeId {
        // The map is never empty and starts at the empty key.
        self.bounds
            .values()
            .next()
            .copied()
            .unwrap_or(NodeId::MASTER)
    }

    /// Splits `[begin, end)` at every lower bound strictly inside it and
    /// returns each piece with its owner, in key order.
    pub fn split(&self, begin: &Key, end: &Key) -> Vec<(KeyRange, NodeId)> {
        if begin >= end {
            return Vec::new();
        }
        let mut pieces = Vec::new();
        let mut start = begin.clone();
        let mut owner = self.owner(begin);
        for (bound, node) in self
            .bounds
            .range::<[u8], _>((Bound::Excluded(&begin[..]), Bound::Excluded(&end[..])))
        {
            pieces.push((KeyRange::new(start, bound.clone()), owner));
            start = bound.clone();
            owner = *node;
        }
        pieces.push((KeyRange::new(start, end.clone()), owner));
        pieces
    }

    /// The range owned by `applier`, if it owns one.
    ///
    /// The last range extends to the end of the user keyspace.
    pub fn range_of(&self, applier: NodeId) -> Option<KeyRange> {
        let mut iter = self.bounds.iter().peekable();
        while let Some((bound, node)) = iter.next() {
            if *node == applier {
                let end = iter
                    .peek()
                    .map_or_else(|| Bytes::from_static(SYSTEM_KEYS_BEGIN), |(b, _)| (*b).clone());
                return Some(KeyRange::new(bound.clone(), end));
            }
        }
        None
    }

    /// Appliers owning a non-empty range ("busy" appliers).
    pub fn appliers(&self) -> BTreeSet<NodeId> {
        self.bounds.values().copied().collect()
    }

    /// Lower bounds with their owners, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, NodeId)> {
        self.bounds.iter().map(|(k, n)| (k, *n))
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(s: &str) -> Key {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn two_way() -> KeyRangeAssignment {
        KeyRangeAssignment::from_bounds(&[key("a"), key("m")], &[NodeId::new(3), NodeId::new(4)])
            .unwrap()
    }

    #[test]
    fn test_first_bound_forced_to_min_key() {
        let assignment = two_way();
        let bounds: Vec<_> = assignment.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(bounds, vec![key(""), key("m")]);
    }

    #[test]
    fn test_owner_uses_greatest_lower_bound() {
        let assignment = two_way();
        assert_eq!(assignment.owner(b""), NodeId::new(3));
        assert_eq!(assignment.owner(b"a"), NodeId::new(3));
        assert_eq!(assignment.owner(b"l\xff"), NodeId::new(3));
        assert_eq!(assignment.owner(b"m"), NodeId::new(4));
        assert_eq!(assignment.owner(b"zzz"), NodeId::new(4));
    }

    #[test]
    fn test_split_at_inner_bounds() {
        let assignment = KeyRangeAssignment::from_bounds(
            &[key(""), key("f"), key("p")],
            &[NodeId::new(1), NodeId::new(2), NodeId::new(3)],
        )
        .unwrap();

        let pieces = assignment.split(&key("c"), &key("r"));
        assert_eq!(
            pieces,
            vec![
                (KeyRange::new(key("c"), key("f")), NodeId::new(1)),
                (KeyRange::new(key("f"), key("p")), NodeId::new(2)),
                (KeyRange::new(key("p"), key("r")), NodeId::new(3)),
            ]
        );
    }

    #[test]
    fn test_split_starting_on_bound_is_not_duplicated() {
        let assignment = two_way();
        let pieces = assignment.split(&key("m"), &key("n"));
        assert_eq!(pieces, vec![(KeyRange::new(key("m"), key("n")), NodeId::new(4))]);
    }

    #[test]
    fn test_split_empty_range() {
        assert!(two_way().split(&key("x"), &key("x")).is_empty());
    }

    #[test]
    fn test_extra_appliers_are_idle() {
        let assignment = KeyRangeAssignment::from_bounds(
            &[key("")],
            &[NodeId::new(1), NodeId::new(2)],
        )
        .unwrap();
        assert_eq!(assignment.appliers().len(), 1);
        assert!(assignment.range_of(NodeId::new(2)).is_none());
        assert_eq!(
            assignment.range_of(NodeId::new(1)),
            Some(KeyRange::normal_keys())
        );
    }

    #[test]
    fn test_range_intersection() {
        let a = KeyRange::new(key("b"), key("k"));
        let b = KeyRange::new(key("f"), key("z"));
        assert_eq!(a.intersection(&b), Some(KeyRange::new(key("f"), key("k"))));
        assert!(a.intersection(&KeyRange::new(key("k"), key("z"))).is_none());
        assert!(a.intersects_closed(b"a", b"b"));
        assert!(!a.intersects_closed(b"k", b"z"));
    }

    proptest! {
        /// Every key has exactly one owner and the split pieces tile the
        /// requested range without gaps.
        #[test]
        fn prop_split_tiles_range(
            mut bounds in prop::collection::btree_set(prop::collection::vec(any::<u8>(), 0..4), 1..6),
            begin in prop::collection::vec(any::<u8>(), 0..4),
            end in prop::collection::vec(any::<u8>(), 0..4),
        ) {
            bounds.insert(Vec::new());
            let bounds: Vec<Key> = bounds.into_iter().map(Bytes::from).collect();
            let appliers: Vec<NodeId> = (1..=bounds.len() as u32).map(NodeId::new).collect();
            let assignment = KeyRangeAssignment::from_bounds(&bounds, &appliers).unwrap();

            let (begin, end) = (Bytes::from(begin), Bytes::from(end));
            let pieces = assignment.split(&begin, &end);
            if begin >= end {
                prop_assert!(pieces.is_empty());
            } else {
                prop_assert_eq!(&pieces.first().unwrap().0.begin, &begin);
                prop_assert_eq!(&pieces.last().unwrap().0.end, &end);
                for pair in pieces.windows(2) {
                    prop_assert_eq!(&pair[0].0.end, &pair[1].0.begin);
                }
                for (range, owner) in &pieces {
                    prop_assert!(!range.is_empty());
                    prop_assert_eq!(assignment.owner(&range.begin), *owner);
                }
            }
        }
    }
}

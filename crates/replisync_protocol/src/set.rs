//! Grow-only replicated set.

use crate::error::{ProtocolError, ProtocolResult};
use crate::snapshot::Snapshot;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Debug;

/// Bound for values stored in a [`ReplicatedSet`].
///
/// Elements are compared by value and never mutated once added. The
/// ordering is only used for a deterministic internal layout; it carries no
/// meaning for replication.
///
/// `Ord` is required, not just equality: a set iterates, serializes and
/// compares in the same order on every replica. Types without a total order,
/// such as `serde_json::Value`, cannot be elements directly. Store them in a
/// canonical ordered form instead, for example their serialized JSON string,
/// and use [`Record`](crate::Record) to reconcile structured values.
pub trait Element:
    Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Element for T where
    T: Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A grow-only set (G-Set) identified by a stable set id.
///
/// Elements can be added but never removed. Merging two replicas of the same
/// set is a plain union, which makes merge commutative, associative and
/// idempotent: replicas that have seen the same elements converge no matter
/// in which order, or how many times, they exchanged state.
///
/// The value-returning [`add`](Self::add) and [`merge`](Self::merge) leave
/// the receiver untouched. [`insert`](Self::insert) and
/// [`merge_from`](Self::merge_from) are the in-place counterparts.
///
/// # Example
///
/// ```rust
/// use replisync_protocol::ReplicatedSet;
///
/// let a = ReplicatedSet::new("fruit").add("apple").add("pear");
/// let b = ReplicatedSet::new("fruit").add("cherry");
///
/// let merged = a.merge(&b);
/// assert_eq!(merged.len(), 3);
/// assert_eq!(merged, b.merge(&a));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicatedSet<T: Ord> {
    id: String,
    items: BTreeSet<T>,
}

impl<T: Ord + Clone> ReplicatedSet<T> {
    /// Creates an empty set with the given id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            items: BTreeSet::new(),
        }
    }

    /// Creates a set with the given id and initial elements.
    ///
    /// Duplicate elements collapse into one.
    pub fn with_items<I: IntoIterator<Item = T>>(id: impl Into<String>, items: I) -> Self {
        Self {
            id: id.into(),
            items: items.into_iter().collect(),
        }
    }

    /// Returns the set id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns a new set containing every element of `self` plus `item`.
    #[must_use]
    pub fn add(&self, item: T) -> Self {
        let mut next = self.clone();
        next.insert(item);
        next
    }

    /// Returns a new set containing every element of `self` plus `items`.
    #[must_use]
    pub fn add_all<I: IntoIterator<Item = T>>(&self, items: I) -> Self {
        let mut next = self.clone();
        next.items.extend(items);
        next
    }

    /// Inserts an element in place.
    ///
    /// Returns `true` if the element was not already present.
    pub fn insert(&mut self, item: T) -> bool {
        self.items.insert(item)
    }

    /// Returns the union of `self` and `other`.
    ///
    /// The result keeps the id of `self`. Use [`try_merge`](Self::try_merge)
    /// when the ids have not been checked already.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut next = self.clone();
        next.merge_from(other);
        next
    }

    /// Returns the union of `self` and `other`, rejecting a foreign set id.
    pub fn try_merge(&self, other: &Self) -> ProtocolResult<Self> {
        self.check_same_id(other)?;
        Ok(self.merge(other))
    }

    /// Merges `other` into `self` in place.
    pub fn merge_from(&mut self, other: &Self) {
        for item in &other.items {
            if !self.items.contains(item) {
                self.items.insert(item.clone());
            }
        }
    }

    /// Returns true if the set contains `item`.
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the set has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns true if every element of `self` is also in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.items.is_subset(&other.items)
    }

    /// Iterates over the elements.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Returns the elements as a vector.
    ///
    /// The order is an implementation detail and must not be relied upon.
    pub fn items(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// Converts the set into its snapshot form.
    pub fn to_snapshot(&self) -> Snapshot<T> {
        Snapshot::new(self.id.clone(), self.items())
    }

    /// Rebuilds a set from its snapshot form.
    pub fn from_snapshot(snapshot: Snapshot<T>) -> Self {
        Self::with_items(snapshot.id, snapshot.items)
    }

    fn check_same_id(&self, other: &Self) -> ProtocolResult<()> {
        if self.id != other.id {
            return Err(ProtocolError::IdMismatch {
                expected: self.id.clone(),
                actual: other.id.clone(),
            });
        }
        Ok(())
    }
}

impl<T: Element> ReplicatedSet<T> {
    /// Serializes the set to its JSON snapshot form.
    pub fn to_json(&self) -> ProtocolResult<String> {
        self.to_snapshot().to_json()
    }

    /// Deserializes a set from its JSON snapshot form.
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Snapshot::from_json(json).map(Self::from_snapshot)
    }
}

impl<T: Ord + Clone> From<Snapshot<T>> for ReplicatedSet<T> {
    fn from(snapshot: Snapshot<T>) -> Self {
        Self::from_snapshot(snapshot)
    }
}

impl<T: Ord> Extend<T> for ReplicatedSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl<T: Ord> IntoIterator for ReplicatedSet<T> {
    type Item = T;
    type IntoIter = std::collections::btree_set::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T: Ord> IntoIterator for &'a ReplicatedSet<T> {
    type Item = &'a T;
    type IntoIter = std::collections::btree_set::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

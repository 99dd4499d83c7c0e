//! Ordered per-cell particle storage with O(1) splicing.
//!
//! Rehash moves whole runs of records between cells. A linked list lets a
//! bucket hand its entire content to another bucket without touching the
//! records, and lets single records be re-linked without reallocating the
//! destination.

use std::collections::LinkedList;
use std::collections::linked_list;

use crate::data::particle::ParticleRecord;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bucket {
    items: LinkedList<ParticleRecord>,
}

impl Bucket {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn push(&mut self, p: ParticleRecord) {
        self.items.push_back(p);
    }

    /// Put a record back at the front, e.g. when a scan is interrupted.
    #[inline]
    pub fn push_front(&mut self, p: ParticleRecord) {
        self.items.push_front(p);
    }

    #[inline]
    pub fn pop_front(&mut self) -> Option<ParticleRecord> {
        self.items.pop_front()
    }

    /// Move every record of `other` to the end of `self` in O(1), leaving
    /// `other` empty.
    #[inline]
    pub fn splice(&mut self, other: &mut Bucket) {
        self.items.append(&mut other.items);
    }

    /// Split off the records from position `at` onwards.
    ///
    /// # Panics
    /// Panics if `at > len`.
    pub fn split_off(&mut self, at: usize) -> Bucket {
        Bucket {
            items: self.items.split_off(at),
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> linked_list::Iter<'_, ParticleRecord> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> linked_list::IterMut<'_, ParticleRecord> {
        self.items.iter_mut()
    }

    pub fn front(&self) -> Option<&ParticleRecord> {
        self.items.front()
    }
}

impl FromIterator<ParticleRecord> for Bucket {
    fn from_iter<I: IntoIterator<Item = ParticleRecord>>(iter: I) -> Self {
        Bucket {
            items: iter.into_iter().collect(),
        }
    }
}

impl Extend<ParticleRecord> for Bucket {
    fn extend<I: IntoIterator<Item = ParticleRecord>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl IntoIterator for Bucket {
    type Item = ParticleRecord;
    type IntoIter = linked_list::IntoIter<ParticleRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Bucket {
    type Item = &'a ParticleRecord;
    type IntoIter = linked_list::Iter<'a, ParticleRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

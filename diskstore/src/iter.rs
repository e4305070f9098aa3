use std::collections::hash_map::Values;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::slice::ChunksExactMut;

use bytemuck::Pod;

use crate::format::OCCUPIED_MARKER;
use crate::mapped_file::MappedFile;
use crate::slots::{self, Slots};

/// Iterator over the values of a [`Storage`](crate::Storage), in index order.
pub struct Iter<'a, K, V> {
    indices: Values<'a, K, u32>,
    slots: &'a Slots<V, MappedFile>,
}

impl<'a, K, V> Iter<'a, K, V> {
    pub(crate) fn new(indices: Values<'a, K, u32>, slots: &'a Slots<V, MappedFile>) -> Self {
        Self { indices, slots }
    }
}

impl<'a, K, V: Pod> Iterator for Iter<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        let index = *self.indices.next()?;
        Some(self.slots.payload(index as usize))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indices.size_hint()
    }
}

impl<K, V: Pod> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V: Pod> FusedIterator for Iter<'_, K, V> {}

/// Mutable iterator over the values of a [`Storage`](crate::Storage), in slot order.
pub struct IterMut<'a, V> {
    records: ChunksExactMut<'a, u8>,
    remaining: usize,
    _marker: PhantomData<&'a mut V>,
}

impl<'a, V> IterMut<'a, V> {
    pub(crate) fn new(records: ChunksExactMut<'a, u8>, remaining: usize) -> Self {
        Self {
            records,
            remaining,
            _marker: PhantomData,
        }
    }
}

impl<'a, V: Pod> Iterator for IterMut<'a, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        // Find next occupied record
        for record in self.records.by_ref() {
            if slots::raw_marker(record) == OCCUPIED_MARKER {
                self.remaining -= 1;
                return Some(slots::payload_mut(record));
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V: Pod> ExactSizeIterator for IterMut<'_, V> {}

impl<V: Pod> FusedIterator for IterMut<'_, V> {}

use std::marker::PhantomData;
use std::ops::Range;
use std::slice::ChunksExactMut;

use bytemuck::Pod;

use crate::format::{HEADER_SIZE, Header, MARKER_SIZE, Marker, RecordLayout};

/// A header followed by an array of `V` records, laid over a byte store.
///
/// The store must start at an 8-byte aligned address (a memory map is page
/// aligned). Slot indices must be below [`capacity`](Slots::capacity), out of
/// range access panics like slice indexing does.
pub struct Slots<V, B> {
    store: B,
    capacity: usize,
    _marker: PhantomData<V>,
}

impl<V, B> Slots<V, B>
where
    V: Pod,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Wraps a store, the capacity is however many whole records fit after the header.
    pub fn new(store: B) -> Self {
        let capacity =
            store.as_ref().len().saturating_sub(HEADER_SIZE) / RecordLayout::<V>::RECORD_SIZE;
        Self {
            store,
            capacity,
            _marker: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    pub fn header(&self) -> &Header {
        bytemuck::from_bytes(&self.store.as_ref()[..HEADER_SIZE])
    }

    pub fn header_mut(&mut self) -> &mut Header {
        bytemuck::from_bytes_mut(&mut self.store.as_mut()[..HEADER_SIZE])
    }

    fn record_range(&self, index: usize) -> Range<usize> {
        assert!(
            index < self.capacity,
            "slot {index} out of range for capacity {}",
            self.capacity
        );
        let start = HEADER_SIZE + index * RecordLayout::<V>::RECORD_SIZE;
        start..start + RecordLayout::<V>::RECORD_SIZE
    }

    fn record(&self, index: usize) -> &[u8] {
        let range = self.record_range(index);
        &self.store.as_ref()[range]
    }

    fn record_mut(&mut self, index: usize) -> &mut [u8] {
        let range = self.record_range(index);
        &mut self.store.as_mut()[range]
    }

    /// Decoded marker of a slot, or the raw value if it is not a known marker.
    pub fn marker(&self, index: usize) -> Result<Marker, u32> {
        Marker::decode(raw_marker(self.record(index)))
    }

    pub fn set_marker(&mut self, index: usize, marker: Marker) {
        *bytemuck::from_bytes_mut::<u32>(&mut self.record_mut(index)[..MARKER_SIZE]) = marker.raw();
    }

    pub fn payload(&self, index: usize) -> &V {
        payload(self.record(index))
    }

    pub fn payload_mut(&mut self, index: usize) -> &mut V {
        payload_mut(self.record_mut(index))
    }

    /// Stores `value` in a slot and marks it occupied.
    pub fn occupy(&mut self, index: usize, value: V) {
        *self.payload_mut(index) = value;
        self.set_marker(index, Marker::Occupied);
    }

    /// Marks a slot empty and zeroes its payload.
    pub fn release(&mut self, index: usize) {
        self.record_mut(index).fill(0);
    }

    /// Releases every slot in `range`.
    pub fn reset(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        let start = self.record_range(range.start).start;
        let end = self.record_range(range.end - 1).end;
        self.store.as_mut()[start..end].fill(0);
    }

    /// All records in slot order, one byte chunk per record.
    pub(crate) fn records_mut(&mut self) -> ChunksExactMut<'_, u8> {
        let end = HEADER_SIZE + self.capacity * RecordLayout::<V>::RECORD_SIZE;
        self.store.as_mut()[HEADER_SIZE..end].chunks_exact_mut(RecordLayout::<V>::RECORD_SIZE)
    }
}

pub(crate) fn raw_marker(record: &[u8]) -> u32 {
    *bytemuck::from_bytes::<u32>(&record[..MARKER_SIZE])
}

pub(crate) fn payload<V: Pod>(record: &[u8]) -> &V {
    let start = RecordLayout::<V>::PAYLOAD_OFFSET;
    bytemuck::from_bytes(&record[start..start + RecordLayout::<V>::ITEM_SIZE])
}

pub(crate) fn payload_mut<V: Pod>(record: &mut [u8]) -> &mut V {
    let start = RecordLayout::<V>::PAYLOAD_OFFSET;
    bytemuck::from_bytes_mut(&mut record[start..start + RecordLayout::<V>::ITEM_SIZE])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::OCCUPIED_MARKER;
    use bytemuck::Zeroable;
    use proptest::prelude::*;

    /// Heap buffer with the 8-byte alignment a memory map would give.
    struct AlignedBuf(Vec<u64>);

    impl AlignedBuf {
        fn new(len: usize) -> Self {
            assert_eq!(len % 8, 0);
            Self(vec![0; len / 8])
        }
    }

    impl AsRef<[u8]> for AlignedBuf {
        fn as_ref(&self) -> &[u8] {
            bytemuck::cast_slice(&self.0)
        }
    }

    impl AsMut<[u8]> for AlignedBuf {
        fn as_mut(&mut self) -> &mut [u8] {
            bytemuck::cast_slice_mut(&mut self.0)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Zeroable, Pod)]
    #[repr(C)]
    struct Pair {
        key: u32,
        data: u32,
    }

    fn slots(capacity: u32) -> Slots<Pair, AlignedBuf> {
        let len = RecordLayout::<Pair>::file_len(capacity).unwrap();
        Slots::new(AlignedBuf::new(len))
    }

    #[test]
    fn capacity_from_store_length() {
        let s = slots(5);
        assert_eq!(s.capacity(), 5);

        let s: Slots<Pair, _> = Slots::new(AlignedBuf::new(8));
        assert_eq!(s.capacity(), 0);
    }

    #[test]
    fn occupy_and_release() {
        let mut s = slots(3);
        assert_eq!(s.marker(1), Ok(Marker::Empty));

        s.occupy(1, Pair { key: 7, data: 70 });
        assert_eq!(s.marker(1), Ok(Marker::Occupied));
        assert_eq!(*s.payload(1), Pair { key: 7, data: 70 });
        assert_eq!(s.marker(0), Ok(Marker::Empty));
        assert_eq!(s.marker(2), Ok(Marker::Empty));

        // byte layout: marker then payload at offset 4
        let raw = &s.store().as_ref()[HEADER_SIZE + 16..HEADER_SIZE + 32];
        assert_eq!(&raw[..4], &OCCUPIED_MARKER.to_ne_bytes());
        assert_eq!(&raw[4..8], &7u32.to_ne_bytes());
        assert_eq!(&raw[8..12], &70u32.to_ne_bytes());

        s.payload_mut(1).data = 71;
        assert_eq!(s.payload(1).data, 71);

        s.release(1);
        assert_eq!(s.marker(1), Ok(Marker::Empty));
        assert_eq!(*s.payload(1), Pair::zeroed());
    }

    #[test]
    fn unknown_markers_surface_raw() {
        let mut s = slots(2);
        let start = HEADER_SIZE + 16;
        s.store.as_mut()[start..start + 4].copy_from_slice(&0xDEAD_BEEFu32.to_ne_bytes());
        assert_eq!(s.marker(1), Err(0xDEAD_BEEF));
    }

    #[test]
    fn header_round_trips_through_the_store() {
        let mut s = slots(2);
        *s.header_mut() = Header::new(8, 2);
        s.header_mut().size = 1;
        assert!(s.header().has_valid_signature());
        assert_eq!(s.header().capacity, 2);
        assert_eq!(s.header().size, 1);
    }

    #[test]
    fn reset_clears_a_range() {
        let mut s = slots(4);
        for i in 0..4 {
            s.occupy(i, Pair { key: i as u32, data: 1 });
        }
        s.reset(1..3);
        assert_eq!(s.marker(0), Ok(Marker::Occupied));
        assert_eq!(s.marker(1), Ok(Marker::Empty));
        assert_eq!(s.marker(2), Ok(Marker::Empty));
        assert_eq!(s.marker(3), Ok(Marker::Occupied));
        s.reset(2..2);
        assert_eq!(s.marker(3), Ok(Marker::Occupied));
    }

    #[test]
    fn records_in_slot_order() {
        let mut s = slots(3);
        s.occupy(2, Pair { key: 2, data: 20 });
        let occupied: Vec<Pair> = s
            .records_mut()
            .filter(|r| raw_marker(r) == OCCUPIED_MARKER)
            .map(|r| *payload::<Pair>(r))
            .collect();
        assert_eq!(occupied, vec![Pair { key: 2, data: 20 }]);
    }

    #[test]
    #[should_panic]
    fn out_of_range_slot_panics() {
        let s = slots(2);
        let _ = s.marker(2);
    }

    proptest! {
        #[test]
        fn prop_slots_are_independent(index in 0usize..16, key in any::<u32>(), data in any::<u32>()) {
            let mut s = slots(16);
            s.occupy(index, Pair { key, data });
            for i in 0..16 {
                if i == index {
                    prop_assert_eq!(s.marker(i), Ok(Marker::Occupied));
                    prop_assert_eq!(*s.payload(i), Pair { key, data });
                } else {
                    prop_assert_eq!(s.marker(i), Ok(Marker::Empty));
                }
            }
        }
    }
}

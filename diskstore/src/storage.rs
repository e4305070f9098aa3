use std::borrow::Borrow;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::OpenOptions;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::ops::Range;
use std::path::{Path, PathBuf};

use bytemuck::Pod;
use rustc_hash::FxBuildHasher;
use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::format::{self, Header, Marker, RecordLayout};
use crate::iter::{Iter, IterMut};
use crate::mapped_file::MappedFile;
use crate::slots::Slots;

/// Extracts the lookup key from a stored value.
///
/// A record type usually implements this for itself, which makes it its own
/// adapter (the default for [`Storage`]). A separate adapter type can be used
/// to index the same records by another field.
pub trait KeyOf<V> {
    type Key: Hash + Eq;

    fn key_of(value: &V) -> Self::Key;
}

/// A fixed capacity key-value store living in a memory-mapped file.
///
/// Every value sits in its own slot at a stable offset in the file. The file
/// holds the values only, the key-to-slot index and the free slot list are
/// rebuilt in memory each time the file is opened.
///
/// `S` is the hasher of the in-memory index.
pub struct Storage<V, A = V, S = FxBuildHasher>
where
    A: KeyOf<V>,
{
    occupied: HashMap<A::Key, u32, S>,
    free: Vec<u32>,
    slots: Slots<V, MappedFile>,
    path: PathBuf,
    _adapter: PhantomData<A>,
}

impl<V, A> Storage<V, A, FxBuildHasher>
where
    V: Pod,
    A: KeyOf<V>,
{
    /// Creates a storage file with room for `capacity` values.
    ///
    /// An existing file at `path` is truncated.
    pub fn create<P: AsRef<Path>>(path: P, capacity: u32) -> Result<Self> {
        Self::create_with_hasher(path, capacity, FxBuildHasher)
    }

    /// Opens an existing storage file, growing it to `capacity` slots if it holds fewer.
    pub fn open<P: AsRef<Path>>(path: P, capacity: u32) -> Result<Self> {
        Self::open_with_hasher(path, capacity, FxBuildHasher)
    }
}

impl<V, A, S> Storage<V, A, S>
where
    V: Pod,
    A: KeyOf<V>,
    S: BuildHasher,
{
    pub fn create_with_hasher<P: AsRef<Path>>(path: P, capacity: u32, hasher: S) -> Result<Self> {
        let path = path.as_ref();
        if capacity == 0 {
            return Err(StorageError::CapacityTooSmall);
        }
        let len = RecordLayout::<V>::file_len(capacity)
            .ok_or(StorageError::CapacityTooLarge { requested: capacity })?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;

        let mut slots = Slots::new(MappedFile::from_file(file)?);
        *slots.header_mut() = Header::new(RecordLayout::<V>::ITEM_SIZE as u32, capacity);
        slots.reset(0..capacity as usize);

        debug!(path = %path.display(), capacity, "created storage");

        Ok(Self {
            occupied: HashMap::with_capacity_and_hasher(capacity as usize, hasher),
            free: (0..capacity).rev().collect(),
            slots,
            path: path.to_path_buf(),
            _adapter: PhantomData,
        })
    }

    pub fn open_with_hasher<P: AsRef<Path>>(path: P, capacity: u32, hasher: S) -> Result<Self> {
        let path = path.as_ref();
        let mapped = MappedFile::open(path)?;
        let header = format::validate::<V>(mapped.as_ref()).inspect_err(|e| {
            if e.is_format_error() {
                warn!(path = %path.display(), error = %e, "rejected storage file");
            } else {
                debug!(path = %path.display(), error = %e, "cannot read storage file");
            }
        })?;

        // the whole file is scanned before it may be grown
        let mut slots = Slots::new(mapped);
        let (occupied, free) = Self::index(&slots, 0..header.capacity, hasher)?;

        if capacity > header.capacity {
            drop(slots);
            return Self::expand(path, header.capacity, capacity, occupied, free);
        }

        debug!(
            path = %path.display(),
            capacity = header.capacity,
            len = occupied.len(),
            "opened storage"
        );

        if header.size as usize != occupied.len() {
            debug!(stored = header.size, actual = occupied.len(), "rewriting stale size");
        }
        sync_size(&mut slots, occupied.len());
        Ok(Self {
            occupied,
            free,
            slots,
            path: path.to_path_buf(),
            _adapter: PhantomData,
        })
    }

    /// Grows a scanned, currently unmapped file from `current` to `requested` slots.
    ///
    /// `occupied` and `free` index the first `current` slots. They hold slot
    /// indices only, so they stay valid across the remap.
    fn expand(
        path: &Path,
        current: u32,
        requested: u32,
        occupied: HashMap<A::Key, u32, S>,
        old_free: Vec<u32>,
    ) -> Result<Self> {
        if requested <= current {
            return Err(StorageError::CapacityNotIncreased { current, requested });
        }
        let len = RecordLayout::<V>::file_len(requested)
            .ok_or(StorageError::CapacityTooLarge { requested })?;

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        file.set_len(len as u64)?;
        let mut slots = Slots::new(MappedFile::from_file(file)?);

        slots.reset(current as usize..requested as usize);
        // lowest index stays on top of the stack
        let mut free: Vec<u32> = (current..requested).rev().collect();
        free.extend(old_free);
        slots.header_mut().capacity = requested;

        debug!(
            path = %path.display(),
            from = current,
            to = requested,
            len = occupied.len(),
            "expanded storage"
        );

        sync_size(&mut slots, occupied.len());
        Ok(Self {
            occupied,
            free,
            slots,
            path: path.to_path_buf(),
            _adapter: PhantomData,
        })
    }

    /// Scans slot markers to rebuild the key index and the free list.
    ///
    /// The free list comes back ordered so that the lowest index is popped first.
    fn index(
        slots: &Slots<V, MappedFile>,
        range: Range<u32>,
        hasher: S,
    ) -> Result<(HashMap<A::Key, u32, S>, Vec<u32>)> {
        let mut occupied = HashMap::with_capacity_and_hasher(slots.capacity(), hasher);
        let mut free = Vec::with_capacity(slots.capacity());

        for index in range.rev() {
            match slots.marker(index as usize) {
                Ok(Marker::Empty) => free.push(index),
                Ok(Marker::Occupied) => {
                    let key = A::key_of(slots.payload(index as usize));
                    if let Some(first) = occupied.insert(key, index) {
                        warn!(first, second = index, "duplicated key in storage file");
                        return Err(StorageError::DuplicatedRecord {
                            first: first.min(index),
                            second: first.max(index),
                        });
                    }
                }
                Err(marker) => {
                    warn!(slot = index, marker, "corrupted slot marker");
                    return Err(StorageError::CorruptedFile {
                        slot: index,
                        marker,
                    });
                }
            }
        }

        Ok((occupied, free))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of slots in the file.
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.occupied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied.is_empty()
    }

    /// Returns true when no free slot is left.
    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Stores `value` in a free slot.
    ///
    /// Returns false, changing nothing, if a value with the same key is
    /// already stored or the storage is full.
    pub fn insert(&mut self, value: V) -> bool {
        self.try_insert(value).is_ok()
    }

    /// Like [`insert`](Storage::insert) but tells why the value was not stored.
    pub fn try_insert(&mut self, value: V) -> Result<()> {
        let key = A::key_of(&value);
        if self.occupied.contains_key(&key) {
            return Err(StorageError::DuplicateKey);
        }
        let Some(index) = self.free.pop() else {
            return Err(StorageError::StorageFull);
        };
        self.slots.occupy(index as usize, value);
        self.occupied.insert(key, index);
        sync_size(&mut self.slots, self.occupied.len());
        Ok(())
    }

    /// Overwrites the value stored under the same key, or stores it in a free slot.
    ///
    /// Returns false only when the key is new and the storage is full.
    pub fn insert_or_assign(&mut self, value: V) -> bool {
        match self.occupied.entry(A::key_of(&value)) {
            Entry::Occupied(entry) => {
                *self.slots.payload_mut(*entry.get() as usize) = value;
                return true;
            }
            Entry::Vacant(entry) => {
                let Some(index) = self.free.pop() else {
                    return false;
                };
                self.slots.occupy(index as usize, value);
                entry.insert(index);
            }
        }
        sync_size(&mut self.slots, self.occupied.len());
        true
    }

    /// Removes the value stored under `key`, freeing its slot.
    pub fn erase<Q>(&mut self, key: &Q) -> bool
    where
        A::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some(index) = self.occupied.remove(key) else {
            return false;
        };
        self.slots.release(index as usize);
        self.free.push(index);
        sync_size(&mut self.slots, self.occupied.len());
        true
    }

    pub fn find<Q>(&self, key: &Q) -> Option<&V>
    where
        A::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = *self.occupied.get(key)?;
        Some(self.slots.payload(index as usize))
    }

    /// Mutable access to a stored value, changes are written straight to the mapping.
    ///
    /// The key of the value must not be changed through this reference.
    pub fn find_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        A::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = *self.occupied.get(key)?;
        Some(self.slots.payload_mut(index as usize))
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        A::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.occupied.contains_key(key)
    }

    /// Removes every value. Capacity and file size stay the same.
    pub fn clear(&mut self) {
        for (_, index) in self.occupied.drain() {
            self.slots.release(index as usize);
            self.free.push(index);
        }
        sync_size(&mut self.slots, 0);
    }

    /// Iterates over stored values in index order.
    pub fn iter(&self) -> Iter<'_, A::Key, V> {
        Iter::new(self.occupied.values(), &self.slots)
    }

    /// Iterates over stored values in slot order, allowing them to be modified in place.
    ///
    /// Keys must not be changed through the returned references.
    pub fn iter_mut(&mut self) -> IterMut<'_, V> {
        let remaining = self.occupied.len();
        IterMut::new(self.slots.records_mut(), remaining)
    }

    /// Writes modified pages back to the file.
    ///
    /// Not needed for the data to reach the file eventually, only to wait for it.
    pub fn flush(&self) -> Result<()> {
        self.slots.store().flush()?;
        Ok(())
    }
}

fn sync_size<V: Pod>(slots: &mut Slots<V, MappedFile>, len: usize) {
    if slots.header().size as usize != len {
        slots.header_mut().size = len as u32;
    }
}

impl<'a, V, A, S> IntoIterator for &'a Storage<V, A, S>
where
    V: Pod,
    A: KeyOf<V>,
    S: BuildHasher,
{
    type Item = &'a V;
    type IntoIter = Iter<'a, A::Key, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, V, A, S> IntoIterator for &'a mut Storage<V, A, S>
where
    V: Pod,
    A: KeyOf<V>,
    S: BuildHasher,
{
    type Item = &'a mut V;
    type IntoIter = IterMut<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

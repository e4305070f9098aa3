//! On-disk layout of a storage file.
//!
//! ```text
//! offset 0:  [u8; 4]  signature   DA 1A F1 1E
//! offset 4:  u32      item_size   size_of::<V>()
//! offset 8:  u32      capacity    number of record slots
//! offset 12: u32      size        occupied slots
//! offset 16: record[capacity]
//! ```
//!
//! Every record starts with a `u32` marker followed by the payload, padded so
//! that records stay 8-byte aligned. All integers are native endian.

use std::marker::PhantomData;
use std::mem::{align_of, size_of};

use bytemuck::{Pod, Zeroable};
use modular_bitfield::Specifier;

use crate::error::{Result, StorageError};

pub const SIGNATURE: [u8; 4] = [0xDA, 0x1A, 0xF1, 0x1E];
pub const HEADER_SIZE: usize = size_of::<Header>();
pub const MARKER_SIZE: usize = size_of::<u32>();
pub const RECORD_ALIGN: usize = 8;
pub const OCCUPIED_MARKER: u32 = 0xFEED_DA1A;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct Header {
    pub signature: [u8; 4],
    pub item_size: u32,
    pub capacity: u32,
    pub size: u32,
}

impl Header {
    pub fn new(item_size: u32, capacity: u32) -> Self {
        Self {
            signature: SIGNATURE,
            item_size,
            capacity,
            size: 0,
        }
    }

    pub fn has_valid_signature(&self) -> bool {
        self.signature == SIGNATURE
    }
}

#[derive(Specifier, Debug, Clone, Copy, PartialEq, Eq)]
#[bits = 32]
#[repr(u32)]
pub enum Marker {
    Empty = 0,
    Occupied = 0xFEED_DA1A,
}

impl Marker {
    /// Decodes a raw marker, handing back the raw value if it is not a known marker.
    pub fn decode(raw: u32) -> std::result::Result<Self, u32> {
        <Marker as Specifier>::from_bytes(raw).map_err(|_| raw)
    }

    pub fn raw(self) -> u32 {
        self as u32
    }
}

const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Byte layout of a record holding a `V` payload.
pub struct RecordLayout<V>(PhantomData<V>);

impl<V> RecordLayout<V> {
    pub const ITEM_SIZE: usize = {
        assert!(
            size_of::<V>() <= u32::MAX as usize,
            "record payload does not fit the item size field"
        );
        size_of::<V>()
    };

    pub const PAYLOAD_OFFSET: usize = {
        assert!(
            align_of::<V>() <= RECORD_ALIGN,
            "record payload alignment must not exceed 8"
        );
        align_up(MARKER_SIZE, align_of::<V>())
    };

    pub const RECORD_SIZE: usize = align_up(Self::PAYLOAD_OFFSET + Self::ITEM_SIZE, RECORD_ALIGN);

    /// Total file length for `capacity` records, `None` if it overflows `usize`.
    pub fn file_len(capacity: u32) -> Option<usize> {
        (capacity as usize)
            .checked_mul(Self::RECORD_SIZE)?
            .checked_add(HEADER_SIZE)
    }

    /// Smallest file that can be a valid storage: a header and one record.
    pub fn min_file_len() -> usize {
        HEADER_SIZE + Self::RECORD_SIZE
    }
}

/// Checks that `bytes` hold a storage file of `V` records and returns its header.
///
/// Runs the checks in a fixed order: length, signature, length against the
/// stored capacity, payload size.
pub fn validate<V>(bytes: &[u8]) -> Result<Header> {
    let len = bytes.len();
    let min = RecordLayout::<V>::min_file_len();
    if len < min {
        return Err(StorageError::FileTooSmall { len, min });
    }

    let header: Header = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);
    if !header.has_valid_signature() {
        return Err(StorageError::InvalidSignature {
            found: header.signature,
        });
    }

    if RecordLayout::<V>::file_len(header.capacity) != Some(len) {
        return Err(StorageError::SizeMismatch {
            capacity: header.capacity,
            actual: len,
        });
    }

    if header.item_size as usize != RecordLayout::<V>::ITEM_SIZE {
        return Err(StorageError::ItemSizeMismatch {
            expected: RecordLayout::<V>::ITEM_SIZE,
            found: header.item_size,
        });
    }

    Ok(header)
}

use std::io;
use thiserror::Error;

/// Errors that can occur when creating, opening or growing a storage file
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO errors when creating, resizing or mapping the file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The file cannot hold a header and at least one record
    #[error("Storage file is too small: {len} bytes, need at least {min}")]
    FileTooSmall { len: usize, min: usize },

    /// The first four bytes are not the storage signature
    #[error("Invalid storage file signature: {found:02x?}")]
    InvalidSignature { found: [u8; 4] },

    /// File length disagrees with the capacity recorded in the header
    #[error("Mismatch file size: {actual} bytes for a capacity of {capacity} records")]
    SizeMismatch { capacity: u32, actual: usize },

    /// The file was written for a record payload of another size
    #[error("Mismatch item size: expected {expected}, found {found}")]
    ItemSizeMismatch { expected: usize, found: u32 },

    /// A slot carries a marker that is neither empty nor occupied
    #[error("Storage file is corrupted: slot {slot} has marker {marker:#010x}")]
    CorruptedFile { slot: u32, marker: u32 },

    /// Two occupied slots hold records with the same key
    #[error("Storage file is corrupted: slots {first} and {second} hold the same key")]
    DuplicatedRecord { first: u32, second: u32 },

    /// Zero capacity requested at creation
    #[error("Storage capacity must be greater than zero")]
    CapacityTooSmall,

    /// The requested capacity cannot be addressed in memory
    #[error("Storage capacity {requested} is too large to map")]
    CapacityTooLarge { requested: u32 },

    /// Expansion was asked for a capacity that does not grow the file
    #[error("Cannot expand storage from {current} to {requested} records")]
    CapacityNotIncreased { current: u32, requested: u32 },

    /// A record with the same key is already stored
    #[error("Duplicated key")]
    DuplicateKey,

    /// No free slot is left
    #[error("Storage is full")]
    StorageFull,
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Returns true for errors raised while validating the file contents,
    /// as opposed to IO failures or caller errors.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            StorageError::FileTooSmall { .. }
                | StorageError::InvalidSignature { .. }
                | StorageError::SizeMismatch { .. }
                | StorageError::ItemSizeMismatch { .. }
                | StorageError::CorruptedFile { .. }
                | StorageError::DuplicatedRecord { .. }
        )
    }
}

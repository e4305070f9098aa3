//! Persistent fixed-record key-value storage backed by a memory-mapped file.
//!
//! A [`Storage`] keeps every value in a fixed-size slot of a file that is
//! mapped into memory, so reads and writes are plain memory accesses and the
//! contents survive reopening the file. The key-to-slot index is rebuilt in
//! memory on open.
//!
//! ```no_run
//! use bytemuck::{Pod, Zeroable};
//! use diskstore::{KeyOf, Storage};
//!
//! #[derive(Clone, Copy, Zeroable, Pod)]
//! #[repr(C)]
//! struct Item {
//!     key: u32,
//!     data: u32,
//! }
//!
//! impl KeyOf<Item> for Item {
//!     type Key = u32;
//!
//!     fn key_of(item: &Item) -> u32 {
//!         item.key
//!     }
//! }
//!
//! let mut storage = Storage::<Item>::create("items.db", 16)?;
//! storage.insert(Item { key: 1, data: 10 });
//! assert_eq!(storage.find(&1).map(|item| item.data), Some(10));
//! # Ok::<(), diskstore::StorageError>(())
//! ```

pub mod error;
pub mod format;
pub mod iter;
pub mod mapped_file;
mod slots;
pub mod storage;

pub use error::{Result, StorageError};
pub use iter::{Iter, IterMut};
pub use mapped_file::MappedFile;
pub use storage::{KeyOf, Storage};

use std::fs::{File, OpenOptions};
use std::io;
use std::mem::size_of;
use std::path::Path;

use bytemuck::Pod;
use memmap2::MmapMut;

/// A file mapped read-write into memory in its entirety.
///
/// The mapping length is fixed at the file length when it was opened; to
/// grow the file the mapping has to be closed and a new one opened.
/// Dropping (or [`close`](MappedFile::close)) unmaps first and then closes
/// the file handle. A default or closed `MappedFile` is empty.
#[derive(Default)]
pub struct MappedFile {
    mapping: Option<Mapping>,
}

// field order is drop order: unmap before closing the handle
struct Mapping {
    mmap: MmapMut,
    _file: File,
}

impl MappedFile {
    /// Maps an existing file for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file)
    }

    /// Maps an already opened file. The file must be readable and writable.
    pub fn from_file(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty file",
            ));
        }
        // SAFETY: this is the one place the crate trusts the OS with raw memory.
        // The file must not be truncated or mapped for write by anyone else
        // while this mapping is alive.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            mapping: Some(Mapping { mmap, _file: file }),
        })
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Length of the mapping in bytes, zero once closed.
    pub fn size(&self) -> usize {
        self.mapping.as_ref().map_or(0, |m| m.mmap.len())
    }

    /// Typed view of the bytes at `offset`, `None` if out of bounds or misaligned.
    pub fn view<T: Pod>(&self, offset: usize) -> Option<&T> {
        let end = offset.checked_add(size_of::<T>())?;
        let bytes = self.as_ref().get(offset..end)?;
        bytemuck::try_from_bytes(bytes).ok()
    }

    /// Mutable typed view of the bytes at `offset`.
    pub fn view_mut<T: Pod>(&mut self, offset: usize) -> Option<&mut T> {
        let end = offset.checked_add(size_of::<T>())?;
        let bytes = self.as_mut().get_mut(offset..end)?;
        bytemuck::try_from_bytes_mut(bytes).ok()
    }

    /// Writes dirty pages back to the file and waits for completion.
    pub fn flush(&self) -> io::Result<()> {
        match &self.mapping {
            Some(m) => m.mmap.flush(),
            None => Ok(()),
        }
    }

    /// Unmaps and closes the file. Calling it again is a no-op.
    pub fn close(&mut self) {
        self.mapping = None;
    }
}

impl AsRef<[u8]> for MappedFile {
    fn as_ref(&self) -> &[u8] {
        match &self.mapping {
            Some(m) => &m.mmap[..],
            None => &[],
        }
    }
}

impl AsMut<[u8]> for MappedFile {
    fn as_mut(&mut self) -> &mut [u8] {
        match &mut self.mapping {
            Some(m) => &mut m.mmap[..],
            None => &mut [],
        }
    }
}

use crate::error::{RecoveryError, Result};
use crate::types::{Offset, Size, DEFAULT_BLOCK_SIZE};
use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

const EMPTY: &[u8] = &[];

/// A block of image data; borrowed from the mapping when possible
#[derive(Debug, Clone)]
pub struct Block<'a> {
    pub offset: u64,
    pub data: Cow<'a, [u8]>,
}

impl<'a> Block<'a> {
    pub fn new(offset: u64, data: impl Into<Cow<'a, [u8]>>) -> Self {
        Self {
            offset,
            data: data.into(),
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.data.len() as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Detach from the image so the block can outlive the accessor borrow
    pub fn into_owned(self) -> Block<'static> {
        Block {
            offset: self.offset,
            data: Cow::Owned(self.data.into_owned()),
        }
    }
}

#[derive(Clone)]
enum Backing {
    Mapped(Arc<Mmap>),
    Buffered(Arc<Mutex<File>>),
    Empty,
}

/// Read-only, block-addressable view over a storage image.
///
/// Two backends exist: a memory map (default) and positional buffered reads.
/// Both return identical bytes for identical requests; the image is never
/// opened for writing.
#[derive(Clone)]
pub struct DiskImage {
    backing: Backing,
    size: Size,
    block_size: usize,
    path: String,
}

impl std::fmt::Debug for DiskImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.backing {
            Backing::Mapped(_) => "mapped",
            Backing::Buffered(_) => "buffered",
            Backing::Empty => "empty",
        };
        f.debug_struct("DiskImage")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("block_size", &self.block_size)
            .field("backend", &backend)
            .finish()
    }
}

impl DiskImage {
    /// Open a disk image with memory mapping
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (file, path_str, size) = open_read_only(path.as_ref())?;

        // Zero-length files cannot be mapped on every platform
        let backing = if size.as_u64() == 0 {
            Backing::Empty
        } else {
            let mmap = unsafe {
                Mmap::map(&file)
                    .map_err(|e| RecoveryError::Mmap(format!("Failed to mmap file: {}", e)))?
            };
            Backing::Mapped(Arc::new(mmap))
        };

        Ok(Self {
            backing,
            size,
            block_size: DEFAULT_BLOCK_SIZE,
            path: path_str,
        })
    }

    /// Open a disk image using positional reads instead of a mapping
    pub fn open_buffered<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (file, path_str, size) = open_read_only(path.as_ref())?;

        let backing = if size.as_u64() == 0 {
            Backing::Empty
        } else {
            Backing::Buffered(Arc::new(Mutex::new(file)))
        };

        Ok(Self {
            backing,
            size,
            block_size: DEFAULT_BLOCK_SIZE,
            path: path_str,
        })
    }

    pub fn with_block_size(mut self, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(RecoveryError::InvalidArgument(
                "block size must be greater than 0".to_string(),
            ));
        }
        self.block_size = block_size;
        Ok(self)
    }

    /// Get the total size of the disk image
    pub fn size(&self) -> Size {
        self.size
    }

    /// Get the path to the disk image
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of full blocks in the image
    pub fn block_count(&self) -> u64 {
        self.size.as_u64() / self.block_size as u64
    }

    /// Read up to `len` bytes at `offset`, clamped to the end of the image.
    /// Offsets at or past the end yield an empty buffer.
    pub fn read_at(&self, offset: Offset, len: usize) -> Result<Cow<'_, [u8]>> {
        let start = offset.as_u64();
        let image_size = self.size.as_u64();
        if start >= image_size || len == 0 {
            return Ok(Cow::Borrowed(EMPTY));
        }

        let end = start.saturating_add(len as u64).min(image_size);
        let span = (end - start) as usize;

        match &self.backing {
            Backing::Mapped(mmap) => Ok(Cow::Borrowed(&mmap[start as usize..end as usize])),
            Backing::Buffered(file) => {
                let mut file = file
                    .lock()
                    .map_err(|_| RecoveryError::Config("image handle lock poisoned".to_string()))?;
                let mut buffer = vec![0u8; span];
                file.seek(SeekFrom::Start(start))?;
                file.read_exact(&mut buffer)?;
                Ok(Cow::Owned(buffer))
            }
            Backing::Empty => Ok(Cow::Borrowed(EMPTY)),
        }
    }

    /// Block at `index * block_size`; empty past the end of the image.
    /// A trailing partial block is returned at its real length.
    pub fn read_block(&self, index: u64) -> Result<Block<'_>> {
        let offset = match index.checked_mul(self.block_size as u64) {
            Some(offset) => offset,
            None => return Ok(Block::new(u64::MAX, EMPTY)),
        };
        let data = self.read_at(Offset::new(offset), self.block_size)?;
        Ok(Block::new(offset, data))
    }

    /// Iterate over every full block from offset 0
    pub fn scan_blocks(&self) -> Blocks<'_> {
        self.scan_blocks_from(0)
    }

    /// Iterate over full blocks starting at the block containing `start`
    pub fn scan_blocks_from(&self, start: u64) -> Blocks<'_> {
        let block_size = self.block_size as u64;
        Blocks {
            disk: self,
            next: (start / block_size) * block_size,
            end: self.block_count() * block_size,
            failed: false,
        }
    }
}

fn open_read_only(path: &Path) -> Result<(File, String, Size)> {
    let path_str = path
        .to_str()
        .ok_or_else(|| RecoveryError::InvalidArgument("Invalid path encoding".to_string()))?
        .to_string();

    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RecoveryError::FileNotFound(path_str.clone())
        } else {
            RecoveryError::Io(e)
        }
    })?;

    let metadata = file.metadata()?;
    if metadata.is_dir() {
        return Err(RecoveryError::InvalidArgument(format!(
            "{} is a directory",
            path_str
        )));
    }

    Ok((file, path_str, Size::new(metadata.len())))
}

/// Lazy sequence of full blocks. Stops after the first read error.
pub struct Blocks<'a> {
    disk: &'a DiskImage,
    next: u64,
    end: u64,
    failed: bool,
}

impl<'a> Blocks<'a> {
    /// Offset of the next block this iterator would yield
    pub fn next_offset(&self) -> u64 {
        self.next
    }

    /// Full blocks not yet yielded
    pub fn remaining(&self) -> u64 {
        if self.failed {
            return 0;
        }
        self.end.saturating_sub(self.next) / self.disk.block_size as u64
    }
}

impl<'a> Iterator for Blocks<'a> {
    type Item = Result<Block<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.end {
            return None;
        }

        let disk: &'a DiskImage = self.disk;
        let offset = self.next;
        let block_size = disk.block_size;
        match disk.read_at(Offset::new(offset), block_size) {
            Ok(data) => {
                self.next += block_size as u64;
                Some(Ok(Block::new(offset, data)))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining() as usize;
        (0, Some(remaining))
    }
}

/// Zero-pad a short block up to `block_size`
pub fn pad_block(data: &[u8], block_size: usize) -> Cow<'_, [u8]> {
    if data.len() >= block_size {
        return Cow::Borrowed(data);
    }
    let mut padded = Vec::with_capacity(block_size);
    padded.extend_from_slice(data);
    padded.resize(block_size, 0);
    Cow::Owned(padded)
}

/// Translate a cluster index into an absolute byte offset
#[inline]
pub fn cluster_to_byte_offset(cluster_index: u64, cluster_size: u64, data_region_start: u64) -> u64 {
    data_region_start.saturating_add(cluster_index.saturating_mul(cluster_size))
}

/// Cluster addressing supplied by filesystem metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterGeometry {
    pub cluster_size: u64,
    pub data_region_start: u64,
}

impl ClusterGeometry {
    pub fn new(cluster_size: u64, data_region_start: u64) -> Self {
        Self {
            cluster_size,
            data_region_start,
        }
    }

    pub fn byte_offset(&self, cluster_index: u64) -> u64 {
        cluster_to_byte_offset(cluster_index, self.cluster_size, self.data_region_start)
    }

    /// Geometry from the BIOS parameter block of a FAT32 boot sector
    pub fn from_fat32_boot_sector(sector: &[u8]) -> Option<Self> {
        if sector.len() < 512 {
            return None;
        }

        let bytes_per_sector = u16::from_le_bytes([sector[0x0B], sector[0x0C]]) as u64;
        let sectors_per_cluster = sector[0x0D] as u64;
        let reserved_sectors = u16::from_le_bytes([sector[0x0E], sector[0x0F]]) as u64;
        let fat_count = sector[0x10] as u64;
        let sectors_per_fat =
            u32::from_le_bytes([sector[0x24], sector[0x25], sector[0x26], sector[0x27]]) as u64;

        if bytes_per_sector == 0 || sectors_per_cluster == 0 {
            return None;
        }

        Some(Self {
            cluster_size: bytes_per_sector * sectors_per_cluster,
            data_region_start: (reserved_sectors + fat_count * sectors_per_fat) * bytes_per_sector,
        })
    }

    /// Geometry from an NTFS boot sector; clusters are volume-relative
    pub fn from_ntfs_boot_sector(sector: &[u8]) -> Option<Self> {
        if sector.len() < 512 || &sector[3..7] != b"NTFS" {
            return None;
        }

        let bytes_per_sector = u16::from_le_bytes([sector[0x0B], sector[0x0C]]) as u64;
        let sectors_per_cluster = sector[0x0D] as u64;
        if bytes_per_sector == 0 || sectors_per_cluster == 0 {
            return None;
        }

        Some(Self {
            cluster_size: bytes_per_sector * sectors_per_cluster,
            data_region_start: 0,
        })
    }
}

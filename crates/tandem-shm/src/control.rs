//! Control block shared between the master and its workers.
//!
//! The master publishes every allocation and shape decision here before it
//! launches a directive; workers read it back while applying the directive.
//! The record is never the array itself.
//!
//! Layout (little-endian):
//! - Offset 0x00: Magic `"TNDM"` (u32)
//! - Offset 0x04: Layout version (u32)
//! - Offset 0x08: Element type name, NUL padded ASCII (16 bytes)
//! - Offset 0x18: ndim (u32)
//! - Offset 0x1C: Reserved (u32)
//! - Offset 0x20: alloc_size in elements (u64)
//! - Offset 0x28: tag (u64)
//! - Offset 0x30: array ID (u64)
//! - Offset 0x38: shape, `MAX_NDIM` extents (u64 each)

use tracing::debug;

use crate::dtype::DType;
use crate::segment::{Segment, control_name};
use crate::{Result, ShmError};

/// Magic bytes identifying an initialized control block.
pub const CONTROL_MAGIC: u32 = u32::from_le_bytes(*b"TNDM");

/// Current control block layout version.
pub const CONTROL_VERSION: u32 = 1;

/// Largest rank the control block can describe.
pub const MAX_NDIM: usize = 16;

/// Width of the element type name field.
pub const DTYPE_FIELD_LEN: usize = 16;

const MAGIC_OFFSET: usize = 0x00;
const VERSION_OFFSET: usize = 0x04;
const DTYPE_OFFSET: usize = 0x08;
const NDIM_OFFSET: usize = 0x18;
const ALLOC_SIZE_OFFSET: usize = 0x20;
const TAG_OFFSET: usize = 0x28;
const ID_OFFSET: usize = 0x30;
const SHAPE_OFFSET: usize = 0x38;

/// Total size of the control block in bytes.
pub const CONTROL_BLOCK_SIZE: usize = SHAPE_OFFSET + MAX_NDIM * 8;

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Decoded contents of the control block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    /// Element type of the array named by `id`.
    pub dtype: DType,
    /// Rank of the array.
    pub ndim: usize,
    /// Logical extents, `ndim` entries.
    pub shape: Vec<usize>,
    /// Capacity of the current segment in elements.
    pub alloc_size: usize,
    /// Current segment version.
    pub tag: u64,
    /// Target array of the pending directive.
    pub id: u64,
}

/// The shared control record.
///
/// Field setters are only ever called by the master; workers use the
/// getters.
#[derive(Debug)]
pub struct ControlBlock {
    segment: Segment,
}

impl ControlBlock {
    /// Create and initialize the control block for a group.
    pub fn create(prefix: &str) -> Result<Self> {
        let mut segment = Segment::create(&control_name(prefix), CONTROL_BLOCK_SIZE)?;
        let data = segment.as_mut_slice();
        data.fill(0);
        write_u32(data, MAGIC_OFFSET, CONTROL_MAGIC);
        write_u32(data, VERSION_OFFSET, CONTROL_VERSION);
        debug!("Initialized control block {}", segment.name());
        Ok(Self { segment })
    }

    /// Attach to a group's control block, validating magic and version.
    pub fn attach(prefix: &str) -> Result<Self> {
        let segment = Segment::attach(&control_name(prefix), CONTROL_BLOCK_SIZE)?;
        let data = segment.as_slice();

        let magic = read_u32(data, MAGIC_OFFSET);
        if magic != CONTROL_MAGIC {
            return Err(ShmError::InvalidLayout(format!(
                "control block {} has magic {magic:#010x}",
                segment.name()
            )));
        }
        let version = read_u32(data, VERSION_OFFSET);
        if version != CONTROL_VERSION {
            return Err(ShmError::InvalidLayout(format!(
                "control block {} has layout version {version}, expected {CONTROL_VERSION}",
                segment.name()
            )));
        }
        Ok(Self { segment })
    }

    /// Name of the backing segment.
    pub fn name(&self) -> &str {
        self.segment.name()
    }

    /// Element type named in the record.
    pub fn dtype(&self) -> Result<DType> {
        let field = &self.segment.as_slice()[DTYPE_OFFSET..DTYPE_OFFSET + DTYPE_FIELD_LEN];
        let end = field.iter().position(|&b| b == 0).unwrap_or(DTYPE_FIELD_LEN);
        let name = std::str::from_utf8(&field[..end])
            .map_err(|e| ShmError::UnsupportedType(format!("non-UTF-8 type name: {e}")))?;
        name.parse()
    }

    /// Publish the element type.
    pub fn set_dtype(&mut self, dtype: DType) {
        let field =
            &mut self.segment.as_mut_slice()[DTYPE_OFFSET..DTYPE_OFFSET + DTYPE_FIELD_LEN];
        field.fill(0);
        let name = dtype.name().as_bytes();
        field[..name.len()].copy_from_slice(name);
    }

    /// Published rank.
    pub fn ndim(&self) -> usize {
        read_u32(self.segment.as_slice(), NDIM_OFFSET) as usize
    }

    /// Publish the rank.
    pub fn set_ndim(&mut self, ndim: usize) -> Result<()> {
        if ndim > MAX_NDIM {
            return Err(ShmError::RankTooLarge {
                ndim,
                max: MAX_NDIM,
            });
        }
        write_u32(self.segment.as_mut_slice(), NDIM_OFFSET, ndim as u32);
        Ok(())
    }

    /// The first `ndim` published extents.
    pub fn shape(&self) -> Vec<usize> {
        let data = self.segment.as_slice();
        (0..self.ndim().min(MAX_NDIM))
            .map(|i| read_u64(data, SHAPE_OFFSET + i * 8) as usize)
            .collect()
    }

    /// Publish logical extents into the leading shape slots.
    pub fn set_shape(&mut self, shape: &[usize]) -> Result<()> {
        if shape.len() > MAX_NDIM {
            return Err(ShmError::RankTooLarge {
                ndim: shape.len(),
                max: MAX_NDIM,
            });
        }
        let data = self.segment.as_mut_slice();
        for (i, &extent) in shape.iter().enumerate() {
            write_u64(data, SHAPE_OFFSET + i * 8, extent as u64);
        }
        Ok(())
    }

    /// Published capacity in elements.
    pub fn alloc_size(&self) -> usize {
        read_u64(self.segment.as_slice(), ALLOC_SIZE_OFFSET) as usize
    }

    /// Publish the capacity.
    pub fn set_alloc_size(&mut self, alloc_size: usize) {
        write_u64(self.segment.as_mut_slice(), ALLOC_SIZE_OFFSET, alloc_size as u64);
    }

    /// Published segment version.
    pub fn tag(&self) -> u64 {
        read_u64(self.segment.as_slice(), TAG_OFFSET)
    }

    /// Publish the segment version.
    pub fn set_tag(&mut self, tag: u64) {
        write_u64(self.segment.as_mut_slice(), TAG_OFFSET, tag);
    }

    /// Array targeted by the pending directive.
    pub fn id(&self) -> u64 {
        read_u64(self.segment.as_slice(), ID_OFFSET)
    }

    /// Publish the target array.
    pub fn set_id(&mut self, id: u64) {
        write_u64(self.segment.as_mut_slice(), ID_OFFSET, id);
    }

    /// Decode every field at once.
    pub fn snapshot(&self) -> Result<ControlRecord> {
        Ok(ControlRecord {
            dtype: self.dtype()?,
            ndim: self.ndim(),
            shape: self.shape(),
            alloc_size: self.alloc_size(),
            tag: self.tag(),
            id: self.id(),
        })
    }
}

//! Named POSIX shared-memory segments.
//!
//! A segment is a `shm_open` object mapped `MAP_SHARED` through `memmap2`.
//! The creator sizes it with `ftruncate` and is the only party that ever
//! unlinks the name; attachers map an existing object and leave the name
//! alone when they drop it.
//!
//! Names follow `/{prefix}_data_{id}_{tag}` for array storage and
//! `/{prefix}_sync` for the control block, so every process in a group
//! derives the same name from the same `(id, tag)` pair.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};

use libc::{O_CREAT, O_EXCL, O_RDWR, S_IRUSR, S_IWUSR};
use libc::{c_uint, mode_t, shm_open, shm_unlink};
use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, warn};

use crate::dtype::{DType, Element};
use crate::view::{ArrayView, ArrayViewMut, shape_size};
use crate::{Result, ShmError};

/// Name of the segment backing array `id` at version `tag`.
pub fn segment_name(prefix: &str, id: u64, tag: u64) -> String {
    format!("/{prefix}_data_{id}_{tag}")
}

/// Name of the control block segment for a group.
pub fn control_name(prefix: &str) -> String {
    format!("/{prefix}_sync")
}

/// Unlink the object `name` if it exists, whoever created it.
///
/// Returns whether an object was removed. Mappings held by other processes
/// stay valid; only the name goes away.
pub fn remove(name: &str) -> Result<bool> {
    let c_name = shm_cstring(name)?;
    match unlink_shm(&c_name) {
        Ok(()) => {
            warn!("Removed shared memory segment {name}");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ShmError::Allocation(format!("shm_unlink failed for {name}: {e}"))),
    }
}

/// A mapped shared-memory object.
pub struct Segment {
    map: MmapMut,
    /// Keeps the descriptor open for the lifetime of the mapping.
    _file: File,
    name: String,
    len: usize,
    owner: bool,
}

#[allow(unsafe_code)]
fn open_shm(name: &CString, flags: libc::c_int) -> io::Result<OwnedFd> {
    let fd = unsafe { shm_open(name.as_ptr(), flags, (S_IRUSR | S_IWUSR) as mode_t as c_uint) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: shm_open returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[allow(unsafe_code)]
fn unlink_shm(name: &CString) -> io::Result<()> {
    if unsafe { shm_unlink(name.as_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn shm_cstring(name: &str) -> Result<CString> {
    if !name.starts_with('/') || name[1..].contains('/') || name.len() > 255 {
        return Err(ShmError::Allocation(format!("invalid shm name: {name}")));
    }
    CString::new(name).map_err(|e| ShmError::Allocation(format!("invalid shm name: {e}")))
}

#[allow(unsafe_code)]
fn map(file: &File, len: usize, name: &str) -> Result<MmapMut> {
    // SAFETY: the mapping is shared with other processes by design; callers
    // coordinate access through the directive protocol.
    unsafe { MmapOptions::new().len(len).map_mut(file) }
        .map_err(|e| ShmError::Allocation(format!("mmap failed for {name}: {e}")))
}

impl Segment {
    /// Create a new segment of `len` bytes.
    ///
    /// Uses `O_CREAT | O_EXCL` with owner-only permissions (0600). A name
    /// that already exists is never taken over; use [`remove`] to clear an
    /// object left behind by a crashed group.
    pub fn create(name: &str, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(ShmError::Allocation(format!(
                "refusing to create zero-length segment {name}"
            )));
        }
        let c_name = shm_cstring(name)?;

        let fd = open_shm(&c_name, O_CREAT | O_EXCL | O_RDWR).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                ShmError::Allocation(format!("segment {name} already exists"))
            } else {
                ShmError::Allocation(format!("shm_open failed for {name}: {e}"))
            }
        })?;

        let file = File::from(fd);
        if let Err(e) = file.set_len(len as u64) {
            let _ = unlink_shm(&c_name);
            return Err(ShmError::Allocation(format!(
                "ftruncate failed for {name}: {e}"
            )));
        }

        let map = match map(&file, len, name) {
            Ok(map) => map,
            Err(e) => {
                let _ = unlink_shm(&c_name);
                return Err(e);
            }
        };

        debug!("Created segment {name} ({len} bytes)");
        Ok(Self {
            map,
            _file: file,
            name: name.to_string(),
            len,
            owner: true,
        })
    }

    /// Attach to an existing segment, mapping its first `len` bytes.
    pub fn attach(name: &str, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(ShmError::Allocation(format!(
                "refusing to attach zero-length view of {name}"
            )));
        }
        let c_name = shm_cstring(name)?;
        let fd = open_shm(&c_name, O_RDWR)
            .map_err(|e| ShmError::Allocation(format!("shm_open failed for {name}: {e}")))?;
        let file = File::from(fd);

        let actual = file
            .metadata()
            .map_err(|e| ShmError::Allocation(format!("fstat failed for {name}: {e}")))?
            .len();
        if actual < len as u64 {
            return Err(ShmError::Allocation(format!(
                "segment {name} holds {actual} bytes, {len} requested"
            )));
        }

        let map = map(&file, len, name)?;
        debug!("Attached segment {name} ({len} bytes)");
        Ok(Self {
            map,
            _file: file,
            name: name.to_string(),
            len,
            owner: false,
        })
    }

    /// Mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.map[..]
    }

    /// Mutable mapped bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map[..]
    }

    /// Size of the mapping in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty (never true for a live segment).
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// POSIX name of the segment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle created the segment and will unlink it.
    pub const fn is_owner(&self) -> bool {
        self.owner
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // The mapping and descriptor are released by their own drops.
        if self.owner
            && let Ok(c_name) = CString::new(self.name.clone())
        {
            match unlink_shm(&c_name) {
                Ok(()) => debug!("Unlinked segment {}", self.name),
                Err(e) => warn!("Failed to unlink segment {}: {e}", self.name),
            }
        }
    }
}

/// A segment holding `capacity` elements of one [`DType`].
#[derive(Debug)]
pub struct TypedSegment {
    segment: Segment,
    dtype: DType,
    capacity: usize,
}

/// Create (`create == true`) or attach to the segment `name`, sized for
/// `capacity` elements of `dtype`.
///
/// Fails with [`ShmError::Allocation`] when the byte size is zero or
/// overflows, or when the OS refuses the segment. Nothing is retried.
pub fn allocate(dtype: DType, capacity: usize, name: &str, create: bool) -> Result<TypedSegment> {
    let bytes = capacity.checked_mul(dtype.size_of()).ok_or_else(|| {
        ShmError::Allocation(format!("{capacity} x {dtype} overflows the address space"))
    })?;
    let segment = if create {
        Segment::create(name, bytes)?
    } else {
        Segment::attach(name, bytes)?
    };
    Ok(TypedSegment {
        segment,
        dtype,
        capacity,
    })
}

impl TypedSegment {
    /// Element type stored in the segment.
    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    /// Number of elements the segment holds.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Underlying untyped segment.
    pub const fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Raw bytes covering the full capacity.
    pub fn as_bytes(&self) -> &[u8] {
        &self.segment.as_slice()[..self.capacity * self.dtype.size_of()]
    }

    /// Mutable raw bytes covering the full capacity.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let bytes = self.capacity * self.dtype.size_of();
        &mut self.segment.as_mut_slice()[..bytes]
    }

    fn window(&self, shape: &[usize]) -> Result<(usize, Vec<usize>)> {
        if shape.is_empty() {
            return Ok((self.capacity, vec![self.capacity]));
        }
        let requested = shape_size(shape).ok_or(ShmError::ViewOutOfBounds {
            requested: usize::MAX,
            capacity: self.capacity,
        })?;
        if requested > self.capacity {
            return Err(ShmError::ViewOutOfBounds {
                requested,
                capacity: self.capacity,
            });
        }
        Ok((requested, shape.to_vec()))
    }

    fn check_type<T: Element>(&self) -> Result<()> {
        if T::DTYPE != self.dtype {
            return Err(ShmError::DTypeMismatch {
                expected: self.dtype,
                received: T::DTYPE,
            });
        }
        Ok(())
    }

    /// Typed view over the first `product(shape)` elements.
    ///
    /// The empty shape covers the whole buffer as one dimension.
    pub fn view_as<T: Element>(&self, shape: &[usize]) -> Result<ArrayView<'_, T>> {
        self.check_type::<T>()?;
        let (count, shape) = self.window(shape)?;
        let elements: &[T] = bytemuck::try_cast_slice(self.as_bytes())
            .map_err(|e| ShmError::InvalidLayout(format!("{}: {e}", self.segment.name())))?;
        Ok(ArrayView::new(&elements[..count], shape))
    }

    /// Mutable typed view over the first `product(shape)` elements.
    pub fn view_as_mut<T: Element>(&mut self, shape: &[usize]) -> Result<ArrayViewMut<'_, T>> {
        self.check_type::<T>()?;
        let (count, shape) = self.window(shape)?;
        let name = self.segment.name().to_string();
        let elements: &mut [T] = bytemuck::try_cast_slice_mut(self.as_bytes_mut())
            .map_err(|e| ShmError::InvalidLayout(format!("{name}: {e}")))?;
        Ok(ArrayViewMut::new(&mut elements[..count], shape))
    }
}

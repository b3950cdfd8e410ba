//! Host-side arrays used as input to shared arrays.
//!
//! A [`HostArray`] is ordinary process-local memory with a runtime element
//! type. It is what callers hand to [`Data::set_value`](crate::Data::set_value)
//! and what [`ArrayContainer::to_host`](crate::ArrayContainer::to_host)
//! copies a shared window into.

use tandem_shm::{DType, Element};

use crate::{ArrayError, Result};

/// Element count of a host shape; the empty shape is a scalar.
fn host_len(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// An [`Element`] that can be stored in [`HostData`].
pub trait HostElement: Element {
    /// Wrap owned values.
    fn into_data(values: Vec<Self>) -> HostData;

    /// Borrow the values if `data` holds this type.
    fn from_data(data: &HostData) -> Option<&[Self]>;
}

macro_rules! host_variants {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        /// Owned element storage with a runtime element type.
        #[derive(Debug, Clone, PartialEq)]
        pub enum HostData {
            $(
                #[allow(missing_docs)]
                $variant(Vec<$ty>),
            )*
        }

        impl HostData {
            /// Element type of the storage.
            pub const fn dtype(&self) -> DType {
                match self {
                    $(Self::$variant(_) => DType::$variant,)*
                }
            }

            /// Number of elements.
            pub fn len(&self) -> usize {
                match self {
                    $(Self::$variant(v) => v.len(),)*
                }
            }

            /// Whether there are no elements.
            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            fn cast_values<U: Element>(&self) -> Vec<U> {
                match self {
                    $(Self::$variant(v) => v.iter().map(|x| x.cast::<U>()).collect(),)*
                }
            }

            /// Convert every element to `dtype` with `as` semantics.
            pub fn cast(&self, dtype: DType) -> Self {
                if dtype == self.dtype() {
                    return self.clone();
                }
                match dtype {
                    $(DType::$variant => Self::$variant(self.cast_values::<$ty>()),)*
                }
            }

            /// Decode native-endian element bytes of type `dtype`.
            pub fn from_bytes(dtype: DType, bytes: &[u8]) -> Self {
                match dtype {
                    $(DType::$variant => {
                        Self::$variant(bytemuck::pod_collect_to_vec::<u8, $ty>(bytes))
                    })*
                }
            }

            /// Element bytes in native endianness.
            pub fn as_bytes(&self) -> &[u8] {
                match self {
                    $(Self::$variant(v) => bytemuck::cast_slice(v),)*
                }
            }
        }

        $(
            impl HostElement for $ty {
                fn into_data(values: Vec<Self>) -> HostData {
                    HostData::$variant(values)
                }

                fn from_data(data: &HostData) -> Option<&[Self]> {
                    match data {
                        HostData::$variant(v) => Some(v.as_slice()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

host_variants! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
}

/// A process-local, row-major array with a runtime element type.
#[derive(Debug, Clone, PartialEq)]
pub struct HostArray {
    shape: Vec<usize>,
    data: HostData,
}

impl HostArray {
    /// Build from typed values; `values.len()` must match `shape`.
    pub fn new<T: HostElement>(shape: &[usize], values: Vec<T>) -> Result<Self> {
        Self::from_data(shape, T::into_data(values))
    }

    /// Build from existing storage; the element count must match `shape`.
    pub fn from_data(shape: &[usize], data: HostData) -> Result<Self> {
        let expected = host_len(shape).ok_or_else(|| {
            ArrayError::InvalidParameter(format!("shape {shape:?} overflows usize"))
        })?;
        if expected != data.len() {
            return Err(ArrayError::InvalidParameter(format!(
                "shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// One-dimensional array over `values`.
    pub fn from_vec<T: HostElement>(values: Vec<T>) -> Self {
        Self {
            shape: vec![values.len()],
            data: T::into_data(values),
        }
    }

    /// Extents.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element type.
    pub const fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Underlying storage.
    pub const fn data(&self) -> &HostData {
        &self.data
    }

    /// Typed elements, if the array holds `T`.
    pub fn as_slice<T: HostElement>(&self) -> Option<&[T]> {
        T::from_data(&self.data)
    }

    /// Copy converted to `dtype` (narrowing allowed).
    #[must_use]
    pub fn cast(&self, dtype: DType) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.cast(dtype),
        }
    }

    /// Same elements under new extents with the same element count.
    pub fn reshape(self, shape: &[usize]) -> Result<Self> {
        Self::from_data(shape, self.data)
    }
}

impl<T: HostElement> From<Vec<T>> for HostArray {
    fn from(values: Vec<T>) -> Self {
        Self::from_vec(values)
    }
}

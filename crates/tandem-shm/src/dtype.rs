//! Supported element types and the promotion lattice between them.
//!
//! The set is closed: a name that does not parse into a [`DType`] is rejected
//! with [`ShmError::UnsupportedType`] before anything is allocated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ShmError;

/// Numeric element type of a shared array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Unsigned 32-bit integer
    UInt32,
    /// Unsigned 64-bit integer
    UInt64,
    /// IEEE 754 single precision
    Float32,
    /// IEEE 754 double precision
    Float64,
}

/// Numeric family of a [`DType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DTypeKind {
    /// Two's complement integers
    Signed,
    /// Unsigned integers
    Unsigned,
    /// Floating point
    Float,
}

/// Candidates for [`DType::common_type`], smallest first.
///
/// Within one byte width signed precedes unsigned precedes float, so
/// `common_type(Int16, UInt16)` is `Int32` and `common_type(UInt16, Float32)`
/// is `Float32`.
const PROMOTION_ORDER: [DType; 10] = [
    DType::Int8,
    DType::UInt8,
    DType::Int16,
    DType::UInt16,
    DType::Int32,
    DType::UInt32,
    DType::Float32,
    DType::Int64,
    DType::UInt64,
    DType::Float64,
];

impl DType {
    /// Every supported element type.
    pub const ALL: [Self; 10] = [
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::UInt8,
        Self::UInt16,
        Self::UInt32,
        Self::UInt64,
        Self::Float32,
        Self::Float64,
    ];

    /// Size of one element in bytes.
    pub const fn size_of(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Width of one element in bits.
    pub const fn bits(self) -> usize {
        self.size_of() * 8
    }

    /// Numeric family.
    pub const fn kind(self) -> DTypeKind {
        match self {
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 => DTypeKind::Signed,
            Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64 => DTypeKind::Unsigned,
            Self::Float32 | Self::Float64 => DTypeKind::Float,
        }
    }

    /// Canonical lowercase name, as written to the control block.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Whether every value of `self` is representable in `to`.
    ///
    /// - same family widens by bit width
    /// - unsigned to signed needs strictly more bits
    /// - integers of at most 16 bits fit `Float32`; every integer fits `Float64`
    /// - signed to unsigned and float to integer never qualify
    pub const fn can_cast_safely(self, to: Self) -> bool {
        match (self.kind(), to.kind()) {
            (DTypeKind::Signed, DTypeKind::Signed)
            | (DTypeKind::Unsigned, DTypeKind::Unsigned)
            | (DTypeKind::Float, DTypeKind::Float) => to.bits() >= self.bits(),
            (DTypeKind::Unsigned, DTypeKind::Signed) => to.bits() > self.bits(),
            (DTypeKind::Signed | DTypeKind::Unsigned, DTypeKind::Float) => {
                self.bits() <= 16 || matches!(to, Self::Float64)
            }
            (DTypeKind::Signed, DTypeKind::Unsigned)
            | (DTypeKind::Float, DTypeKind::Signed | DTypeKind::Unsigned) => false,
        }
    }

    /// Smallest type both `a` and `b` cast to safely.
    ///
    /// `Float64` accepts every type, so the lattice always has a join.
    pub fn common_type(a: Self, b: Self) -> Self {
        if a == b {
            return a;
        }
        PROMOTION_ORDER
            .into_iter()
            .find(|c| a.can_cast_safely(*c) && b.can_cast_safely(*c))
            .unwrap_or(Self::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = ShmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.name() == s)
            .ok_or_else(|| ShmError::UnsupportedType(s.to_string()))
    }
}

/// Widest representation of one element, used to convert between types with
/// the same results as a direct `as` cast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// Any signed integer
    Int(i64),
    /// Any unsigned integer
    UInt(u64),
    /// Any float
    Float(f64),
}

/// A native Rust type that can live in a shared segment.
pub trait Element: bytemuck::Pod + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Element type tag for this native type.
    const DTYPE: DType;

    /// Widen to a [`Scalar`] without loss.
    fn to_scalar(self) -> Scalar;

    /// Convert from a [`Scalar`] with `as` semantics (wrapping integers,
    /// saturating float-to-integer).
    fn from_scalar(value: Scalar) -> Self;

    /// Convert into another element type with `as` semantics.
    fn cast<U: Element>(self) -> U {
        U::from_scalar(self.to_scalar())
    }
}

macro_rules! impl_element {
    ($ty:ty, $dtype:ident, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$dtype;

            fn to_scalar(self) -> Scalar {
                Scalar::$variant(self.into())
            }

            #[allow(
                clippy::cast_possible_wrap,
                clippy::cast_lossless,
                clippy::cast_precision_loss,
                clippy::unnecessary_cast
            )]
            fn from_scalar(value: Scalar) -> Self {
                match value {
                    Scalar::Int(v) => v as Self,
                    Scalar::UInt(v) => v as Self,
                    Scalar::Float(v) => v as Self,
                }
            }
        }
    };
}

impl_element!(i8, Int8, Int);
impl_element!(i16, Int16, Int);
impl_element!(i32, Int32, Int);
impl_element!(i64, Int64, Int);
impl_element!(u8, UInt8, UInt);
impl_element!(u16, UInt16, UInt);
impl_element!(u32, UInt32, UInt);
impl_element!(u64, UInt64, UInt);
impl_element!(f32, Float32, Float);
impl_element!(f64, Float64, Float);

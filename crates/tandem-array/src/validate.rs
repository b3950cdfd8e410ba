//! Cross-array element type and rank validation.

use serde::{Deserialize, Serialize};
use tandem_shm::DType;

use crate::container::ArrayContainer;
use crate::exec::ExecutionChannel;
use crate::handle::Data;
use crate::host::HostElement;
use crate::{ArrayError, Result};

/// Anything with an element type and a rank.
pub trait ArrayInfo {
    /// Element type.
    fn dtype(&self) -> DType;

    /// Rank.
    fn ndim(&self) -> usize;
}

impl ArrayInfo for ArrayContainer {
    fn dtype(&self) -> DType {
        Self::dtype(self)
    }

    fn ndim(&self) -> usize {
        Self::ndim(self)
    }
}

impl<T: HostElement, C: ExecutionChannel> ArrayInfo for Data<T, C> {
    fn dtype(&self) -> DType {
        Self::dtype(self)
    }

    fn ndim(&self) -> usize {
        Self::ndim(self)
    }
}

/// What a consumer expects at one input position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySpec {
    /// Expected element type.
    pub dtype: DType,
    /// Expected rank.
    pub ndim: usize,
}

impl ArraySpec {
    /// Expectation of `ndim` dimensions of `dtype`.
    pub const fn new(dtype: DType, ndim: usize) -> Self {
        Self { dtype, ndim }
    }
}

impl From<(DType, usize)> for ArraySpec {
    fn from((dtype, ndim): (DType, usize)) -> Self {
        Self::new(dtype, ndim)
    }
}

impl ArrayInfo for ArraySpec {
    fn dtype(&self) -> DType {
        self.dtype
    }

    fn ndim(&self) -> usize {
        self.ndim
    }
}

/// Check `arrays` position by position against `expected`.
///
/// Element types must match exactly; no casting is considered. The first
/// offending position is reported.
pub fn check_compatibility(arrays: &[&dyn ArrayInfo], expected: &[ArraySpec]) -> Result<()> {
    if arrays.len() != expected.len() {
        return Err(ArrayError::InvalidParameter(format!(
            "{} arrays checked against {} expectations",
            arrays.len(),
            expected.len()
        )));
    }
    for (index, (array, spec)) in arrays.iter().zip(expected).enumerate() {
        if array.dtype() != spec.dtype {
            return Err(ArrayError::TypeMismatch {
                index,
                expected: spec.dtype,
                received: array.dtype(),
            });
        }
        if array.ndim() != spec.ndim {
            return Err(ArrayError::RankMismatch {
                index: Some(index),
                expected: spec.ndim,
                received: array.ndim(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_match() {
        let a = ArraySpec::new(DType::Float32, 2);
        let b = ArraySpec::new(DType::Int64, 1);
        assert!(check_compatibility(&[&a, &b], &[a, b]).is_ok());
        assert!(check_compatibility(&[], &[]).is_ok());
    }

    #[test]
    fn test_first_offender_is_reported() {
        let arrays = [
            ArraySpec::new(DType::Float32, 2),
            ArraySpec::new(DType::Float64, 1),
            ArraySpec::new(DType::Int8, 5),
        ];
        let expected = [
            ArraySpec::new(DType::Float32, 2),
            ArraySpec::new(DType::Float32, 1),
            ArraySpec::new(DType::Int8, 3),
        ];
        let refs: Vec<&dyn ArrayInfo> = arrays.iter().map(|a| a as &dyn ArrayInfo).collect();
        assert!(matches!(
            check_compatibility(&refs, &expected),
            Err(ArrayError::TypeMismatch {
                index: 1,
                expected: DType::Float32,
                received: DType::Float64,
            })
        ));
    }

    #[test]
    fn test_rank_mismatch() {
        let array = ArraySpec::new(DType::UInt16, 3);
        assert!(matches!(
            check_compatibility(&[&array], &[(DType::UInt16, 2).into()]),
            Err(ArrayError::RankMismatch {
                index: Some(0),
                expected: 2,
                received: 3,
            })
        ));
    }

    #[test]
    fn test_no_implicit_casting() {
        let array = ArraySpec::new(DType::Int8, 1);
        assert!(check_compatibility(&[&array], &[ArraySpec::new(DType::Int16, 1)]).is_err());
    }

    #[test]
    fn test_length_mismatch() {
        let array = ArraySpec::new(DType::Int8, 1);
        assert!(matches!(
            check_compatibility(&[&array], &[]),
            Err(ArrayError::InvalidParameter(_))
        ));
    }
}

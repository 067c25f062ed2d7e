//! Tensor values and their wire representation.
//!
//! On the wire a tensor is a `(bytes, shape, dtype)` triple. The triple with
//! all three fields empty is the canonical "absent" value: it decodes to
//! `None`, never to a zero-length array.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{NetError, Result};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    Float16,
    Float32,
    Float64,
    Int8,
    Int32,
    Int64,
    UInt8,
}

impl Dtype {
    /// Size of one element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            Dtype::Int8 | Dtype::UInt8 => 1,
            Dtype::Float16 => 2,
            Dtype::Float32 | Dtype::Int32 => 4,
            Dtype::Float64 | Dtype::Int64 => 8,
        }
    }

    /// Wire name of this dtype.
    pub fn as_str(self) -> &'static str {
        match self {
            Dtype::Float16 => "float16",
            Dtype::Float32 => "float32",
            Dtype::Float64 => "float64",
            Dtype::Int8 => "int8",
            Dtype::Int32 => "int32",
            Dtype::Int64 => "int64",
            Dtype::UInt8 => "uint8",
        }
    }

    /// Parse a wire dtype name.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "float16" => Ok(Dtype::Float16),
            "float32" => Ok(Dtype::Float32),
            "float64" => Ok(Dtype::Float64),
            "int8" => Ok(Dtype::Int8),
            "int32" => Ok(Dtype::Int32),
            "int64" => Ok(Dtype::Int64),
            "uint8" => Ok(Dtype::UInt8),
            other => Err(NetError::Decode(format!("unknown dtype {other:?}"))),
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete numeric array: validated dtype, shape, and raw element bytes
/// in native byte order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: Dtype,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl Tensor {
    /// Create a tensor from raw bytes, validating that the byte length
    /// matches `dtype size x product(shape)`.
    pub fn new(dtype: Dtype, shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        // Shapes arrive off the wire; the product must not wrap
        let expected = shape
            .iter()
            .try_fold(dtype.size_bytes(), |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| {
                NetError::Decode(format!("tensor shape {shape:?} overflows addressable size"))
            })?;
        if data.len() != expected {
            return Err(NetError::Decode(format!(
                "tensor byte length {} does not match {} x shape {:?} ({} expected)",
                data.len(),
                dtype,
                shape,
                expected
            )));
        }
        Ok(Self { dtype, shape, data })
    }

    /// Create an f32 tensor from element values.
    pub fn from_f32(values: &[f32], shape: &[usize]) -> Result<Self> {
        let mut data = Vec::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_ne_bytes());
        }
        Self::new(Dtype::Float32, shape.to_vec(), data)
    }

    /// Element values of an f32 tensor.
    pub fn to_f32(&self) -> Result<Vec<f32>> {
        if self.dtype != Dtype::Float32 {
            return Err(NetError::Decode(format!(
                "expected float32 tensor, got {}",
                self.dtype
            )));
        }
        Ok(self
            .data
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Total element count (product of the shape).
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Wire form of a tensor or its absence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorEnvelope {
    /// Raw element bytes
    pub data: Vec<u8>,

    /// Dimension sizes, outermost first
    pub shape: Vec<u64>,

    /// Wire dtype name
    pub dtype: String,
}

impl TensorEnvelope {
    /// The canonical absent value: all three fields empty.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Whether this is the canonical absent value.
    pub fn is_absent(&self) -> bool {
        self.data.is_empty() && self.shape.is_empty() && self.dtype.is_empty()
    }

    /// Encode a tensor into its wire triple.
    pub fn from_tensor(tensor: &Tensor) -> Self {
        Self {
            data: tensor.data().to_vec(),
            shape: tensor.shape().iter().map(|&d| d as u64).collect(),
            dtype: tensor.dtype().as_str().to_string(),
        }
    }

    /// Encode an optional tensor; `None` becomes the canonical absent triple.
    pub fn from_optional(tensor: Option<&Tensor>) -> Self {
        match tensor {
            Some(t) => Self::from_tensor(t),
            None => Self::absent(),
        }
    }

    /// Decode the triple. The canonical absent form yields `None`; anything
    /// else must reinterpret cleanly as the named dtype and shape.
    pub fn decode(&self) -> Result<Option<Tensor>> {
        if self.is_absent() {
            return Ok(None);
        }
        let dtype = Dtype::parse(&self.dtype)?;
        let shape: Vec<usize> = self.shape.iter().map(|&d| d as usize).collect();
        Tensor::new(dtype, shape, self.data.clone()).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_f32() {
        let tensor = Tensor::from_f32(&[1.0, 2.5, -3.25, 4.0, 0.0, 9.5], &[2, 3]).unwrap();
        let envelope = TensorEnvelope::from_tensor(&tensor);
        let decoded = envelope.decode().unwrap().unwrap();
        assert_eq!(decoded, tensor);
        assert_eq!(decoded.shape(), &[2, 3]);
        assert_eq!(decoded.to_f32().unwrap(), vec![1.0, 2.5, -3.25, 4.0, 0.0, 9.5]);
    }

    #[test]
    fn test_round_trip_int8() {
        let tensor = Tensor::new(Dtype::Int8, vec![4], vec![1, 2, 3, 255]).unwrap();
        let decoded = TensorEnvelope::from_tensor(&tensor).decode().unwrap().unwrap();
        assert_eq!(decoded, tensor);
    }

    #[test]
    fn test_round_trip_scalar() {
        // Shape [] with one element is a scalar, not the absent value
        let tensor = Tensor::from_f32(&[7.5], &[]).unwrap();
        let envelope = TensorEnvelope::from_tensor(&tensor);
        assert!(!envelope.is_absent());
        let decoded = envelope.decode().unwrap().unwrap();
        assert_eq!(decoded.num_elements(), 1);
        assert_eq!(decoded.to_f32().unwrap(), vec![7.5]);
    }

    #[test]
    fn test_absent_decodes_to_none() {
        let envelope = TensorEnvelope::absent();
        assert!(envelope.is_absent());
        assert!(envelope.decode().unwrap().is_none());
    }

    #[test]
    fn test_from_optional_none_is_absent() {
        assert!(TensorEnvelope::from_optional(None).is_absent());
    }

    #[test]
    fn test_zero_length_array_is_not_absent() {
        // A declared [0]-shaped tensor is a real (empty) array, distinct
        // from the absent triple
        let tensor = Tensor::new(Dtype::Float32, vec![0], vec![]).unwrap();
        let envelope = TensorEnvelope::from_tensor(&tensor);
        assert!(!envelope.is_absent());
        let decoded = envelope.decode().unwrap().unwrap();
        assert_eq!(decoded.num_elements(), 0);
    }

    #[test]
    fn test_length_mismatch_is_decode_error() {
        let envelope = TensorEnvelope {
            data: vec![0u8; 10],
            shape: vec![2, 2],
            dtype: "float32".to_string(),
        };
        assert!(matches!(envelope.decode(), Err(NetError::Decode(_))));
    }

    #[test]
    fn test_shape_product_overflow_is_decode_error() {
        // A shape whose element count wraps usize must be rejected, not
        // wrapped around to match some byte length
        let envelope = TensorEnvelope {
            data: vec![],
            shape: vec![1 << 32, 1 << 32, 2],
            dtype: "float32".to_string(),
        };
        assert!(matches!(envelope.decode(), Err(NetError::Decode(_))));

        let huge = usize::MAX / 2;
        assert!(matches!(
            Tensor::new(Dtype::Float64, vec![huge, huge], vec![]),
            Err(NetError::Decode(_))
        ));
    }

    #[test]
    fn test_unknown_dtype_is_decode_error() {
        let envelope = TensorEnvelope {
            data: vec![0u8; 4],
            shape: vec![1],
            dtype: "complex128".to_string(),
        };
        assert!(matches!(envelope.decode(), Err(NetError::Decode(_))));
    }

    #[test]
    fn test_dtype_names() {
        for dtype in [
            Dtype::Float16,
            Dtype::Float32,
            Dtype::Float64,
            Dtype::Int8,
            Dtype::Int32,
            Dtype::Int64,
            Dtype::UInt8,
        ] {
            assert_eq!(Dtype::parse(dtype.as_str()).unwrap(), dtype);
        }
    }

    #[test]
    fn test_to_f32_wrong_dtype() {
        let tensor = Tensor::new(Dtype::Int8, vec![2], vec![1, 2]).unwrap();
        assert!(tensor.to_f32().is_err());
    }
}

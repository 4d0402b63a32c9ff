//! Stack descriptors and materialized sample data

use std::collections::HashMap;

use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use serde::{Deserialize, Serialize};

use crate::compression::Compression;
use crate::types::{AxisDescriptor, DataType};
use crate::utils::{element_count, format_bytes};

/// Everything known about a stack before its payload is touched
///
/// Descriptors come out of the header scan, so listing them never reads
/// payload bytes. Unknown data type or compression codes leave the
/// matching field `None`; such stacks list fine but refuse to
/// materialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDescriptor {
    /// Zero-based position in file order
    pub index: usize,

    /// Stack name; may be empty and need not be unique
    pub name: String,

    /// Free-form stack description
    pub description: String,

    /// Stack record format version
    pub format_version: u32,

    /// Samples per axis, one entry per axis
    pub shape: Vec<usize>,

    /// Declared sample type, `None` when the code is unknown
    pub data_type: Option<DataType>,

    /// Declared payload compression, `None` when the code is unknown
    pub compression: Option<Compression>,

    /// Per-axis calibration, same length as `shape`
    pub axes: Vec<AxisDescriptor>,

    /// Footer tag dictionary, empty when the stack carries none
    pub tags: HashMap<String, String>,
}

impl StackDescriptor {
    /// Number of axes
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of samples, `None` when the product overflows
    pub fn element_count(&self) -> Option<usize> {
        element_count(&self.shape)
    }

    /// Size in bytes of the materialized samples, `None` for unknown
    /// data types or overflowing shapes
    pub fn size_in_bytes(&self) -> Option<usize> {
        let data_type = self.data_type?;
        self.element_count()?.checked_mul(data_type.size_in_bytes())
    }

    /// Get a summary string of the stack
    pub fn summary(&self) -> String {
        let shape_str = if self.shape.is_empty() {
            "?".to_string()
        } else {
            self.shape
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" x ")
        };
        let type_str = match self.data_type {
            Some(data_type) => data_type.to_string(),
            None => "unknown type".to_string(),
        };
        let size_str = match self.size_in_bytes() {
            Some(bytes) => format_bytes(bytes as u64),
            None => "unknown size".to_string(),
        };

        format!(
            "Stack {} {:?}: {} ({}), {}",
            self.index, self.name, shape_str, type_str, size_str
        )
    }
}

/// Materialized samples of one stack, one variant per sample type
///
/// Arrays carry the declared shape with the first axis varying fastest
/// in memory, matching the order samples are stored in the container.
#[derive(Debug, Clone, PartialEq)]
pub enum StackData {
    UInt8(ArrayD<u8>),
    Int8(ArrayD<i8>),
    UInt16(ArrayD<u16>),
    Int16(ArrayD<i16>),
    UInt32(ArrayD<u32>),
    Int32(ArrayD<i32>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
}

impl StackData {
    /// Decode little-endian sample bytes into a typed array of the given
    /// shape. `bytes` must hold exactly the number of samples the shape
    /// implies; the caller has validated this against the payload.
    pub(crate) fn from_le_bytes(
        data_type: DataType,
        bytes: &[u8],
        shape: &[usize],
    ) -> Result<Self, ndarray::ShapeError> {
        let dims = IxDyn(shape).f();
        Ok(match data_type {
            DataType::UInt8 => StackData::UInt8(ArrayD::from_shape_vec(dims, bytes.to_vec())?),
            DataType::Int8 => StackData::Int8(ArrayD::from_shape_vec(
                dims,
                bytes.iter().map(|&b| b as i8).collect(),
            )?),
            DataType::UInt16 => StackData::UInt16(ArrayD::from_shape_vec(
                dims,
                bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes(c.try_into().unwrap()))
                    .collect(),
            )?),
            DataType::Int16 => StackData::Int16(ArrayD::from_shape_vec(
                dims,
                bytes
                    .chunks_exact(2)
                    .map(|c| i16::from_le_bytes(c.try_into().unwrap()))
                    .collect(),
            )?),
            DataType::UInt32 => StackData::UInt32(ArrayD::from_shape_vec(
                dims,
                bytes
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                    .collect(),
            )?),
            DataType::Int32 => StackData::Int32(ArrayD::from_shape_vec(
                dims,
                bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
                    .collect(),
            )?),
            DataType::Float32 => StackData::Float32(ArrayD::from_shape_vec(
                dims,
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
                    .collect(),
            )?),
            DataType::Float64 => StackData::Float64(ArrayD::from_shape_vec(
                dims,
                bytes
                    .chunks_exact(8)
                    .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
                    .collect(),
            )?),
        })
    }

    /// The sample type held by this variant
    pub fn data_type(&self) -> DataType {
        match self {
            StackData::UInt8(_) => DataType::UInt8,
            StackData::Int8(_) => DataType::Int8,
            StackData::UInt16(_) => DataType::UInt16,
            StackData::Int16(_) => DataType::Int16,
            StackData::UInt32(_) => DataType::UInt32,
            StackData::Int32(_) => DataType::Int32,
            StackData::Float32(_) => DataType::Float32,
            StackData::Float64(_) => DataType::Float64,
        }
    }

    /// Samples per axis
    pub fn shape(&self) -> &[usize] {
        match self {
            StackData::UInt8(a) => a.shape(),
            StackData::Int8(a) => a.shape(),
            StackData::UInt16(a) => a.shape(),
            StackData::Int16(a) => a.shape(),
            StackData::UInt32(a) => a.shape(),
            StackData::Int32(a) => a.shape(),
            StackData::Float32(a) => a.shape(),
            StackData::Float64(a) => a.shape(),
        }
    }

    /// Total number of samples
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    /// Check if the stack holds no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The samples as u8, `None` when the stack holds another type
    pub fn as_u8(&self) -> Option<&ArrayD<u8>> {
        match self {
            StackData::UInt8(a) => Some(a),
            _ => None,
        }
    }

    /// The samples as i8, `None` when the stack holds another type
    pub fn as_i8(&self) -> Option<&ArrayD<i8>> {
        match self {
            StackData::Int8(a) => Some(a),
            _ => None,
        }
    }

    /// The samples as u16, `None` when the stack holds another type
    pub fn as_u16(&self) -> Option<&ArrayD<u16>> {
        match self {
            StackData::UInt16(a) => Some(a),
            _ => None,
        }
    }

    /// The samples as i16, `None` when the stack holds another type
    pub fn as_i16(&self) -> Option<&ArrayD<i16>> {
        match self {
            StackData::Int16(a) => Some(a),
            _ => None,
        }
    }

    /// The samples as u32, `None` when the stack holds another type
    pub fn as_u32(&self) -> Option<&ArrayD<u32>> {
        match self {
            StackData::UInt32(a) => Some(a),
            _ => None,
        }
    }

    /// The samples as i32, `None` when the stack holds another type
    pub fn as_i32(&self) -> Option<&ArrayD<i32>> {
        match self {
            StackData::Int32(a) => Some(a),
            _ => None,
        }
    }

    /// The samples as f32, `None` when the stack holds another type
    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            StackData::Float32(a) => Some(a),
            _ => None,
        }
    }

    /// The samples as f64, `None` when the stack holds another type
    pub fn as_f64(&self) -> Option<&ArrayD<f64>> {
        match self {
            StackData::Float64(a) => Some(a),
            _ => None,
        }
    }

    /// All samples converted to f64, lossless for every supported type
    pub fn to_f64(&self) -> ArrayD<f64> {
        match self {
            StackData::UInt8(a) => a.mapv(f64::from),
            StackData::Int8(a) => a.mapv(f64::from),
            StackData::UInt16(a) => a.mapv(f64::from),
            StackData::Int16(a) => a.mapv(f64::from),
            StackData::UInt32(a) => a.mapv(f64::from),
            StackData::Int32(a) => a.mapv(f64::from),
            StackData::Float32(a) => a.mapv(f64::from),
            StackData::Float64(a) => a.clone(),
        }
    }
}

/// A fully materialized stack: its descriptor plus decoded samples
#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    descriptor: StackDescriptor,
    data: StackData,
}

impl Stack {
    pub(crate) fn new(descriptor: StackDescriptor, data: StackData) -> Self {
        Self { descriptor, data }
    }

    /// The descriptor this stack was materialized from
    pub fn descriptor(&self) -> &StackDescriptor {
        &self.descriptor
    }

    /// Stack name
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Samples per axis
    pub fn shape(&self) -> &[usize] {
        &self.descriptor.shape
    }

    /// Per-axis calibration
    pub fn axes(&self) -> &[AxisDescriptor] {
        &self.descriptor.axes
    }

    /// Sample type of the decoded data
    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    /// The decoded samples
    pub fn data(&self) -> &StackData {
        &self.data
    }

    /// Consume the stack and keep only the decoded samples
    pub fn into_data(self) -> StackData {
        self.data
    }
}

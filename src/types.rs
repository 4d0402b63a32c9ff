//! Core data types for OBF stacks

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample types a stack can declare.
///
/// Discriminants are the codes stored in the stack header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum DataType {
    /// Unsigned 8-bit integer
    UInt8 = 0x01,
    /// Signed 8-bit integer
    Int8 = 0x02,
    /// Unsigned 16-bit integer
    UInt16 = 0x04,
    /// Signed 16-bit integer
    Int16 = 0x08,
    /// Unsigned 32-bit integer
    UInt32 = 0x10,
    /// Signed 32-bit integer
    Int32 = 0x20,
    /// 32-bit floating point
    Float32 = 0x40,
    /// 64-bit floating point
    Float64 = 0x80,
}

impl DataType {
    /// Parse a header code, `None` for codes this reader does not know.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x01 => Some(DataType::UInt8),
            0x02 => Some(DataType::Int8),
            0x04 => Some(DataType::UInt16),
            0x08 => Some(DataType::Int16),
            0x10 => Some(DataType::UInt32),
            0x20 => Some(DataType::Int32),
            0x40 => Some(DataType::Float32),
            0x80 => Some(DataType::Float64),
            _ => None,
        }
    }

    /// The header code of this data type
    pub fn code(&self) -> u32 {
        *self as u32
    }

    /// Size in bytes of one sample
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::UInt8 | DataType::Int8 => 1,
            DataType::UInt16 | DataType::Int16 => 2,
            DataType::UInt32 | DataType::Int32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Check if this is an integer type
    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Axis descriptor with sample count and physical calibration
///
/// Lengths and offsets come from the stack header. The unit and label come
/// from the stack footer and stay empty for stack versions that do not
/// record them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisDescriptor {
    /// Number of samples along this axis
    pub num_samples: usize,
    /// Physical length covered by this axis
    pub length: f64,
    /// Physical coordinate of the first sample
    pub offset: f64,
    /// Unit of measurement (e.g., "m", "s"), empty when not recorded
    pub unit: String,
    /// Axis label (e.g., "ExpControl X"), empty when not recorded
    pub label: String,
}

impl AxisDescriptor {
    /// Create a new axis descriptor without unit or label
    pub fn new(num_samples: usize, length: f64, offset: f64) -> Self {
        Self {
            num_samples,
            length,
            offset,
            unit: String::new(),
            label: String::new(),
        }
    }

    /// Physical distance between neighboring samples
    ///
    /// Axes without samples report 0.0.
    pub fn pixel_size(&self) -> f64 {
        if self.num_samples == 0 {
            0.0
        } else {
            self.length / self.num_samples as f64
        }
    }

    /// Convert sample index to physical coordinate
    pub fn index_to_coord(&self, index: usize) -> f64 {
        self.offset + index as f64 * self.pixel_size()
    }

    /// Convert physical coordinate to sample index (nearest)
    pub fn coord_to_index(&self, coord: f64) -> usize {
        let step = self.pixel_size();
        if self.num_samples == 0 || step == 0.0 {
            return 0;
        }
        let normalized = (coord - self.offset) / step;
        normalized
            .round()
            .max(0.0)
            .min((self.num_samples - 1) as f64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_codes() {
        assert_eq!(DataType::from_code(0x01), Some(DataType::UInt8));
        assert_eq!(DataType::from_code(0x08), Some(DataType::Int16));
        assert_eq!(DataType::from_code(0x80), Some(DataType::Float64));
        assert_eq!(DataType::from_code(0x100), None);
        assert_eq!(DataType::from_code(0), None);

        for code in [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80] {
            assert_eq!(DataType::from_code(code).unwrap().code(), code);
        }
    }

    #[test]
    fn test_data_type_sizes() {
        assert_eq!(DataType::UInt8.size_in_bytes(), 1);
        assert_eq!(DataType::UInt16.size_in_bytes(), 2);
        assert_eq!(DataType::Float32.size_in_bytes(), 4);
        assert_eq!(DataType::Float64.size_in_bytes(), 8);
        assert!(DataType::Float32.is_float());
        assert!(DataType::Int32.is_integer());
    }

    #[test]
    fn test_axis_pixel_size() {
        let axis = AxisDescriptor::new(100, 1.0e-5, 0.0);
        assert_eq!(axis.pixel_size(), 1.0e-7);

        let empty = AxisDescriptor::new(0, 1.0, 0.0);
        assert_eq!(empty.pixel_size(), 0.0);
    }

    #[test]
    fn test_axis_coordinate_mapping() {
        let axis = AxisDescriptor::new(100, 1000.0, -500.0);
        assert_eq!(axis.pixel_size(), 10.0);
        assert_eq!(axis.index_to_coord(0), -500.0);
        assert_eq!(axis.index_to_coord(50), 0.0);
        assert_eq!(axis.coord_to_index(0.0), 50);
        assert_eq!(axis.coord_to_index(-10000.0), 0);
        assert_eq!(axis.coord_to_index(10000.0), 99);
    }
}

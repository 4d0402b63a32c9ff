//! Reader for OBF/MSR containers
//!
//! A pure Rust reader for the OBF binary container format used by
//! microscope acquisition software for multi-dimensional image stacks.
//! A container holds a chain of stacks; each stack carries a shape of up
//! to five axes, calibrated axis descriptors and a raw or
//! zlib-compressed payload.
//!
//! # Features
//!
//! - All eight sample types, decoded into `ndarray` arrays
//! - Raw and zlib-compressed payloads
//! - Versioned stack footers: SI axis units, axis labels, tag dictionaries
//! - Lazy payload access: opening a file reads headers and footers only
//! - Defective stacks are isolated, the rest of the container stays readable
//!
//! # Example
//!
//! ```rust,ignore
//! use obf::ObfFile;
//!
//! fn main() -> obf::Result<()> {
//!     let file = ObfFile::open("measurement.msr")?;
//!     for descriptor in file.stacks() {
//!         println!("{}", descriptor.summary());
//!     }
//!
//!     let stack = file.stack(0)?;
//!     if let Some(image) = stack.data().as_u16() {
//!         println!("first sample: {}", image[[0, 0]]);
//!     }
//!     Ok(())
//! }
//! ```

pub mod compression;
pub mod error;
pub mod file;
pub mod format;
mod metadata;
pub mod stack;
pub mod types;
mod utils;

// Re-exports
pub use compression::Compression;
pub use error::{ObfError, Result};
pub use file::{ObfFile, StackSelector};
pub use format::{FILE_MAGIC, MAX_RANK, OBF_MAX_DIMENSIONS, STACK_MAGIC};
pub use stack::{Stack, StackData, StackDescriptor};
pub use types::{AxisDescriptor, DataType};

/// Version of this reader
pub const OBF_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!OBF_VERSION.is_empty());
    }
}

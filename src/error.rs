//! Error types for OBF operations

use thiserror::Error;

use crate::file::StackSelector;

/// Main error type for OBF operations
#[derive(Error, Debug)]
pub enum ObfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid OBF format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported OBF format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Truncated input: {what} at byte {offset} needs {needed} bytes")]
    Truncated {
        what: &'static str,
        offset: u64,
        needed: u64,
    },

    #[error("No stack matches {0}")]
    UnknownStack(StackSelector),

    #[error("Stack {index} ({name:?}): unsupported compression code {code}")]
    UnsupportedCompression {
        index: usize,
        name: String,
        code: u32,
    },

    #[error("Stack {index} ({name:?}): unsupported data type code {code:#x}")]
    UnsupportedDataType {
        index: usize,
        name: String,
        code: u32,
    },

    #[error("Stack {index} ({name:?}): {reason}")]
    UnsupportedStack {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("Stack {index} ({name:?}): corrupt payload: {reason}")]
    CorruptPayload {
        index: usize,
        name: String,
        reason: String,
    },
}

/// Specialized Result type for OBF operations
pub type Result<T> = std::result::Result<T, ObfError>;

//! Byte-level layout of the OBF container.
//!
//! OBF is a little-endian format. A file opens with a fixed header that
//! points at the first stack record; stack records form a singly linked
//! list through `next_stack_pos`, with 0 terminating the chain. Every
//! per-axis field in a stack header has [`OBF_MAX_DIMENSIONS`] slots no
//! matter what the stack's rank is.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ObfError, Result};

/// Signature opening every OBF/MSR container.
pub const FILE_MAGIC: [u8; 10] = *b"OMAS_BF\n\xff\xff";

/// Signature opening every stack record.
pub const STACK_MAGIC: [u8; 16] = *b"OMAS_BF_STACK\n\xff\xff";

/// Highest container format version this reader understands.
pub const MAX_FILE_VERSION: u32 = 2;

/// Highest stack format version whose footer layout is fully known.
pub const MAX_STACK_VERSION: u32 = 6;

/// Number of axis slots in a stack header.
pub const OBF_MAX_DIMENSIONS: usize = 15;

/// Highest rank a stack may have after trailing length-1 axes are folded
/// away. Stacks above this rank are listed but refuse to materialize.
pub const MAX_RANK: usize = 5;

/// File header field byte offsets.
mod file_offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 10;
    pub const FIRST_STACK_POS: usize = 14;
    pub const DESCR_LEN: usize = 22;
}

/// Size in bytes of the fixed file header. The file description follows
/// it, then (format version 2 and up) a u64 metadata position.
pub const FILE_HEADER_LEN: usize = 26;

/// Stack header field byte offsets.
mod stack_offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 16;
    pub const RANK: usize = 20;
    pub const RES: usize = 24;
    pub const LEN: usize = 84;
    pub const OFF: usize = 204;
    pub const DATA_TYPE: usize = 324;
    pub const COMPRESSION_TYPE: usize = 328;
    pub const COMPRESSION_LEVEL: usize = 332;
    pub const NAME_LEN: usize = 336;
    pub const DESCR_LEN: usize = 340;
    #[allow(dead_code)]
    pub const RESERVED: usize = 344;
    pub const DATA_LEN_DISK: usize = 352;
    pub const NEXT_STACK_POS: usize = 360;
}

/// Size in bytes of the fixed stack header. The stack name, the stack
/// description, the payload, and (stack version 1 and up) the footer
/// follow it in that order.
pub const STACK_HEADER_LEN: usize = 368;

/// Fixed portion of the container header.
#[derive(Debug, Clone)]
pub struct FileHeader {
    /// Container format version (0, 1 or 2)
    pub format_version: u32,
    /// Absolute position of the first stack record, 0 when the container
    /// holds no stacks
    pub first_stack_pos: u64,
    /// Length in bytes of the description that follows the fixed header
    pub descr_len: u32,
}

impl FileHeader {
    /// Parse the fixed header from exactly [`FILE_HEADER_LEN`] bytes.
    ///
    /// Rejects inputs without the OBF signature and versions newer than
    /// [`MAX_FILE_VERSION`], whose layout is unknown.
    pub fn parse(buf: &[u8; FILE_HEADER_LEN]) -> Result<Self> {
        if buf[file_offsets::MAGIC..file_offsets::FORMAT_VERSION] != FILE_MAGIC {
            return Err(ObfError::InvalidFormat(
                "missing OMAS_BF signature, not an OBF/MSR file".to_string(),
            ));
        }
        let format_version = LittleEndian::read_u32(&buf[file_offsets::FORMAT_VERSION..]);
        if format_version > MAX_FILE_VERSION {
            return Err(ObfError::UnsupportedVersion(format_version));
        }
        Ok(Self {
            format_version,
            first_stack_pos: LittleEndian::read_u64(&buf[file_offsets::FIRST_STACK_POS..]),
            descr_len: LittleEndian::read_u32(&buf[file_offsets::DESCR_LEN..]),
        })
    }

    /// Whether a u64 metadata position trails the file description.
    pub fn has_metadata_position(&self) -> bool {
        self.format_version >= 2
    }
}

/// Fixed portion of a stack record header.
///
/// The reserved u64 between `descr_len` and `data_len_disk` is skipped.
#[derive(Debug, Clone)]
pub struct StackHeader {
    /// Stack record format version (0 through 6 in files seen so far)
    pub format_version: u32,
    /// Number of axes actually in use
    pub rank: u32,
    /// Samples per axis, slots past `rank` are zero
    pub res: [u32; OBF_MAX_DIMENSIONS],
    /// Physical length per axis
    pub len: [f64; OBF_MAX_DIMENSIONS],
    /// Physical offset per axis
    pub off: [f64; OBF_MAX_DIMENSIONS],
    /// Sample type code
    pub data_type: u32,
    /// Payload compression code
    pub compression_type: u32,
    /// Compression level the writer used, informational only
    pub compression_level: u32,
    /// Length in bytes of the stack name
    pub name_len: u32,
    /// Length in bytes of the stack description
    pub descr_len: u32,
    /// Payload length in bytes as stored on disk
    pub data_len_disk: u64,
    /// Absolute position of the next stack record, 0 terminates the chain
    pub next_stack_pos: u64,
}

impl StackHeader {
    /// Parse the fixed header from exactly [`STACK_HEADER_LEN`] bytes.
    ///
    /// Returns `None` when the stack signature is absent, which means the
    /// record chain is broken at this position.
    pub fn parse(buf: &[u8; STACK_HEADER_LEN]) -> Option<Self> {
        if buf[stack_offsets::MAGIC..stack_offsets::FORMAT_VERSION] != STACK_MAGIC {
            return None;
        }
        let mut res = [0u32; OBF_MAX_DIMENSIONS];
        LittleEndian::read_u32_into(&buf[stack_offsets::RES..stack_offsets::LEN], &mut res);
        let mut len = [0f64; OBF_MAX_DIMENSIONS];
        LittleEndian::read_f64_into(&buf[stack_offsets::LEN..stack_offsets::OFF], &mut len);
        let mut off = [0f64; OBF_MAX_DIMENSIONS];
        LittleEndian::read_f64_into(&buf[stack_offsets::OFF..stack_offsets::DATA_TYPE], &mut off);
        Some(Self {
            format_version: LittleEndian::read_u32(&buf[stack_offsets::FORMAT_VERSION..]),
            rank: LittleEndian::read_u32(&buf[stack_offsets::RANK..]),
            res,
            len,
            off,
            data_type: LittleEndian::read_u32(&buf[stack_offsets::DATA_TYPE..]),
            compression_type: LittleEndian::read_u32(&buf[stack_offsets::COMPRESSION_TYPE..]),
            compression_level: LittleEndian::read_u32(&buf[stack_offsets::COMPRESSION_LEVEL..]),
            name_len: LittleEndian::read_u32(&buf[stack_offsets::NAME_LEN..]),
            descr_len: LittleEndian::read_u32(&buf[stack_offsets::DESCR_LEN..]),
            data_len_disk: LittleEndian::read_u64(&buf[stack_offsets::DATA_LEN_DISK..]),
            next_stack_pos: LittleEndian::read_u64(&buf[stack_offsets::NEXT_STACK_POS..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_header_bytes(version: u32, first_stack_pos: u64, descr_len: u32) -> [u8; FILE_HEADER_LEN] {
        let mut buf = [0u8; FILE_HEADER_LEN];
        buf[..10].copy_from_slice(&FILE_MAGIC);
        LittleEndian::write_u32(&mut buf[10..], version);
        LittleEndian::write_u64(&mut buf[14..], first_stack_pos);
        LittleEndian::write_u32(&mut buf[22..], descr_len);
        buf
    }

    #[test]
    fn file_header_round_trip() {
        let header = FileHeader::parse(&file_header_bytes(1, 26, 5)).unwrap();
        assert_eq!(header.format_version, 1);
        assert_eq!(header.first_stack_pos, 26);
        assert_eq!(header.descr_len, 5);
        assert!(!header.has_metadata_position());
        assert!(FileHeader::parse(&file_header_bytes(2, 0, 0))
            .unwrap()
            .has_metadata_position());
    }

    #[test]
    fn file_header_rejects_bad_magic() {
        let mut buf = file_header_bytes(1, 26, 0);
        buf[0] = b'X';
        assert!(matches!(
            FileHeader::parse(&buf),
            Err(ObfError::InvalidFormat(_))
        ));
    }

    #[test]
    fn file_header_rejects_future_version() {
        assert!(matches!(
            FileHeader::parse(&file_header_bytes(3, 26, 0)),
            Err(ObfError::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn stack_header_round_trip() {
        let mut buf = [0u8; STACK_HEADER_LEN];
        buf[..16].copy_from_slice(&STACK_MAGIC);
        LittleEndian::write_u32(&mut buf[16..], 4); // format_version
        LittleEndian::write_u32(&mut buf[20..], 2); // rank
        LittleEndian::write_u32(&mut buf[24..], 640); // res[0]
        LittleEndian::write_u32(&mut buf[28..], 480); // res[1]
        LittleEndian::write_f64(&mut buf[84..], 6.4e-5); // len[0]
        LittleEndian::write_f64(&mut buf[204..], -3.2e-5); // off[0]
        LittleEndian::write_u32(&mut buf[324..], 4); // data_type: u16
        LittleEndian::write_u32(&mut buf[328..], 1); // compression_type
        LittleEndian::write_u32(&mut buf[336..], 5); // name_len
        LittleEndian::write_u32(&mut buf[340..], 11); // descr_len
        LittleEndian::write_u64(&mut buf[352..], 9999); // data_len_disk
        LittleEndian::write_u64(&mut buf[360..], 123456); // next_stack_pos

        let header = StackHeader::parse(&buf).unwrap();
        assert_eq!(header.format_version, 4);
        assert_eq!(header.rank, 2);
        assert_eq!(header.res[..2], [640, 480]);
        assert_eq!(header.res[2], 0);
        assert_eq!(header.len[0], 6.4e-5);
        assert_eq!(header.off[0], -3.2e-5);
        assert_eq!(header.data_type, 4);
        assert_eq!(header.compression_type, 1);
        assert_eq!(header.name_len, 5);
        assert_eq!(header.descr_len, 11);
        assert_eq!(header.data_len_disk, 9999);
        assert_eq!(header.next_stack_pos, 123456);
    }

    #[test]
    fn stack_header_requires_magic() {
        let buf = [0u8; STACK_HEADER_LEN];
        assert!(StackHeader::parse(&buf).is_none());
    }
}

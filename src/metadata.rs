//! Stack footer metadata
//!
//! Stack versions 1 and up append a footer after the payload: a fixed
//! part whose usable fields depend on the stack's format version, then a
//! variable part holding axis sample positions, axis labels and a tag
//! dictionary. The footer carries everything the header does not: SI
//! units per axis, human-readable axis labels, and free-form key-value
//! tags (Imspector keeps its acquisition state here as XML).

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};

use crate::format::OBF_MAX_DIMENSIONS;

/// Footer fixed-part field byte offsets, relative to the footer start.
pub(crate) mod footer_offsets {
    pub const SIZE: usize = 0;
    pub const HAS_COL_POSITIONS: usize = 4;
    pub const HAS_COL_LABELS: usize = 64;
    pub const OBSOLETE_METADATA_LEN: usize = 124;
    pub const SI_VALUE: usize = 132;
    pub const SI_DIMENSIONS: usize = 140;
    pub const NUM_FLUSH_POINTS: usize = 1340;
    pub const FLUSH_BLOCK_SIZE: usize = 1348;
    pub const TAG_DICTIONARY_LEN: usize = 1356;
    pub const STACK_END_DISK: usize = 1364;
    pub const MIN_FORMAT_VERSION: usize = 1372;
    pub const STACK_END_USED_DISK: usize = 1376;
    pub const SAMPLES_WRITTEN: usize = 1384;
    pub const NUM_CHUNK_POSITIONS: usize = 1392;

    /// Fixed-part length per stack format version.
    pub const V1_LEN: usize = 132;
    pub const V2_LEN: usize = 1340;
    pub const V3_LEN: usize = 1356;
    pub const V4_LEN: usize = 1364;
    pub const V5_LEN: usize = 1384;
    pub const V6_LEN: usize = 1400;
}

/// Largest fixed footer this reader parses fields from. Writers may
/// append fields past this; `size` still positions the variable part.
pub(crate) const FOOTER_MAX_LEN: usize = footer_offsets::V6_LEN;

/// Ratio of two integers, the exponent form used for SI units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct SiFraction {
    pub num: i32,
    pub den: i32,
}

impl SiFraction {
    /// Sign-normalized (numerator, denominator) with a positive
    /// denominator. A zero denominator is treated as 1.
    fn normalized(&self) -> (i32, i32) {
        match self.den {
            0 => (self.num, 1),
            d if d < 0 => (-self.num, -d),
            d => (self.num, d),
        }
    }
}

/// SI unit of one axis: an exponent per base unit plus a scale factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SiUnit {
    /// Exponents over meter, kilogram, second, ampere, kelvin, mole,
    /// candela, radian and steradian, in that order
    pub exponents: [SiFraction; 9],
    /// Multiplier relative to the unscaled SI unit
    pub scale_factor: f64,
}

/// Base unit symbols in footer order.
const SI_BASE_SYMBOLS: [&str; 9] = ["m", "kg", "s", "A", "K", "mol", "cd", "rad", "sr"];

impl Default for SiUnit {
    fn default() -> Self {
        Self {
            exponents: [SiFraction::default(); 9],
            scale_factor: 1.0,
        }
    }
}

impl SiUnit {
    /// Encoded size in bytes: nine fractions then the scale factor.
    pub(crate) const LEN: usize = 80;

    /// Decode one SI unit from the start of `buf`.
    fn parse(buf: &[u8]) -> Self {
        let mut exponents = [SiFraction::default(); 9];
        for (i, frac) in exponents.iter_mut().enumerate() {
            frac.num = LittleEndian::read_i32(&buf[i * 8..]);
            frac.den = LittleEndian::read_i32(&buf[i * 8 + 4..]);
        }
        Self {
            exponents,
            scale_factor: LittleEndian::read_f64(&buf[72..]),
        }
    }

    /// Render a compact unit string such as `m`, `m s^-1` or `m^(3/2)`.
    ///
    /// Dimensionless units render empty. A scale factor other than 1 is
    /// prefixed in exponent notation, e.g. `1e-6 m`.
    pub(crate) fn to_unit_string(&self) -> String {
        let mut parts = Vec::new();
        for (frac, symbol) in self.exponents.iter().zip(SI_BASE_SYMBOLS) {
            if frac.num == 0 {
                continue;
            }
            let (num, den) = frac.normalized();
            if num == den {
                parts.push(symbol.to_string());
            } else if den == 1 {
                parts.push(format!("{}^{}", symbol, num));
            } else {
                parts.push(format!("{}^({}/{})", symbol, num, den));
            }
        }
        if parts.is_empty() {
            return String::new();
        }
        let joined = parts.join(" ");
        if self.scale_factor.is_finite() && self.scale_factor != 0.0 && self.scale_factor != 1.0 {
            format!("{:e} {}", self.scale_factor, joined)
        } else {
            joined
        }
    }
}

/// Fixed part of a stack footer.
///
/// Fields past what the stack's format version (or the bytes on disk)
/// covers keep their defaults. The full layout is parsed even though the
/// reader acts on only part of it.
#[derive(Debug, Clone, Default)]
#[allow(dead_code)]
pub(crate) struct StackFooter {
    /// Total fixed-part size; the variable part starts this many bytes
    /// after the footer position
    pub size: u32,
    /// Per axis slot, nonzero when sample positions are stored
    pub has_col_positions: [u32; OBF_MAX_DIMENSIONS],
    /// Per axis slot, nonzero when a label is stored
    pub has_col_labels: [u32; OBF_MAX_DIMENSIONS],
    /// Length of the obsolete metadata block in the variable part
    pub obsolete_metadata_len: u64,
    /// SI exponent of the sample values themselves
    pub si_value: SiFraction,
    /// SI unit per axis slot
    pub si_dimensions: [SiUnit; OBF_MAX_DIMENSIONS],
    /// Number of flush points recorded in the variable part
    pub num_flush_points: u64,
    /// Payload bytes between flush points
    pub flush_block_size: u64,
    /// Length in bytes of the tag dictionary in the variable part
    pub tag_dictionary_len: u64,
    /// End of this stack record on disk
    pub stack_end_disk: u64,
    /// Lowest format version a reader needs to interpret this stack
    pub min_format_version: u32,
    /// End of the used portion of this stack record on disk
    pub stack_end_used_disk: u64,
    /// Samples actually written, may fall short of the declared shape
    pub samples_written: u64,
    /// Number of chunk positions; nonzero means a chunked payload
    pub num_chunk_positions: u64,
}

impl StackFooter {
    /// Parse the fixed footer part from `buf`.
    ///
    /// `buf` holds at most [`FOOTER_MAX_LEN`] bytes starting at the
    /// footer position. Field groups are taken only when both the stack's
    /// format version and the available bytes cover them. Returns `None`
    /// when even the version 1 fields do not fit.
    pub(crate) fn parse(buf: &[u8], format_version: u32) -> Option<Self> {
        use footer_offsets as off;

        if format_version < 1 || buf.len() < off::V1_LEN {
            return None;
        }
        let mut footer = StackFooter {
            size: LittleEndian::read_u32(&buf[off::SIZE..]),
            ..StackFooter::default()
        };
        LittleEndian::read_u32_into(
            &buf[off::HAS_COL_POSITIONS..off::HAS_COL_LABELS],
            &mut footer.has_col_positions,
        );
        LittleEndian::read_u32_into(
            &buf[off::HAS_COL_LABELS..off::OBSOLETE_METADATA_LEN],
            &mut footer.has_col_labels,
        );
        footer.obsolete_metadata_len = LittleEndian::read_u64(&buf[off::OBSOLETE_METADATA_LEN..]);

        if format_version >= 2 && buf.len() >= off::V2_LEN {
            footer.si_value = SiFraction {
                num: LittleEndian::read_i32(&buf[off::SI_VALUE..]),
                den: LittleEndian::read_i32(&buf[off::SI_VALUE + 4..]),
            };
            for (i, unit) in footer.si_dimensions.iter_mut().enumerate() {
                *unit = SiUnit::parse(&buf[off::SI_DIMENSIONS + i * SiUnit::LEN..]);
            }
        }
        if format_version >= 3 && buf.len() >= off::V3_LEN {
            footer.num_flush_points = LittleEndian::read_u64(&buf[off::NUM_FLUSH_POINTS..]);
            footer.flush_block_size = LittleEndian::read_u64(&buf[off::FLUSH_BLOCK_SIZE..]);
        }
        if format_version >= 4 && buf.len() >= off::V4_LEN {
            footer.tag_dictionary_len = LittleEndian::read_u64(&buf[off::TAG_DICTIONARY_LEN..]);
        }
        if format_version >= 5 && buf.len() >= off::V5_LEN {
            footer.stack_end_disk = LittleEndian::read_u64(&buf[off::STACK_END_DISK..]);
            footer.min_format_version = LittleEndian::read_u32(&buf[off::MIN_FORMAT_VERSION..]);
            footer.stack_end_used_disk = LittleEndian::read_u64(&buf[off::STACK_END_USED_DISK..]);
        }
        if format_version >= 6 && buf.len() >= off::V6_LEN {
            footer.samples_written = LittleEndian::read_u64(&buf[off::SAMPLES_WRITTEN..]);
            footer.num_chunk_positions = LittleEndian::read_u64(&buf[off::NUM_CHUNK_POSITIONS..]);
        }
        Some(footer)
    }
}

/// Everything the scan keeps from one stack's footer.
#[derive(Debug, Clone, Default)]
pub(crate) struct FooterMetadata {
    /// Unit string per axis slot, empty where none is recorded
    pub units: Vec<String>,
    /// Label per axis slot, empty where none is recorded
    pub labels: Vec<String>,
    /// Tag dictionary, empty when the stack carries none
    pub tags: HashMap<String, String>,
    /// Lowest format version the writer demands of readers
    pub min_format_version: u32,
    /// Whether the payload was written in chunks
    pub chunked: bool,
}

/// Parse a tag dictionary: length-prefixed key and value strings,
/// terminated by a zero-length key or the end of the block.
///
/// Returns `None` when a length prefix runs past the block, in which case
/// the caller drops the whole dictionary.
pub(crate) fn parse_tag_dictionary(bytes: &[u8]) -> Option<HashMap<String, String>> {
    let mut tags = HashMap::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        let key = read_prefixed_string(bytes, &mut pos)?;
        if key.is_empty() {
            break;
        }
        let value = read_prefixed_string(bytes, &mut pos)?;
        tags.insert(key, value);
    }
    Some(tags)
}

/// Read one u32-length-prefixed string, advancing `pos` past it.
fn read_prefixed_string(bytes: &[u8], pos: &mut usize) -> Option<String> {
    let len_end = pos.checked_add(4)?;
    if len_end > bytes.len() {
        return None;
    }
    let len = LittleEndian::read_u32(&bytes[*pos..]) as usize;
    let end = len_end.checked_add(len)?;
    if end > bytes.len() {
        return None;
    }
    let s = String::from_utf8_lossy(&bytes[len_end..end]).into_owned();
    *pos = end;
    Some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixed(s: &str) -> Vec<u8> {
        let mut out = (s.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out
    }

    fn unit_with(exponents: &[(usize, i32, i32)], scale: f64) -> SiUnit {
        let mut unit = SiUnit {
            scale_factor: scale,
            ..SiUnit::default()
        };
        for &(base, num, den) in exponents {
            unit.exponents[base] = SiFraction { num, den };
        }
        unit
    }

    #[test]
    fn test_tag_dictionary_parsing() {
        let mut bytes = Vec::new();
        bytes.extend(prefixed("imspector"));
        bytes.extend(prefixed("<doc/>"));
        bytes.extend(prefixed("stage"));
        bytes.extend(prefixed("upright"));
        bytes.extend(0u32.to_le_bytes()); // terminator

        let tags = parse_tag_dictionary(&bytes).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["imspector"], "<doc/>");
        assert_eq!(tags["stage"], "upright");
    }

    #[test]
    fn test_tag_dictionary_without_terminator() {
        let mut bytes = Vec::new();
        bytes.extend(prefixed("key"));
        bytes.extend(prefixed("value"));

        let tags = parse_tag_dictionary(&bytes).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags["key"], "value");
    }

    #[test]
    fn test_tag_dictionary_empty() {
        assert_eq!(parse_tag_dictionary(&[]).unwrap().len(), 0);
    }

    #[test]
    fn test_tag_dictionary_overrunning_length() {
        let mut bytes = prefixed("key");
        bytes.extend(1000u32.to_le_bytes());
        bytes.extend_from_slice(b"short");
        assert!(parse_tag_dictionary(&bytes).is_none());
    }

    #[test]
    fn test_si_unit_rendering() {
        assert_eq!(unit_with(&[(0, 1, 1)], 1.0).to_unit_string(), "m");
        assert_eq!(unit_with(&[(2, -1, 1)], 1.0).to_unit_string(), "s^-1");
        assert_eq!(unit_with(&[(0, 2, 1)], 1.0).to_unit_string(), "m^2");
        assert_eq!(unit_with(&[(0, 3, 2)], 1.0).to_unit_string(), "m^(3/2)");
        assert_eq!(
            unit_with(&[(0, 1, 1), (2, -1, 1)], 1.0).to_unit_string(),
            "m s^-1"
        );
        assert_eq!(unit_with(&[], 1.0).to_unit_string(), "");
        assert_eq!(unit_with(&[(0, 1, 1)], 1e-6).to_unit_string(), "1e-6 m");
    }

    #[test]
    fn test_si_fraction_normalization() {
        assert_eq!(unit_with(&[(0, 1, -1)], 1.0).to_unit_string(), "m^-1");
        // zero denominator falls back to an integer exponent
        assert_eq!(unit_with(&[(0, 2, 0)], 1.0).to_unit_string(), "m^2");
    }

    #[test]
    fn test_footer_version_gating() {
        use footer_offsets as off;

        let mut buf = vec![0u8; off::V2_LEN];
        LittleEndian::write_u32(&mut buf[off::SIZE..], off::V2_LEN as u32);
        LittleEndian::write_u32(&mut buf[off::HAS_COL_LABELS..], 1);
        // slot 0 measures meters
        LittleEndian::write_i32(&mut buf[off::SI_DIMENSIONS..], 1);
        LittleEndian::write_i32(&mut buf[off::SI_DIMENSIONS + 4..], 1);
        LittleEndian::write_f64(&mut buf[off::SI_DIMENSIONS + 72..], 1.0);

        let footer = StackFooter::parse(&buf, 2).unwrap();
        assert_eq!(footer.size, off::V2_LEN as u32);
        assert_eq!(footer.has_col_labels[0], 1);
        assert_eq!(footer.si_dimensions[0].to_unit_string(), "m");

        // the same bytes parsed as version 1 ignore the SI block
        let footer = StackFooter::parse(&buf, 1).unwrap();
        assert_eq!(footer.si_dimensions[0].to_unit_string(), "");
    }

    #[test]
    fn test_footer_too_short() {
        assert!(StackFooter::parse(&[0u8; 16], 1).is_none());
        assert!(StackFooter::parse(&[0u8; footer_offsets::V1_LEN], 0).is_none());
    }
}

//! Container access - main API for reading OBF/MSR files

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::compression::{decompress_payload, Compression};
use crate::error::{ObfError, Result};
use crate::format::{
    FileHeader, StackHeader, FILE_HEADER_LEN, MAX_RANK, MAX_STACK_VERSION, OBF_MAX_DIMENSIONS,
    STACK_HEADER_LEN,
};
use crate::metadata::{parse_tag_dictionary, FooterMetadata, StackFooter, FOOTER_MAX_LEN};
use crate::stack::{Stack, StackData, StackDescriptor};
use crate::types::{AxisDescriptor, DataType};

/// Seekable byte source a container reads from
pub trait ByteSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> ByteSource for T {}

/// What a stack lookup asked for, carried by [`ObfError::UnknownStack`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackSelector {
    /// Zero-based position in file order
    Index(usize),
    /// Exact stack name
    Name(String),
}

impl fmt::Display for StackSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackSelector::Index(index) => write!(f, "index {}", index),
            StackSelector::Name(name) => write!(f, "name {:?}", name),
        }
    }
}

/// Defect found while indexing a stack. It is replayed when the stack is
/// materialized, so one bad stack never blocks its siblings.
#[derive(Debug, Clone)]
enum StackDefect {
    Truncated {
        what: &'static str,
        offset: u64,
        needed: u64,
    },
    Unsupported {
        reason: String,
    },
}

impl StackDefect {
    fn to_error(&self, index: usize, name: &str) -> ObfError {
        match self {
            StackDefect::Truncated {
                what,
                offset,
                needed,
            } => ObfError::Truncated {
                what: *what,
                offset: *offset,
                needed: *needed,
            },
            StackDefect::Unsupported { reason } => ObfError::UnsupportedStack {
                index,
                name: name.to_string(),
                reason: reason.clone(),
            },
        }
    }
}

/// Payload location of one stack, index-aligned with the descriptor list.
struct StackRecord {
    data_pos: u64,
    data_len_disk: u64,
    data_type_code: u32,
    compression_code: u32,
    defect: Option<StackDefect>,
}

/// An opened OBF/MSR container
///
/// The byte source stays open for the lifetime of this value. Opening
/// scans every stack header and footer but no payload bytes; payloads
/// are read, decompressed and decoded only when a stack is materialized
/// through [`ObfFile::stack`] or [`ObfFile::stack_by_name`].
///
/// The container is immutable once open and safe to share across
/// threads. Concurrent payload reads serialize on an internal lock;
/// decoding happens outside it.
pub struct ObfFile {
    source: Mutex<Box<dyn ByteSource>>,
    source_len: u64,
    format_version: u32,
    description: String,
    metadata: HashMap<String, String>,
    records: Vec<StackRecord>,
    descriptors: Vec<StackDescriptor>,
}

impl fmt::Debug for ObfFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObfFile")
            .field("source_len", &self.source_len)
            .field("format_version", &self.format_version)
            .field("description", &self.description)
            .field("metadata", &self.metadata)
            .field("stacks", &self.descriptors.len())
            .finish_non_exhaustive()
    }
}

impl ObfFile {
    /// Open a container from a file on disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }

    /// Open a container held entirely in memory
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_reader(Cursor::new(bytes))
    }

    /// Open a container from any seekable byte source
    pub fn from_reader(source: impl Read + Seek + Send + 'static) -> Result<Self> {
        Self::scan(Box::new(source))
    }

    /// Walk the file header and the stack chain, indexing every stack.
    ///
    /// Only file-level problems abort the scan with an error. A broken
    /// stack chain ends the walk with a warning and keeps the stacks
    /// indexed so far; per-stack problems are noted on the record and
    /// surface when that stack is materialized.
    fn scan(mut source: Box<dyn ByteSource>) -> Result<Self> {
        let source_len = source.seek(SeekFrom::End(0))?;

        let mut header_buf = [0u8; FILE_HEADER_LEN];
        read_at(&mut *source, 0, &mut header_buf, "file header")?;
        let header = FileHeader::parse(&header_buf)?;
        trace!(
            "OBF format version {}, first stack at byte {}",
            header.format_version,
            header.first_stack_pos
        );

        let descr_pos = FILE_HEADER_LEN as u64;
        let description = read_string_at(
            &mut *source,
            source_len,
            descr_pos,
            header.descr_len as u64,
            "file description",
        )?;

        let mut metadata = HashMap::new();
        if header.has_metadata_position() {
            let field_pos = descr_pos + header.descr_len as u64;
            let mut buf = [0u8; 8];
            read_at(&mut *source, field_pos, &mut buf, "file metadata position")?;
            let meta_pos = LittleEndian::read_u64(&buf);
            if meta_pos != 0 {
                match read_file_metadata(&mut *source, source_len, meta_pos) {
                    Some(tags) => metadata = tags,
                    None => warn!("file metadata at byte {} is malformed, ignoring it", meta_pos),
                }
            }
        }

        let mut records = Vec::new();
        let mut descriptors = Vec::new();
        let mut visited = HashSet::new();
        let mut next_pos = header.first_stack_pos;
        while next_pos != 0 {
            if !visited.insert(next_pos) {
                warn!(
                    "stack chain loops back to byte {}, keeping the {} stacks before the loop",
                    next_pos,
                    records.len()
                );
                break;
            }
            if next_pos
                .checked_add(STACK_HEADER_LEN as u64)
                .map_or(true, |end| end > source_len)
            {
                warn!(
                    "stack header at byte {} runs past the end of the container, keeping the {} stacks before it",
                    next_pos,
                    records.len()
                );
                break;
            }
            let mut buf = [0u8; STACK_HEADER_LEN];
            read_at(&mut *source, next_pos, &mut buf, "stack header")?;
            let stack_header = match StackHeader::parse(&buf) {
                Some(h) => h,
                None => {
                    warn!(
                        "no stack signature at byte {}, keeping the {} stacks before it",
                        next_pos,
                        records.len()
                    );
                    break;
                }
            };

            let index = records.len();
            let (record, descriptor) =
                index_stack(&mut *source, source_len, index, next_pos, &stack_header);
            records.push(record);
            descriptors.push(descriptor);
            next_pos = stack_header.next_stack_pos;
        }
        debug!("indexed {} stacks", records.len());

        Ok(Self {
            source: Mutex::new(source),
            source_len,
            format_version: header.format_version,
            description,
            metadata,
            records,
            descriptors,
        })
    }

    /// Container format version
    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    /// Free-form file description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// File-level tag dictionary, empty for containers before version 2
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Descriptors of every stack, in file order
    pub fn stacks(&self) -> &[StackDescriptor] {
        &self.descriptors
    }

    /// Descriptors whose name contains `pattern`, in file order
    pub fn find_stacks(&self, pattern: &str) -> Vec<&StackDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.name.contains(pattern))
            .collect()
    }

    /// Materialize the stack at a zero-based index
    pub fn stack(&self, index: usize) -> Result<Stack> {
        if index >= self.records.len() {
            return Err(ObfError::UnknownStack(StackSelector::Index(index)));
        }
        self.materialize(index)
    }

    /// Materialize the first stack in file order whose name equals `name`
    ///
    /// Stack names need not be unique; later stacks with the same name
    /// are reachable by index.
    pub fn stack_by_name(&self, name: &str) -> Result<Stack> {
        match self.descriptors.iter().position(|d| d.name == name) {
            Some(index) => self.materialize(index),
            None => Err(ObfError::UnknownStack(StackSelector::Name(
                name.to_string(),
            ))),
        }
    }

    /// Read, decode and validate one stack's payload.
    ///
    /// Nothing is cached: every call reads the payload from the source
    /// and decodes it fresh, so repeated calls return equal arrays.
    fn materialize(&self, index: usize) -> Result<Stack> {
        let record = &self.records[index];
        let descriptor = &self.descriptors[index];

        if let Some(defect) = &record.defect {
            return Err(defect.to_error(index, &descriptor.name));
        }
        let data_type = descriptor
            .data_type
            .ok_or_else(|| ObfError::UnsupportedDataType {
                index,
                name: descriptor.name.clone(),
                code: record.data_type_code,
            })?;
        let compression = descriptor
            .compression
            .ok_or_else(|| ObfError::UnsupportedCompression {
                index,
                name: descriptor.name.clone(),
                code: record.compression_code,
            })?;

        let corrupt = |reason: String| ObfError::CorruptPayload {
            index,
            name: descriptor.name.clone(),
            reason,
        };

        let expected = descriptor
            .element_count()
            .and_then(|n| n.checked_mul(data_type.size_in_bytes()))
            .ok_or_else(|| corrupt("sample count overflows".to_string()))?;

        // bounds come first so a lying length cannot drive the allocation
        let disk_len = usize::try_from(record.data_len_disk).map_err(|_| {
            corrupt(format!(
                "payload of {} bytes does not fit in memory",
                record.data_len_disk
            ))
        })?;
        if record
            .data_pos
            .checked_add(record.data_len_disk)
            .map_or(true, |end| end > self.source_len)
        {
            return Err(corrupt(format!(
                "payload of {} bytes at byte {} runs past the end of the container",
                record.data_len_disk, record.data_pos
            )));
        }

        let mut raw = vec![0u8; disk_len];
        {
            let mut source = self.source.lock();
            source.seek(SeekFrom::Start(record.data_pos))?;
            source.read_exact(&mut raw)?;
        }
        trace!(
            "stack {}: read {} payload bytes, {:?}",
            index,
            disk_len,
            compression
        );

        let samples = decompress_payload(compression, raw, expected).map_err(corrupt)?;
        let data = StackData::from_le_bytes(data_type, &samples, &descriptor.shape)
            .map_err(|e| corrupt(e.to_string()))?;

        debug!("materialized stack {} {:?}", index, descriptor.name);
        Ok(Stack::new(descriptor.clone(), data))
    }
}

/// Index one stack record: read its strings, locate its payload, fold in
/// footer metadata, and note any defect for materialization time.
fn index_stack(
    source: &mut dyn ByteSource,
    source_len: u64,
    index: usize,
    header_pos: u64,
    header: &StackHeader,
) -> (StackRecord, StackDescriptor) {
    let mut defect: Option<StackDefect> = None;

    let name_pos = header_pos + STACK_HEADER_LEN as u64;
    let name = match read_string_at(
        source,
        source_len,
        name_pos,
        header.name_len as u64,
        "stack name",
    ) {
        Ok(name) => name,
        Err(_) => {
            defect.get_or_insert(StackDefect::Truncated {
                what: "stack name",
                offset: name_pos,
                needed: header.name_len as u64,
            });
            String::new()
        }
    };

    let descr_pos = name_pos + header.name_len as u64;
    let description = match read_string_at(
        source,
        source_len,
        descr_pos,
        header.descr_len as u64,
        "stack description",
    ) {
        Ok(description) => description,
        Err(_) => {
            defect.get_or_insert(StackDefect::Truncated {
                what: "stack description",
                offset: descr_pos,
                needed: header.descr_len as u64,
            });
            String::new()
        }
    };

    let data_pos = descr_pos + header.descr_len as u64;

    let rank = header.rank as usize;
    let (shape, axes) = if rank == 0 || rank > OBF_MAX_DIMENSIONS {
        defect.get_or_insert(StackDefect::Unsupported {
            reason: format!("rank {} is outside 1..={}", rank, OBF_MAX_DIMENSIONS),
        });
        (Vec::new(), Vec::new())
    } else {
        let mut shape: Vec<usize> = header.res[..rank].iter().map(|&r| r as usize).collect();
        // trailing length-1 axes fold away down to the supported rank
        while shape.len() > MAX_RANK && shape.last() == Some(&1) {
            shape.pop();
        }
        if shape.len() > MAX_RANK {
            defect.get_or_insert(StackDefect::Unsupported {
                reason: format!(
                    "rank {} exceeds the supported maximum of {}",
                    shape.len(),
                    MAX_RANK
                ),
            });
        }
        let axes = shape
            .iter()
            .enumerate()
            .map(|(i, &n)| AxisDescriptor::new(n, header.len[i], header.off[i]))
            .collect();
        (shape, axes)
    };

    let mut descriptor = StackDescriptor {
        index,
        name,
        description,
        format_version: header.format_version,
        shape,
        data_type: DataType::from_code(header.data_type),
        compression: Compression::from_code(header.compression_type),
        axes,
        tags: HashMap::new(),
    };

    if header.format_version >= 1 {
        let footer = data_pos
            .checked_add(header.data_len_disk)
            .and_then(|footer_pos| read_footer(source, source_len, footer_pos, header));
        match footer {
            Some(footer) => {
                for (i, axis) in descriptor.axes.iter_mut().enumerate() {
                    axis.unit = footer.units.get(i).cloned().unwrap_or_default();
                    axis.label = footer.labels.get(i).cloned().unwrap_or_default();
                }
                descriptor.tags = footer.tags;
                if footer.min_format_version > MAX_STACK_VERSION {
                    defect.get_or_insert(StackDefect::Unsupported {
                        reason: format!(
                            "stack requires format version {} support, this reader knows {}",
                            footer.min_format_version, MAX_STACK_VERSION
                        ),
                    });
                }
                if footer.chunked {
                    defect.get_or_insert(StackDefect::Unsupported {
                        reason: "chunked payloads are not supported".to_string(),
                    });
                }
            }
            None => warn!(
                "stack {} footer is unreadable, axis units and tags are skipped",
                index
            ),
        }
    }

    let record = StackRecord {
        data_pos,
        data_len_disk: header.data_len_disk,
        data_type_code: header.data_type,
        compression_code: header.compression_type,
        defect,
    };
    (record, descriptor)
}

/// Read a stack footer's fixed part and walk its variable part.
///
/// Returns `None` when any piece runs past the end of the container or a
/// length prefix is inconsistent. The stack then carries no footer
/// metadata, but its payload stays readable.
fn read_footer(
    source: &mut dyn ByteSource,
    source_len: u64,
    footer_pos: u64,
    header: &StackHeader,
) -> Option<FooterMetadata> {
    let mut size_buf = [0u8; 4];
    read_at_checked(source, source_len, footer_pos, &mut size_buf)?;
    let size = LittleEndian::read_u32(&size_buf) as u64;
    if size < 4 || footer_pos.checked_add(size)? > source_len {
        return None;
    }

    let fixed_len = size.min(FOOTER_MAX_LEN as u64) as usize;
    let mut fixed = vec![0u8; fixed_len];
    read_at_checked(source, source_len, footer_pos, &mut fixed)?;
    let footer = StackFooter::parse(&fixed, header.format_version)?;

    // variable part: sample positions, axis labels, the obsolete
    // metadata block, flush points, then the tag dictionary
    let mut cursor = footer_pos + size;

    let mut positions_len: u64 = 0;
    for i in 0..OBF_MAX_DIMENSIONS {
        if footer.has_col_positions[i] != 0 {
            positions_len = positions_len.checked_add(header.res[i] as u64 * 8)?;
        }
    }
    cursor = skip(cursor, positions_len, source_len)?;

    let mut labels = vec![String::new(); OBF_MAX_DIMENSIONS];
    for (i, label) in labels.iter_mut().enumerate() {
        if footer.has_col_labels[i] != 0 {
            let (value, next) = read_prefixed_string_at(source, source_len, cursor)?;
            *label = value;
            cursor = next;
        }
    }

    cursor = skip(cursor, footer.obsolete_metadata_len, source_len)?;
    cursor = skip(cursor, footer.num_flush_points.checked_mul(8)?, source_len)?;

    let mut tags = HashMap::new();
    if footer.tag_dictionary_len > 0 {
        if cursor.checked_add(footer.tag_dictionary_len)? > source_len {
            return None;
        }
        let mut dict = vec![0u8; footer.tag_dictionary_len as usize];
        read_at_checked(source, source_len, cursor, &mut dict)?;
        tags = parse_tag_dictionary(&dict)?;
    }

    Some(FooterMetadata {
        units: footer
            .si_dimensions
            .iter()
            .map(|unit| unit.to_unit_string())
            .collect(),
        labels,
        tags,
        min_format_version: footer.min_format_version,
        chunked: footer.num_chunk_positions > 0,
    })
}

/// Read the file-level tag dictionary: length-prefixed pairs ended by a
/// zero-length key or the end of the container.
fn read_file_metadata(
    source: &mut dyn ByteSource,
    source_len: u64,
    pos: u64,
) -> Option<HashMap<String, String>> {
    let mut tags = HashMap::new();
    let mut cursor = pos;
    while cursor < source_len {
        let (key, next) = read_prefixed_string_at(source, source_len, cursor)?;
        if key.is_empty() {
            break;
        }
        let (value, next) = read_prefixed_string_at(source, source_len, next)?;
        tags.insert(key, value);
        cursor = next;
    }
    Some(tags)
}

/// Read exactly `buf.len()` bytes at `pos`, reporting truncation with
/// context when the source ends first.
fn read_at(
    source: &mut dyn ByteSource,
    pos: u64,
    buf: &mut [u8],
    what: &'static str,
) -> Result<()> {
    source.seek(SeekFrom::Start(pos))?;
    source.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ObfError::Truncated {
                what,
                offset: pos,
                needed: buf.len() as u64,
            }
        } else {
            ObfError::Io(e)
        }
    })
}

/// Read a string of `len` bytes at `pos`. Invalid UTF-8 is replaced
/// rather than rejected; names and descriptions are display strings.
fn read_string_at(
    source: &mut dyn ByteSource,
    source_len: u64,
    pos: u64,
    len: u64,
    what: &'static str,
) -> Result<String> {
    if pos.checked_add(len).map_or(true, |end| end > source_len) {
        return Err(ObfError::Truncated {
            what,
            offset: pos,
            needed: len,
        });
    }
    let mut buf = vec![0u8; len as usize];
    read_at(source, pos, &mut buf, what)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Bounds-checked absolute read used while walking footers.
fn read_at_checked(
    source: &mut dyn ByteSource,
    source_len: u64,
    pos: u64,
    buf: &mut [u8],
) -> Option<()> {
    if pos.checked_add(buf.len() as u64)? > source_len {
        return None;
    }
    source.seek(SeekFrom::Start(pos)).ok()?;
    source.read_exact(buf).ok()?;
    Some(())
}

/// Advance `cursor` past `len` bytes, `None` when that leaves the container.
fn skip(cursor: u64, len: u64, source_len: u64) -> Option<u64> {
    let next = cursor.checked_add(len)?;
    if next > source_len {
        None
    } else {
        Some(next)
    }
}

/// Read one u32-length-prefixed string at `pos`; returns it together
/// with the position just past it.
fn read_prefixed_string_at(
    source: &mut dyn ByteSource,
    source_len: u64,
    pos: u64,
) -> Option<(String, u64)> {
    let mut len_buf = [0u8; 4];
    read_at_checked(source, source_len, pos, &mut len_buf)?;
    let len = LittleEndian::read_u32(&len_buf) as u64;
    let start = pos + 4;
    if start.checked_add(len)? > source_len {
        return None;
    }
    let mut buf = vec![0u8; len as usize];
    read_at_checked(source, source_len, start, &mut buf)?;
    Some((String::from_utf8_lossy(&buf).into_owned(), start + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FILE_MAGIC;

    fn header_only(version: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&FILE_MAGIC);
        bytes.extend_from_slice(&version.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes()); // first_stack_pos
        bytes.extend_from_slice(&0u32.to_le_bytes()); // descr_len
        if version >= 2 {
            bytes.extend_from_slice(&0u64.to_le_bytes()); // metadata position
        }
        bytes
    }

    #[test]
    fn test_container_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ObfFile>();
    }

    #[test]
    fn test_selector_display() {
        assert_eq!(StackSelector::Index(3).to_string(), "index 3");
        assert_eq!(
            StackSelector::Name("Conf1".to_string()).to_string(),
            "name \"Conf1\""
        );
    }

    #[test]
    fn test_empty_container() {
        let file = ObfFile::from_bytes(header_only(1)).unwrap();
        assert_eq!(file.format_version(), 1);
        assert_eq!(file.description(), "");
        assert!(file.stacks().is_empty());
        assert!(matches!(file.stack(0), Err(ObfError::UnknownStack(_))));
    }

    #[test]
    fn test_zero_metadata_position_means_no_metadata() {
        let file = ObfFile::from_bytes(header_only(2)).unwrap();
        assert!(file.metadata().is_empty());
    }

    #[test]
    fn test_rejects_arbitrary_bytes() {
        let err = ObfFile::from_bytes(vec![b'P'; 64]).unwrap_err();
        assert!(matches!(err, ObfError::InvalidFormat(_)));
    }

    #[test]
    fn test_truncated_file_header() {
        let err = ObfFile::from_bytes(FILE_MAGIC.to_vec()).unwrap_err();
        assert!(matches!(
            err,
            ObfError::Truncated {
                what: "file header",
                ..
            }
        ));
    }
}

//! RIFF / RF64 chunk framing for CNT files.
//!
//! Both flavours share the same layout; RF64 widens every size field from
//! 32 to 64 bits. Chunk payloads are padded to an even length.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::debug;

use crate::error::{EepError, Result};
use crate::types::FileType;

/// Form type of a CNT file, following the container magic and size.
pub const CNT_FORM: &[u8; 4] = b"CNT ";
pub const LIST_ID: &[u8; 4] = b"LIST";

/// A chunk located in the file. `offset` points at the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: [u8; 4],
    pub offset: u64,
    pub size: u64,
}

impl Chunk {
    pub fn id_str(&self) -> String {
        String::from_utf8_lossy(&self.id).into_owned()
    }

    pub fn is(&self, id: &[u8; 4]) -> bool {
        &self.id == id
    }

    /// Offset of the byte following the (padded) payload.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(padded(self.size))
    }
}

/// 填充到偶数长度
pub fn padded(size: u64) -> u64 {
    size.saturating_add(size & 1)
}

/// Length of a chunk header: four id bytes plus the size field.
pub fn chunk_header_len(file_type: FileType) -> u64 {
    4 + file_type.word_size() as u64
}

/// Decodes a little-endian size word of the file's width.
pub fn decode_word(bytes: &[u8], file_type: FileType) -> Result<u64> {
    match file_type {
        FileType::Riff => bytes
            .get(..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64),
        FileType::Rf64 => bytes.get(..8).map(|b| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(b);
            u64::from_le_bytes(buf)
        }),
    }
    .ok_or_else(|| EepError::InvalidFormat("truncated size field".to_string()))
}

/// Encodes a size word, refusing values that do not fit a RIFF file.
pub fn encode_word(value: u64, file_type: FileType) -> Result<Vec<u8>> {
    match file_type {
        FileType::Riff => {
            let value = u32::try_from(value).map_err(|_| {
                EepError::InvalidFormat(format!(
                    "value {} exceeds the 32-bit RIFF limit, use RF64",
                    value
                ))
            })?;
            Ok(value.to_le_bytes().to_vec())
        }
        FileType::Rf64 => Ok(value.to_le_bytes().to_vec()),
    }
}

fn read_word<R: Read>(reader: &mut R, file_type: FileType) -> Result<u64> {
    let mut buf = [0u8; 8];
    let width = file_type.word_size();
    reader.read_exact(&mut buf[..width])?;
    decode_word(&buf[..width], file_type)
}

/// Reads the container header and returns the file type.
///
/// The declared container size is only checked for plausibility; the
/// chunk scan is bounded by the real file length.
pub fn read_file_header<R: Read + Seek>(reader: &mut R) -> Result<FileType> {
    reader.seek(SeekFrom::Start(0))?;

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    let file_type = match &magic {
        b"RIFF" => FileType::Riff,
        b"RF64" => FileType::Rf64,
        other => {
            return Err(EepError::UnsupportedFileType(format!(
                "Not a CNT file: {:?}",
                String::from_utf8_lossy(other)
            )))
        }
    };

    let declared = read_word(reader, file_type)?;

    let mut form = [0u8; 4];
    reader.read_exact(&mut form)?;
    if &form != CNT_FORM {
        return Err(EepError::UnsupportedFileType(format!(
            "RIFF form {:?} is not CNT",
            String::from_utf8_lossy(&form)
        )));
    }

    debug!(?file_type, declared, "container header");
    Ok(file_type)
}

/// Offset of the first top-level chunk.
pub fn first_chunk_offset(file_type: FileType) -> u64 {
    chunk_header_len(file_type) + 4
}

/// Lists the chunks between `start` and `end`.
///
/// Trailing bytes too short to hold a chunk header are ignored; a chunk
/// whose payload runs past `end` is an error.
pub fn scan_chunks<R: Read + Seek>(
    reader: &mut R,
    file_type: FileType,
    start: u64,
    end: u64,
) -> Result<Vec<Chunk>> {
    let header_len = chunk_header_len(file_type);
    let mut chunks = Vec::new();
    let mut pos = start;

    while pos.saturating_add(header_len) <= end {
        reader.seek(SeekFrom::Start(pos))?;

        let mut id = [0u8; 4];
        reader.read_exact(&mut id)?;
        let size = read_word(reader, file_type)?;
        let offset = pos + header_len;

        if offset.checked_add(size).map_or(true, |chunk_end| chunk_end > end) {
            return Err(EepError::InvalidFormat(format!(
                "chunk {:?} at {} claims {} bytes, only {} available",
                String::from_utf8_lossy(&id),
                pos,
                size,
                end.saturating_sub(offset)
            )));
        }

        let chunk = Chunk { id, offset, size };
        debug!(id = %chunk.id_str(), offset, size, "chunk");
        pos = chunk.end();
        chunks.push(chunk);
    }

    if pos < end {
        debug!(trailing = end - pos, "ignoring trailing bytes");
    }

    Ok(chunks)
}

/// Reads the four-byte form type of a LIST chunk.
pub fn read_list_form<R: Read + Seek>(reader: &mut R, chunk: &Chunk) -> Result<[u8; 4]> {
    if chunk.size < 4 {
        return Err(EepError::InvalidFormat("LIST chunk without form type".to_string()));
    }
    reader.seek(SeekFrom::Start(chunk.offset))?;
    let mut form = [0u8; 4];
    reader.read_exact(&mut form)?;
    Ok(form)
}

/// Reads the whole payload of a chunk into memory.
pub fn read_payload<R: Read + Seek>(reader: &mut R, chunk: &Chunk) -> Result<Vec<u8>> {
    let len = usize::try_from(chunk.size)
        .map_err(|_| EepError::InvalidFormat(format!("chunk {} too large", chunk.id_str())))?;
    reader.seek(SeekFrom::Start(chunk.offset))?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Writes a chunk header.
pub fn write_chunk_header<W: Write>(
    writer: &mut W,
    id: &[u8; 4],
    size: u64,
    file_type: FileType,
) -> Result<()> {
    writer.write_all(id)?;
    writer.write_all(&encode_word(size, file_type)?)?;
    Ok(())
}

/// Writes a complete chunk including its pad byte.
pub fn write_chunk<W: Write>(
    writer: &mut W,
    id: &[u8; 4],
    payload: &[u8],
    file_type: FileType,
) -> Result<()> {
    write_chunk_header(writer, id, payload.len() as u64, file_type)?;
    writer.write_all(payload)?;
    if payload.len() % 2 == 1 {
        writer.write_all(&[0])?;
    }
    Ok(())
}

/// Overwrites a size word at `position`, then returns to the end of the file.
pub fn patch_word<W: Write + Seek>(
    writer: &mut W,
    position: u64,
    value: u64,
    file_type: FileType,
) -> Result<()> {
    let bytes = encode_word(value, file_type)?;
    writer.seek(SeekFrom::Start(position))?;
    writer.write_all(&bytes)?;
    writer.seek(SeekFrom::End(0))?;
    Ok(())
}

//! Record framing for the audit file.
//!
//! ```text
//! file:   [MAGIC: 4 bytes][VERSION: 1 byte][frame]...
//! frame:  [version: 1 byte][length: 4 bytes LE][JSON: N bytes][crc32: 4 bytes LE]
//! ```

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

const FRAME_VERSION: u8 = 1;

/// Upper bound on one frame's payload.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Identifies an audit log file.
pub const MAGIC: [u8; 4] = *b"KRAL";

/// Size of the file header in bytes.
pub const HEADER_LEN: u64 = 5;

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

/// Serializes a value into one checksummed frame.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value).map_err(|e| invalid(format!("serialization failed: {e}")))?;
    if data.len() > MAX_FRAME_BYTES {
        return Err(invalid(format!(
            "frame of {} bytes exceeds maximum {MAX_FRAME_BYTES}",
            data.len()
        )));
    }
    let len = u32::try_from(data.len()).map_err(|_| invalid("frame length overflow".to_string()))?;

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(FRAME_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Reads and verifies one frame.
///
/// A clean end of input before the first byte surfaces as
/// `ErrorKind::UnexpectedEof`.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != FRAME_VERSION {
        return Err(invalid(format!(
            "unsupported frame version {} (expected {FRAME_VERSION})",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(invalid(format!("frame of {len} bytes exceeds maximum {MAX_FRAME_BYTES}")));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }

    serde_json::from_slice(&data).map_err(|e| invalid(format!("deserialization failed: {e}")))
}

/// Writes the file header.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[FRAME_VERSION])
}

/// Reads and checks the file header, returning its version.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(invalid(format!("not an audit log: magic {magic:?}")));
    }
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != FRAME_VERSION {
        return Err(invalid(format!("unsupported audit log version {}", version[0])));
    }
    Ok(version[0])
}

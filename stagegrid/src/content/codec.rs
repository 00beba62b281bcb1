//! Serialized cell format.
//!
//! ```text
//! offset  size  field
//! 0       4     magic "SGC1"
//! 4       1     stage index
//! 5       4     x (i32, big-endian)
//! 9       4     z (i32, big-endian)
//! 13      4     payload length (u32, big-endian)
//! 17      n     payload
//! ```
//!
//! [`decode`] runs the structural checks before touching the payload so
//! corrupt data can be treated like a missing cell.

use super::CellContent;
use crate::coord::CellPos;
use crate::stage::StageId;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// File magic.
pub const MAGIC: &[u8; 4] = b"SGC1";

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 17;

/// Structural problems found while encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("data too short: {len} bytes")]
    TooShort { len: usize },

    #[error("bad magic")]
    BadMagic,

    #[error("payload length mismatch: header says {declared}, found {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("cell mismatch: expected {expected}, found {found}")]
    PositionMismatch { expected: CellPos, found: CellPos },

    #[error("stage index {index} outside pipeline of {stages} stages")]
    StageOutOfRange { index: usize, stages: usize },

    #[error("payload of {len} bytes does not fit the length field")]
    PayloadTooLarge { len: usize },
}

/// Encodes content for persistence.
///
/// # Errors
///
/// Returns [`CodecError::PayloadTooLarge`] when the payload length does not
/// fit in a `u32`.
pub fn encode(content: &CellContent) -> Result<Bytes, CodecError> {
    let data = content.read();
    let len = payload_len(data.len())?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + data.len());
    buf.put_slice(MAGIC);
    buf.put_u8(content.stage().raw());
    buf.put_i32(content.pos().x);
    buf.put_i32(content.pos().z);
    buf.put_u32(len);
    buf.put_slice(&data);
    Ok(buf.freeze())
}

fn payload_len(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::PayloadTooLarge { len })
}

/// Decodes persisted content for `expected` in a pipeline of
/// `stage_count` stages.
pub fn decode(
    expected: CellPos,
    mut bytes: Bytes,
    stage_count: usize,
) -> Result<CellContent, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::TooShort { len: bytes.len() });
    }
    if &bytes[..4] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    bytes.advance(4);

    let stage = bytes.get_u8() as usize;
    let found = CellPos::new(bytes.get_i32(), bytes.get_i32());
    let declared = bytes.get_u32() as usize;

    if declared != bytes.remaining() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: bytes.remaining(),
        });
    }
    if found != expected {
        return Err(CodecError::PositionMismatch { expected, found });
    }
    if stage >= stage_count {
        return Err(CodecError::StageOutOfRange {
            index: stage,
            stages: stage_count,
        });
    }

    Ok(CellContent::with_data(
        expected,
        StageId::new(stage),
        bytes.to_vec(),
    ))
}

#![forbid(unsafe_code)]

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Terminator of every hub record (ASCII record separator).
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Default maximum record payload size.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024; // 1 MiB

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("incomplete frame: no record separator in {have} bytes")]
	Incomplete {
		have: usize,
	},

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Encode a message into a separator-terminated JSON record.
pub fn encode_frame<M: Serialize>(msg: &M, max_frame_size: usize) -> Result<Vec<u8>, FramingError> {
	let mut out = serde_json::to_vec(msg)?;
	if out.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: out.len(),
			max: max_frame_size,
		});
	}

	// serde_json escapes control characters, so the payload never contains the separator.
	out.push(RECORD_SEPARATOR);
	Ok(out)
}

/// Encode a frame using `DEFAULT_MAX_FRAME_SIZE`.
pub fn encode_frame_default<M: Serialize>(msg: &M) -> Result<Vec<u8>, FramingError> {
	encode_frame(msg, DEFAULT_MAX_FRAME_SIZE)
}

/// Append an encoded frame into the provided buffer.
pub fn encode_frame_into<M: Serialize>(buf: &mut BytesMut, msg: &M, max_frame_size: usize) -> Result<(), FramingError> {
	let payload = serde_json::to_vec(msg)?;
	if payload.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: payload.len(),
			max: max_frame_size,
		});
	}

	buf.reserve(payload.len() + 1);
	buf.put_slice(&payload);
	buf.put_u8(RECORD_SEPARATOR);
	Ok(())
}

/// Decode a single record from the start of `src`, returning the message and
/// the number of bytes consumed (separator included).
pub fn decode_frame<M: DeserializeOwned>(src: &[u8], max_frame_size: usize) -> Result<(M, usize), FramingError> {
	let Some(pos) = src.iter().position(|b| *b == RECORD_SEPARATOR) else {
		if src.len() > max_frame_size {
			return Err(FramingError::FrameTooLarge {
				len: src.len(),
				max: max_frame_size,
			});
		}
		return Err(FramingError::Incomplete { have: src.len() });
	};

	if pos > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: pos,
			max: max_frame_size,
		});
	}

	let msg = serde_json::from_slice(&src[..pos])?;
	Ok((msg, pos + 1))
}

/// Try to decode a single record from a growable buffer.
///
/// Returns `Ok(None)` until a full record is buffered. On a decode error the
/// offending record has already been consumed, so callers may keep reading.
pub fn try_decode_frame_from_buffer<M: DeserializeOwned>(
	buf: &mut BytesMut,
	max_frame_size: usize,
) -> Result<Option<M>, FramingError> {
	let Some(pos) = buf.iter().position(|b| *b == RECORD_SEPARATOR) else {
		if buf.len() > max_frame_size {
			return Err(FramingError::FrameTooLarge {
				len: buf.len(),
				max: max_frame_size,
			});
		}
		return Ok(None);
	};

	let frame = buf.split_to(pos + 1);
	if pos > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: pos,
			max: max_frame_size,
		});
	}

	let msg = serde_json::from_slice(&frame[..pos])?;
	Ok(Some(msg))
}

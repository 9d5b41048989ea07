use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
};

use crate::error::{RelayError, Result};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Largest directory request accepted in a single read.
pub const MAX_REQUEST_BYTES: usize = 4096;

/// Largest directory response a client is willing to buffer.
pub const MAX_RESPONSE_BYTES: usize = 256 * 1024;

/// Largest chat line relayed between peers.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DirectoryRequest {
    Register {
        room_name: String,
        host_ip: String,
        host_port: u16,
        #[serde(default)]
        password: Option<String>,
    },
    Unregister {
        room_name: String,
    },
    List,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DirectoryResponse {
    Status { status: Status },
    Rooms { rooms: BTreeMap<String, RoomEntry> },
}

impl DirectoryResponse {
    pub fn ok() -> Self {
        DirectoryResponse::Status { status: Status::Ok }
    }
}

/// Where a room is hosted, as stored by the directory and sent in listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntry {
    pub host_ip: String,
    pub host_port: u16,
    #[serde(default)]
    pub password: Option<String>,
}

/// Serialise a directory message as one JSON line.
pub fn encode_json<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut encoded = serde_json::to_vec(message).map_err(RelayError::malformed)?;
    encoded.push(b'\n');
    Ok(encoded)
}

/// Parse one directory message. Trailing line endings are ignored.
pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(payload).map_err(RelayError::malformed)?;
    serde_json::from_str(text.trim_end_matches(LINE_ENDINGS)).map_err(RelayError::malformed)
}

/// Reads at most `limit` bytes up to and including the next newline.
///
/// Returns `Ok(None)` on a clean EOF before any byte arrived. A frame that
/// does not fit in `limit` bytes is rejected rather than accumulated.
pub async fn read_bounded_frame<R>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = Vec::new();
    let read = (&mut *reader)
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut frame)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if frame.len() > limit {
        return Err(RelayError::malformed(format!(
            "frame exceeds {limit} bytes"
        )));
    }
    Ok(Some(frame))
}

/// Reads one directory request with a single read of at most `limit` bytes.
///
/// The request ends at the first newline or at the end of that read. Nothing
/// is accumulated across reads, so a sender that keeps its connection open
/// without a trailing newline is still answered. Returns `Ok(None)` when the
/// peer closed before sending anything.
pub async fn read_request<R, T>(reader: &mut R, limit: usize) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut buffer = vec![0; limit];
    let read = reader.read(&mut buffer).await?;
    if read == 0 {
        return Ok(None);
    }
    let chunk = &buffer[..read];
    let frame = match chunk.iter().position(|byte| *byte == b'\n') {
        Some(end) => &chunk[..end],
        None => chunk,
    };
    decode_json(frame).map(Some)
}

pub async fn read_json<R, T>(reader: &mut R, limit: usize) -> Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    match read_bounded_frame(reader, limit).await? {
        Some(frame) => decode_json(&frame).map(Some),
        None => Ok(None),
    }
}

pub async fn write_json<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = encode_json(message)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Frames a chat line: trailing line endings are dropped and a single `\n`
/// terminator is appended. Interior newlines are left alone and therefore
/// reach the peer as separate lines.
pub fn encode_line(line: &str) -> Vec<u8> {
    let trimmed = line.trim_end_matches(LINE_ENDINGS);
    let mut encoded = Vec::with_capacity(trimmed.len() + 1);
    encoded.extend_from_slice(trimmed.as_bytes());
    encoded.push(b'\n');
    encoded
}

/// Reads the next non-empty chat line.
///
/// `Ok(None)` means the peer closed the stream. A line cut off by EOF is still
/// returned; the following call reports the close.
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let Some(frame) = read_bounded_frame(reader, MAX_LINE_BYTES).await? else {
            return Ok(None);
        };
        let text = String::from_utf8(frame).map_err(RelayError::malformed)?;
        let trimmed = text.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }
        return Ok(Some(trimmed.to_string()));
    }
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_line(line)).await?;
    writer.flush().await
}

//! Cursor-based shell output protocol.
//!
//! Shell output lives in an append-only byte buffer owned by the upstream.
//! A caller reads it by polling with a cursor (a byte offset into that
//! buffer): each poll returns the bytes from the cursor to the current end,
//! the cursor to use next, and whether the shell has closed.
//!
//! Guarantees every party must uphold:
//!
//! - Polling twice with the same cursor yields the same bytes.
//! - Polling with the previous `nextCursor` yields only newly appended bytes,
//!   so no byte is skipped or repeated regardless of polling rate.
//! - `data` travels base64-encoded, so raw terminal control sequences survive
//!   a text-only transport.
//! - Once `closed` is reported it stays reported, and the buffer never grows
//!   again.
//!
//! [`OutputBuffer`] is the producer side of the contract and [`OutputCursor`]
//! the consumer side. The gateway itself holds neither; it only relays
//! [`ShellOutput`] values.

use serde::{Deserialize, Serialize};

/// The only encoding ever used for `data`.
pub const ENCODING_BASE64: &str = "base64";

/// One poll's worth of shell output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellOutput {
    /// Raw bytes from the requested cursor to the buffer end.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub encoding: String,
    pub next_cursor: u64,
    pub closed: bool,
}

impl ShellOutput {
    pub fn new(data: Vec<u8>, next_cursor: u64, closed: bool) -> Self {
        Self {
            data,
            encoding: ENCODING_BASE64.to_string(),
            next_cursor,
            closed,
        }
    }

    /// `data` must be declared as base64.
    pub fn check_encoding(&self) -> Result<(), ProtocolViolation> {
        if self.encoding != ENCODING_BASE64 {
            return Err(ProtocolViolation::Encoding(self.encoding.clone()));
        }
        Ok(())
    }

    /// Check the invariants a response to a poll at `cursor` must satisfy.
    pub fn check(&self, cursor: u64) -> Result<(), ProtocolViolation> {
        self.check_encoding()?;
        if self.next_cursor < cursor {
            return Err(ProtocolViolation::CursorRegressed {
                requested: cursor,
                next: self.next_cursor,
            });
        }
        if self.next_cursor - cursor != self.data.len() as u64 {
            return Err(ProtocolViolation::LengthMismatch {
                requested: cursor,
                next: self.next_cursor,
                len: self.data.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("unsupported output encoding '{0}'")]
    Encoding(String),
    #[error("nextCursor {next} is behind requested cursor {requested}")]
    CursorRegressed { requested: u64, next: u64 },
    #[error("nextCursor {next} does not match {len} bytes read from cursor {requested}")]
    LengthMismatch { requested: u64, next: u64, len: usize },
}

/// Append-only output buffer for one shell session.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    closed: bool,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes. Returns `false` (and drops the bytes) once closed.
    pub fn append(&mut self, data: &[u8]) -> bool {
        if self.closed {
            return false;
        }
        self.bytes.extend_from_slice(data);
        true
    }

    /// Mark the buffer closed. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Everything from `cursor` to the current end.
    ///
    /// A cursor past the end yields no data and is echoed back unchanged, so
    /// `nextCursor` never moves backwards from the caller's point of view.
    pub fn read_from(&self, cursor: u64) -> ShellOutput {
        let len = self.len();
        if cursor >= len {
            return ShellOutput::new(Vec::new(), cursor, self.closed);
        }
        let start = cursor as usize;
        ShellOutput::new(self.bytes[start..].to_vec(), len, self.closed)
    }
}

/// Caller-side poll state: the cursor to send next and whether the shell has
/// been observed closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputCursor {
    position: u64,
    closed: bool,
}

impl OutputCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Fold one poll response into the cursor, returning the new bytes.
    ///
    /// The response must answer a poll at [`Self::position`]. Closure is
    /// sticky: once observed, later responses cannot reopen the stream.
    pub fn advance(&mut self, output: ShellOutput) -> Result<Vec<u8>, ProtocolViolation> {
        output.check(self.position)?;
        self.position = output.next_cursor;
        self.closed |= output.closed;
        Ok(output.data)
    }
}

/// Serde helper for base64-encoded byte vectors in JSON.
mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

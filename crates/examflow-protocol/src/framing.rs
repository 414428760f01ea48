//! STOMP frame encoding and incremental decoding.
//!
//! ```text
//! COMMAND\n
//! name:value\n        (zero or more)
//! \n
//! body\0
//! ```
//!
//! Bare EOLs between frames are heart-beats. Transports may split a frame
//! across several messages or pack several frames into one, so decoding is
//! buffered.

use crate::MAX_FRAME_SIZE;
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{Frame, FrameCommand};

/// What a client sends when it has nothing else to say.
pub const HEARTBEAT: &str = "\n";

/// One decoded unit of inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(Frame),
    HeartBeat,
}

/// Encodes a frame for transmission.
///
/// Adds `content-length` for non-empty bodies unless the caller set one.
pub fn encode_frame(frame: &Frame) -> String {
    let escape = frame.command.escapes_headers();
    let mut out = String::with_capacity(64 + frame.body.len());

    out.push_str(frame.command.as_str());
    out.push('\n');

    for (name, value) in &frame.headers {
        if escape {
            out.push_str(&escape_header(name));
            out.push(':');
            out.push_str(&escape_header(value));
        } else {
            out.push_str(name);
            out.push(':');
            out.push_str(value);
        }
        out.push('\n');
    }

    if !frame.body.is_empty() && frame.get("content-length").is_none() {
        out.push_str("content-length:");
        out.push_str(&frame.body.len().to_string());
        out.push('\n');
    }

    out.push('\n');
    out.push_str(&frame.body);
    out.push('\0');
    out
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> ProtocolResult<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(ProtocolError::MalformedHeader(value.to_string())),
        }
    }
    Ok(out)
}

/// Buffers inbound bytes and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Set after a malformed frame whose terminating NUL has not arrived yet.
    skipping: bool,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Discards any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.skipping = false;
    }

    /// Drops bytes up to and including the next NUL octet. Returns false
    /// when the buffer ran out first.
    fn skip_past_nul(&mut self) -> bool {
        match self.buffer.iter().position(|b| *b == 0) {
            Some(end) => {
                self.buffer.drain(..=end);
                true
            }
            None => {
                self.buffer.clear();
                false
            }
        }
    }

    /// Feeds bytes and returns everything that became complete.
    ///
    /// A malformed frame produces an `Err` entry and only that frame is
    /// dropped: the decoder resumes after its terminating NUL, which may
    /// arrive in a later push. An oversized partial frame discards the
    /// whole buffer.
    pub fn push(&mut self, data: &[u8]) -> Vec<ProtocolResult<Inbound>> {
        self.buffer.extend_from_slice(data);
        let mut out = Vec::new();

        if self.skipping {
            if !self.skip_past_nul() {
                return out;
            }
            self.skipping = false;
        }

        loop {
            if self.buffer.starts_with(b"\r\n") {
                self.buffer.drain(..2);
                out.push(Ok(Inbound::HeartBeat));
                continue;
            }
            if self.buffer.starts_with(b"\n") {
                self.buffer.drain(..1);
                out.push(Ok(Inbound::HeartBeat));
                continue;
            }
            if self.buffer.is_empty() {
                break;
            }

            match parse_frame(&self.buffer) {
                Ok(Some((frame, consumed))) => {
                    self.buffer.drain(..consumed);
                    out.push(Ok(Inbound::Frame(frame)));
                }
                Ok(None) => {
                    if self.buffer.len() > MAX_FRAME_SIZE {
                        let size = self.buffer.len();
                        self.buffer.clear();
                        out.push(Err(ProtocolError::FrameTooLarge {
                            size,
                            max: MAX_FRAME_SIZE,
                        }));
                    }
                    break;
                }
                Err(e) => {
                    out.push(Err(e));
                    if !self.skip_past_nul() {
                        self.skipping = true;
                        break;
                    }
                }
            }
        }

        out
    }
}

/// Parses one frame from the start of `data`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the frame and the
/// number of bytes it occupied.
fn parse_frame(data: &[u8]) -> ProtocolResult<Option<(Frame, usize)>> {
    let mut pos = 0;
    let mut command: Option<FrameCommand> = None;
    let mut headers = Vec::new();

    // command line and headers, up to the blank line
    loop {
        let Some(offset) = data[pos..].iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };
        let raw = &data[pos..pos + offset];
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        pos += offset + 1;

        let line = std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;

        let Some(cmd) = command else {
            command = Some(line.parse()?);
            continue;
        };

        if line.is_empty() {
            break;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
        if cmd.escapes_headers() {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let Some(command) = command else {
        return Ok(None);
    };

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| ProtocolError::InvalidContentLength(value.clone()))
        })
        .transpose()?;

    let body_start = pos;
    let body_end = match content_length {
        Some(len) => {
            if len > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge {
                    size: len,
                    max: MAX_FRAME_SIZE,
                });
            }
            if data.len() <= body_start + len {
                return Ok(None);
            }
            if data[body_start + len] != 0 {
                return Err(ProtocolError::MissingTerminator);
            }
            body_start + len
        }
        None => match data[body_start..].iter().position(|b| *b == 0) {
            Some(offset) => body_start + offset,
            None => return Ok(None),
        },
    };

    let body = std::str::from_utf8(&data[body_start..body_end])
        .map_err(|_| ProtocolError::InvalidUtf8)?
        .to_string();

    Ok(Some((
        Frame {
            command,
            headers,
            body,
        },
        body_end + 1,
    )))
}

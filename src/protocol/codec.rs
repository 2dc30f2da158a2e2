//! Byte-level STOMP frame reader and writer.
//!
//! The reader parses incrementally out of an internal buffer filled with
//! `read_buf`, so a read future dropped by a `select!` never loses bytes.
//! EOLs between frames are heartbeats: they are consumed and surfaced as
//! [`FrameEvent::Heartbeat`] so the session can refresh its activity clock.

use super::frame::{headers, Command, Frame, Headers};
use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const NULL: u8 = 0;

/// Parser guards from the server options.
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    /// Maximum body size in bytes.
    pub max_body_length: usize,
    /// Maximum length of a single command or header line.
    pub max_header_length: usize,
    /// Maximum number of header lines per frame.
    pub max_headers: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_body_length: 10 * 1024 * 1024,
            max_header_length: 10 * 1024,
            max_headers: 1000,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    Closed,
    #[error("connection closed mid-frame")]
    UnexpectedEof,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("malformed header line '{0}'")]
    MalformedHeader(String),
    #[error("header line exceeds {0} bytes")]
    HeaderTooLong(usize),
    #[error("frame exceeds {0} headers")]
    TooManyHeaders(usize),
    #[error("body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("invalid content-length '{0}'")]
    InvalidContentLength(String),
    #[error("missing NUL frame terminator")]
    MissingNull,
    #[error("invalid header escape sequence in '{0}'")]
    InvalidEscape(String),
}

impl FrameError {
    /// Whether the peer simply went away, as opposed to speaking garbage.
    pub fn is_disconnect(&self) -> bool {
        match self {
            FrameError::Closed => true,
            FrameError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Events produced by the reader.
#[derive(Debug)]
pub enum FrameEvent {
    Frame(Frame),
    /// One or more bare EOLs were consumed between frames.
    Heartbeat,
}

/// Incremental frame reader with a persistent buffer.
#[derive(Debug)]
pub struct FrameReader {
    buf: BytesMut,
    limits: FrameLimits,
}

impl FrameReader {
    pub fn new(limits: FrameLimits) -> Self {
        Self {
            buf: BytesMut::with_capacity(4 * 1024),
            limits,
        }
    }

    /// Read the next event from the stream. Cancel-safe: bytes already pulled
    /// from the socket stay in the internal buffer across cancelled calls.
    pub async fn read_event<S>(&mut self, stream: &mut S) -> Result<FrameEvent, FrameError>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            if let Some(event) = self.decode()? {
                return Ok(event);
            }
            let n = stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Err(FrameError::Closed);
                }
                return Err(FrameError::UnexpectedEof);
            }
        }
    }

    /// Try to decode one event from the buffered bytes.
    pub fn decode(&mut self) -> Result<Option<FrameEvent>, FrameError> {
        if self.skip_heartbeats() {
            return Ok(Some(FrameEvent::Heartbeat));
        }
        if self.buf.is_empty() {
            return Ok(None);
        }

        // Parse without consuming; the buffer only advances once a whole
        // frame is present.
        let parsed = self.parse_frame()?;
        match parsed {
            Some((frame, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(FrameEvent::Frame(frame)))
            }
            None => Ok(None),
        }
    }

    /// Feed bytes directly; used by unit tests and the client utilities.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Consume leading EOLs, returning true if any were present.
    fn skip_heartbeats(&mut self) -> bool {
        let mut consumed = 0;
        {
            let data = &self.buf[..];
            while consumed < data.len() {
                match data[consumed] {
                    b'\n' => consumed += 1,
                    b'\r' if data.get(consumed + 1) == Some(&b'\n') => consumed += 2,
                    _ => break,
                }
            }
        }
        if consumed > 0 {
            self.buf.advance(consumed);
            true
        } else {
            false
        }
    }

    /// Parse one complete frame from the buffer; `None` if more bytes are
    /// needed. Returns the frame and the number of consumed bytes.
    fn parse_frame(&self) -> Result<Option<(Frame, usize)>, FrameError> {
        let data = &self.buf[..];
        let mut pos = 0;

        let command_line = match read_line(data, pos, self.limits.max_header_length)? {
            Some((line, next)) => {
                pos = next;
                line
            }
            None => return Ok(None),
        };
        let command = Command::from_name(&command_line)
            .ok_or_else(|| FrameError::UnknownCommand(command_line.clone()))?;
        let unescape = command.escapes_headers();

        let mut headers = Headers::new();
        loop {
            let line = match read_line(data, pos, self.limits.max_header_length)? {
                Some((line, next)) => {
                    pos = next;
                    line
                }
                None => return Ok(None),
            };
            if line.is_empty() {
                break;
            }
            if headers.len() >= self.limits.max_headers {
                return Err(FrameError::TooManyHeaders(self.limits.max_headers));
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.clone()))?;
            if unescape {
                headers.add(unescape_header(key)?, unescape_header(value)?);
            } else {
                headers.add(key, value);
            }
        }

        let body_start = pos;
        let body_end = match headers.get(headers::CONTENT_LENGTH) {
            Some(raw) => {
                let len: usize = raw
                    .parse()
                    .map_err(|_| FrameError::InvalidContentLength(raw.to_string()))?;
                if len > self.limits.max_body_length {
                    return Err(FrameError::BodyTooLarge(self.limits.max_body_length));
                }
                let end = body_start + len;
                if data.len() < end + 1 {
                    return Ok(None);
                }
                if data[end] != NULL {
                    return Err(FrameError::MissingNull);
                }
                end
            }
            None => {
                match data[body_start..].iter().position(|&b| b == NULL) {
                    Some(offset) => {
                        if offset > self.limits.max_body_length {
                            return Err(FrameError::BodyTooLarge(self.limits.max_body_length));
                        }
                        body_start + offset
                    }
                    None => {
                        if data.len() - body_start > self.limits.max_body_length {
                            return Err(FrameError::BodyTooLarge(self.limits.max_body_length));
                        }
                        return Ok(None);
                    }
                }
            }
        };

        let frame = Frame {
            command,
            headers,
            body: data[body_start..body_end].to_vec(),
        };
        // body_end points at the NUL terminator.
        Ok(Some((frame, body_end + 1)))
    }
}

/// Read a line ending in `\n` (optionally `\r\n`). Returns the line without
/// its terminator and the position after it.
fn read_line(
    data: &[u8],
    start: usize,
    max_len: usize,
) -> Result<Option<(String, usize)>, FrameError> {
    let rest = &data[start..];
    match rest.iter().position(|&b| b == b'\n') {
        Some(nl) => {
            if nl > max_len {
                return Err(FrameError::HeaderTooLong(max_len));
            }
            let mut end = nl;
            if end > 0 && rest[end - 1] == b'\r' {
                end -= 1;
            }
            let line = String::from_utf8_lossy(&rest[..end]).into_owned();
            Ok(Some((line, start + nl + 1)))
        }
        None => {
            if rest.len() > max_len {
                return Err(FrameError::HeaderTooLong(max_len));
            }
            Ok(None)
        }
    }
}

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out
}

/// Serialize a frame to wire bytes. `trailing_line` appends an extra EOL
/// after the NUL terminator for clients that expect one.
pub fn encode(frame: &Frame, trailing_line: bool) -> Vec<u8> {
    if frame.command == Command::Ping {
        return b"\n".to_vec();
    }
    let escape = frame.command.escapes_headers();
    let mut out = Vec::with_capacity(64 + frame.body.len());
    out.extend_from_slice(frame.command.as_str().as_bytes());
    out.push(b'\n');
    for (k, v) in frame.headers.iter() {
        if escape {
            out.extend_from_slice(escape_header(k).as_bytes());
            out.push(b':');
            out.extend_from_slice(escape_header(v).as_bytes());
        } else {
            out.extend_from_slice(k.as_bytes());
            out.push(b':');
            out.extend_from_slice(v.as_bytes());
        }
        out.push(b'\n');
    }
    out.push(b'\n');
    out.extend_from_slice(&frame.body);
    out.push(NULL);
    if trailing_line {
        out.push(b'\n');
    }
    out
}

/// Write a frame to the stream.
pub async fn write_frame<S>(
    stream: &mut S,
    frame: &Frame,
    trailing_line: bool,
) -> Result<(), FrameError>
where
    S: AsyncWrite + Unpin,
{
    let bytes = encode(frame, trailing_line);
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::headers as h;

    fn reader() -> FrameReader {
        FrameReader::new(FrameLimits::default())
    }

    fn decode_one(bytes: &[u8]) -> Result<Option<FrameEvent>, FrameError> {
        let mut r = reader();
        r.push(bytes);
        r.decode()
    }

    #[test]
    fn test_round_trip() {
        let frame = Frame::new(Command::Send)
            .with_header(h::DESTINATION, "/queue/q")
            .with_header("custom", "value")
            .with_body("hello");
        let bytes = encode(&frame, false);

        match decode_one(&bytes).unwrap() {
            Some(FrameEvent::Frame(parsed)) => {
                assert_eq!(parsed.command, Command::Send);
                assert_eq!(parsed.destination(), Some("/queue/q"));
                assert_eq!(parsed.header("custom"), Some("value"));
                assert_eq!(parsed.body, b"hello");
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn test_partial_frame_waits() {
        let frame = Frame::new(Command::Send)
            .with_header(h::DESTINATION, "/queue/q")
            .with_body("hello");
        let bytes = encode(&frame, false);

        let mut r = reader();
        r.push(&bytes[..bytes.len() - 3]);
        assert!(matches!(r.decode().unwrap(), None));
        r.push(&bytes[bytes.len() - 3..]);
        assert!(matches!(r.decode().unwrap(), Some(FrameEvent::Frame(_))));
    }

    #[test]
    fn test_heartbeat_eols() {
        let mut r = reader();
        r.push(b"\n\r\n");
        assert!(matches!(r.decode().unwrap(), Some(FrameEvent::Heartbeat)));
        assert!(matches!(r.decode().unwrap(), None));
    }

    #[test]
    fn test_content_length_body_with_nul() {
        let mut body = b"bin\0ary".to_vec();
        body.push(42);
        let mut frame = Frame::new(Command::Send).with_header(h::DESTINATION, "/queue/q");
        frame.headers.add(h::CONTENT_LENGTH, body.len().to_string());
        frame.body = body.clone();
        let bytes = encode(&frame, false);

        match decode_one(&bytes).unwrap() {
            Some(FrameEvent::Frame(parsed)) => assert_eq!(parsed.body, body),
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn test_header_escaping_round_trip() {
        let frame = Frame::new(Command::Send)
            .with_header(h::DESTINATION, "/queue/q")
            .with_header("weird", "a:b\nc\\d");
        let bytes = encode(&frame, false);
        match decode_one(&bytes).unwrap() {
            Some(FrameEvent::Frame(parsed)) => {
                assert_eq!(parsed.header("weird"), Some("a:b\nc\\d"));
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn test_connect_headers_not_unescaped() {
        // CONNECT predates the escaping rules; backslashes pass through.
        let bytes = b"CONNECT\nlogin:a\\b\n\n\0";
        match decode_one(bytes).unwrap() {
            Some(FrameEvent::Frame(parsed)) => {
                assert_eq!(parsed.header("login"), Some("a\\b"));
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_command() {
        let result = decode_one(b"FLY\n\n\0");
        assert!(matches!(result, Err(FrameError::UnknownCommand(_))));
    }

    #[test]
    fn test_malformed_header() {
        let result = decode_one(b"SEND\nno-colon-here\n\n\0");
        assert!(matches!(result, Err(FrameError::MalformedHeader(_))));
    }

    #[test]
    fn test_body_limit() {
        let limits = FrameLimits {
            max_body_length: 4,
            ..FrameLimits::default()
        };
        let mut r = FrameReader::new(limits);
        r.push(b"SEND\ndestination:/queue/q\n\ntoolarge\0");
        assert!(matches!(r.decode(), Err(FrameError::BodyTooLarge(4))));
    }

    #[test]
    fn test_header_count_limit() {
        let limits = FrameLimits {
            max_headers: 2,
            ..FrameLimits::default()
        };
        let mut r = FrameReader::new(limits);
        r.push(b"SEND\na:1\nb:2\nc:3\n\n\0");
        assert!(matches!(r.decode(), Err(FrameError::TooManyHeaders(2))));
    }

    #[test]
    fn test_missing_null_after_content_length() {
        let result = decode_one(b"SEND\ncontent-length:2\n\nabX\0");
        assert!(matches!(result, Err(FrameError::MissingNull)));
    }

    #[test]
    fn test_trailing_line_encoding() {
        let frame = Frame::new(Command::Receipt).with_header(h::RECEIPT_ID, "r1");
        let bytes = encode(&frame, true);
        assert!(bytes.ends_with(b"\0\n"));
    }

    #[test]
    fn test_ping_encodes_as_eol() {
        assert_eq!(encode(&Frame::ping(), false), b"\n");
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let f1 = Frame::new(Command::Begin).with_header(h::TRANSACTION, "t1");
        let f2 = Frame::new(Command::Commit).with_header(h::TRANSACTION, "t1");
        let mut r = reader();
        r.push(&encode(&f1, false));
        r.push(&encode(&f2, false));

        match r.decode().unwrap() {
            Some(FrameEvent::Frame(parsed)) => assert_eq!(parsed.command, Command::Begin),
            other => panic!("unexpected: {other:?}"),
        }
        match r.decode().unwrap() {
            Some(FrameEvent::Frame(parsed)) => assert_eq!(parsed.command, Command::Commit),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

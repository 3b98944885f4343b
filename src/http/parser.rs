//! Incremental HTTP/1.1 request parser.
//!
//! [`RequestParser`] consumes the request byte by byte as it arrives and
//! reports its structure through [`RequestHooks`]. It never buffers the URL,
//! header text or body: each hook receives the contiguous run of the current
//! input chunk that belongs to the token, so one logical token may be reported
//! over several calls. Joining those pieces is the hook implementer's job.
//!
//! ```text
//! Start ─▶ Begin ─▶ Method ─▶ Url ─▶ UrlComplete ─▶ HeaderField ⇄ HeaderValue
//!                                        │                           │
//!                                        └──────▶ HeadersComplete ◀──┘
//!                                                       │
//!                                                       ▼
//!                                                     Body ─▶ Complete
//! ```
//!
//! Any hook may return [`Flow::Stop`], which moves the parser to
//! [`ParserState::Stopped`] and makes it ignore the rest of the stream.
//! A byte without a valid transition, or [`Flow::Abort`] from a hook, moves it
//! to [`ParserState::Error`].

use crate::http::request::Method;
use thiserror::Error;

/// Default limit for the request line plus the header block.
pub const DEFAULT_MAX_HEADER_SIZE: usize = 80 * 1024;

const MAX_METHOD_LEN: usize = 16;
const CONTENT_LENGTH: &[u8] = b"content-length";
const TRANSFER_ENCODING: &[u8] = b"transfer-encoding";

/// What a hook wants the parser to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep parsing.
    Continue,
    /// Stop parsing and ignore the rest of the request. The connection stays
    /// open, e.g. for a response that is already on its way.
    Stop,
    /// The request cannot be handled; the parser fails.
    Abort,
}

/// Lifecycle of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    #[default]
    Start,
    Begin,
    Method,
    Url,
    UrlComplete,
    HeaderField,
    HeaderValue,
    HeadersComplete,
    Body,
    Complete,
    Stopped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid request method")]
    InvalidMethod,

    #[error("invalid request URL")]
    InvalidUrl,

    #[error("invalid HTTP version")]
    InvalidVersion,

    #[error("invalid header")]
    InvalidHeader,

    #[error("invalid Content-Length")]
    InvalidContentLength,

    #[error("invalid chunk size")]
    InvalidChunkSize,

    #[error("expected line feed")]
    LfExpected,

    #[error("request head exceeds {0} bytes")]
    HeaderOverflow(usize),

    #[error("request aborted by handler")]
    Aborted,

    #[error("parser is in an error state")]
    Failed,
}

/// Callbacks fired by [`RequestParser::execute`].
pub trait RequestHooks {
    fn on_begin(&mut self) -> Flow {
        Flow::Continue
    }

    fn on_method(&mut self, _method: Method) -> Flow {
        Flow::Continue
    }

    fn on_url(&mut self, _chunk: &[u8]) -> Flow {
        Flow::Continue
    }

    fn on_url_complete(&mut self) -> Flow {
        Flow::Continue
    }

    fn on_header_field(&mut self, _chunk: &[u8]) -> Flow {
        Flow::Continue
    }

    /// Also fired once with an empty chunk for a header without a value.
    fn on_header_value(&mut self, _chunk: &[u8]) -> Flow {
        Flow::Continue
    }

    fn on_headers_complete(&mut self) -> Flow {
        Flow::Continue
    }

    fn on_body(&mut self, _chunk: &[u8]) -> Flow {
        Flow::Continue
    }

    fn on_complete(&mut self) -> Flow {
        Flow::Continue
    }
}

/// Byte-level position inside the request grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lex {
    Method,
    UrlStart,
    Url,
    /// Index into `HTTP/d.d`.
    Version(u8),
    RequestLineLf,
    LineStart,
    Field,
    ValueStart,
    Value,
    ValueLf,
    HeadEndLf,
    Body,
    ChunkSize,
    ChunkExt,
    ChunkSizeLf,
    ChunkData,
    ChunkDataCr,
    ChunkDataLf,
    TrailerStart,
    Trailer,
    TrailerLf,
    TrailerEndLf,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderKind {
    Other,
    ContentLength,
    TransferEncoding,
}

/// Streaming parser for a single HTTP request.
///
/// Persistent connections are not supported, so a parser handles exactly one
/// request and is never reset.
#[derive(Debug)]
pub struct RequestParser {
    state: ParserState,
    lex: Lex,
    max_header_size: usize,
    head_len: usize,

    method: Vec<u8>,
    version: (u8, u8),

    field_len: usize,
    maybe_content_length: bool,
    maybe_transfer_encoding: bool,
    header: HeaderKind,

    content_length: Option<u64>,
    length_digits: bool,
    length_done: bool,
    encoding: Vec<u8>,
    chunked: bool,

    remaining: u64,
    chunk_digits: bool,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! fire {
    ($parser:ident, $flow:expr) => {
        match $flow {
            Flow::Continue => {}
            Flow::Stop => {
                $parser.state = ParserState::Stopped;
                return Ok(());
            }
            Flow::Abort => {
                $parser.state = ParserState::Error;
                return Err(ParseError::Aborted);
            }
        }
    };
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_max_header_size(DEFAULT_MAX_HEADER_SIZE)
    }

    pub fn with_max_header_size(max_header_size: usize) -> Self {
        Self {
            state: ParserState::Start,
            lex: Lex::Method,
            max_header_size,
            head_len: 0,
            method: Vec::with_capacity(MAX_METHOD_LEN),
            version: (0, 0),
            field_len: 0,
            maybe_content_length: false,
            maybe_transfer_encoding: false,
            header: HeaderKind::Other,
            content_length: None,
            length_digits: false,
            length_done: false,
            encoding: Vec::new(),
            chunked: false,
            remaining: 0,
            chunk_digits: false,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// `(major, minor)` of the request line, `(0, 0)` until it has been read.
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Declared body length, once the headers are complete.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            ParserState::Complete | ParserState::Stopped | ParserState::Error
        )
    }

    /// Feeds the next chunk of the request.
    ///
    /// Bytes arriving after the request is complete or stopped are ignored.
    pub fn execute<H>(&mut self, data: &[u8], hooks: &mut H) -> Result<(), ParseError>
    where
        H: RequestHooks + ?Sized,
    {
        match self.state {
            ParserState::Complete | ParserState::Stopped => return Ok(()),
            ParserState::Error => return Err(ParseError::Failed),
            _ => {}
        }

        // Start of the token run in progress within `data`.
        let mut mark = 0;
        let mut i = 0;

        while i < data.len() {
            let c = data[i];

            if self.in_head() {
                self.head_len += 1;
                if self.head_len > self.max_header_size {
                    return self.fail(ParseError::HeaderOverflow(self.max_header_size));
                }
            }

            match self.lex {
                Lex::Method => {
                    if self.state == ParserState::Start {
                        // Tolerate stray line breaks before the request line.
                        if c == b'\r' || c == b'\n' {
                            i += 1;
                            continue;
                        }
                        if !c.is_ascii_uppercase() {
                            return self.fail(ParseError::InvalidMethod);
                        }
                        self.state = ParserState::Begin;
                        fire!(self, hooks.on_begin());
                    }

                    if c == b' ' {
                        let method = match Method::from_bytes(&self.method) {
                            Some(m) => m,
                            None => return self.fail(ParseError::InvalidMethod),
                        };
                        self.state = ParserState::Method;
                        self.lex = Lex::UrlStart;
                        fire!(self, hooks.on_method(method));
                    } else if c.is_ascii_uppercase() && self.method.len() < MAX_METHOD_LEN {
                        self.method.push(c);
                    } else {
                        return self.fail(ParseError::InvalidMethod);
                    }
                }

                Lex::UrlStart => {
                    if !c.is_ascii_graphic() {
                        return self.fail(ParseError::InvalidUrl);
                    }
                    self.state = ParserState::Url;
                    self.lex = Lex::Url;
                    mark = i;
                }

                Lex::Url => {
                    if c == b' ' {
                        if i > mark {
                            fire!(self, hooks.on_url(&data[mark..i]));
                        }
                        self.lex = Lex::Version(0);
                    } else if c == b'\r' || c == b'\n' {
                        return self.fail(ParseError::InvalidVersion);
                    } else if !c.is_ascii_graphic() {
                        return self.fail(ParseError::InvalidUrl);
                    }
                }

                Lex::Version(n) => {
                    let ok = match n {
                        0..=4 => c == b"HTTP/"[n as usize],
                        5 if c.is_ascii_digit() => {
                            self.version.0 = c - b'0';
                            true
                        }
                        6 => c == b'.',
                        7 if c.is_ascii_digit() => {
                            self.version.1 = c - b'0';
                            true
                        }
                        8 => c == b'\r',
                        _ => false,
                    };
                    if !ok {
                        return self.fail(ParseError::InvalidVersion);
                    }
                    self.lex = if n == 8 {
                        Lex::RequestLineLf
                    } else {
                        Lex::Version(n + 1)
                    };
                }

                Lex::RequestLineLf => {
                    if c != b'\n' {
                        return self.fail(ParseError::LfExpected);
                    }
                    self.state = ParserState::UrlComplete;
                    self.lex = Lex::LineStart;
                    fire!(self, hooks.on_url_complete());
                }

                Lex::LineStart => {
                    if c == b'\r' {
                        self.lex = Lex::HeadEndLf;
                    } else if is_token(c) {
                        self.begin_field(c);
                        self.state = ParserState::HeaderField;
                        self.lex = Lex::Field;
                        mark = i;
                    } else {
                        return self.fail(ParseError::InvalidHeader);
                    }
                }

                Lex::Field => {
                    if c == b':' {
                        if i > mark {
                            fire!(self, hooks.on_header_field(&data[mark..i]));
                        }
                        self.end_field();
                        self.lex = Lex::ValueStart;
                    } else if is_token(c) {
                        self.match_field(c);
                    } else {
                        return self.fail(ParseError::InvalidHeader);
                    }
                }

                Lex::ValueStart => {
                    if c == b' ' || c == b'\t' {
                        // Leading whitespace is not part of the value.
                    } else if c == b'\r' {
                        self.state = ParserState::HeaderValue;
                        self.lex = Lex::ValueLf;
                        fire!(self, hooks.on_header_value(&[]));
                        if let Err(e) = self.end_value() {
                            return self.fail(e);
                        }
                    } else if is_value_byte(c) {
                        self.state = ParserState::HeaderValue;
                        self.lex = Lex::Value;
                        mark = i;
                        if let Err(e) = self.match_value(c) {
                            return self.fail(e);
                        }
                    } else {
                        return self.fail(ParseError::InvalidHeader);
                    }
                }

                Lex::Value => {
                    if c == b'\r' {
                        if i > mark {
                            fire!(self, hooks.on_header_value(&data[mark..i]));
                        }
                        self.lex = Lex::ValueLf;
                        if let Err(e) = self.end_value() {
                            return self.fail(e);
                        }
                    } else if is_value_byte(c) {
                        if let Err(e) = self.match_value(c) {
                            return self.fail(e);
                        }
                    } else {
                        return self.fail(ParseError::InvalidHeader);
                    }
                }

                Lex::ValueLf => {
                    if c != b'\n' {
                        return self.fail(ParseError::LfExpected);
                    }
                    self.lex = Lex::LineStart;
                }

                Lex::HeadEndLf => {
                    if c != b'\n' {
                        return self.fail(ParseError::LfExpected);
                    }
                    self.state = ParserState::HeadersComplete;
                    if self.chunked {
                        self.lex = Lex::ChunkSize;
                        self.remaining = 0;
                        self.chunk_digits = false;
                    } else if let Some(n) = self.content_length.filter(|n| *n > 0) {
                        self.lex = Lex::Body;
                        self.remaining = n;
                    } else {
                        self.lex = Lex::Done;
                    }

                    fire!(self, hooks.on_headers_complete());

                    if self.lex == Lex::Done {
                        self.state = ParserState::Complete;
                        fire!(self, hooks.on_complete());
                        return Ok(());
                    }
                }

                Lex::Body | Lex::ChunkData => {
                    let n = self.remaining.min((data.len() - i) as u64) as usize;
                    self.state = ParserState::Body;
                    self.remaining -= n as u64;
                    let body = &data[i..i + n];
                    if self.remaining == 0 {
                        self.lex = match self.lex {
                            Lex::Body => Lex::Done,
                            _ => Lex::ChunkDataCr,
                        };
                    }
                    fire!(self, hooks.on_body(body));

                    if self.lex == Lex::Done {
                        self.state = ParserState::Complete;
                        fire!(self, hooks.on_complete());
                        return Ok(());
                    }
                    i += n;
                    continue;
                }

                Lex::ChunkSize => {
                    if let Some(d) = hex_value(c) {
                        self.remaining = match self
                            .remaining
                            .checked_mul(16)
                            .and_then(|r| r.checked_add(d as u64))
                        {
                            Some(r) => r,
                            None => return self.fail(ParseError::InvalidChunkSize),
                        };
                        self.chunk_digits = true;
                    } else if !self.chunk_digits {
                        return self.fail(ParseError::InvalidChunkSize);
                    } else if c == b'\r' {
                        self.lex = Lex::ChunkSizeLf;
                    } else if c == b';' || c == b' ' || c == b'\t' {
                        self.lex = Lex::ChunkExt;
                    } else {
                        return self.fail(ParseError::InvalidChunkSize);
                    }
                }

                Lex::ChunkExt => {
                    if c == b'\r' {
                        self.lex = Lex::ChunkSizeLf;
                    }
                }

                Lex::ChunkSizeLf => {
                    if c != b'\n' {
                        return self.fail(ParseError::LfExpected);
                    }
                    self.lex = if self.remaining == 0 {
                        Lex::TrailerStart
                    } else {
                        Lex::ChunkData
                    };
                }

                Lex::ChunkDataCr => {
                    if c != b'\r' {
                        return self.fail(ParseError::InvalidChunkSize);
                    }
                    self.lex = Lex::ChunkDataLf;
                }

                Lex::ChunkDataLf => {
                    if c != b'\n' {
                        return self.fail(ParseError::LfExpected);
                    }
                    self.lex = Lex::ChunkSize;
                    self.remaining = 0;
                    self.chunk_digits = false;
                }

                Lex::TrailerStart => {
                    self.lex = if c == b'\r' {
                        Lex::TrailerEndLf
                    } else {
                        Lex::Trailer
                    };
                }

                Lex::Trailer => {
                    if c == b'\r' {
                        self.lex = Lex::TrailerLf;
                    }
                }

                Lex::TrailerLf => {
                    if c != b'\n' {
                        return self.fail(ParseError::LfExpected);
                    }
                    self.lex = Lex::TrailerStart;
                }

                Lex::TrailerEndLf => {
                    if c != b'\n' {
                        return self.fail(ParseError::LfExpected);
                    }
                    self.lex = Lex::Done;
                    self.state = ParserState::Complete;
                    fire!(self, hooks.on_complete());
                    return Ok(());
                }

                Lex::Done => return Ok(()),
            }

            i += 1;
        }

        // Report the part of a token that reached the end of this chunk.
        if mark < data.len() {
            let tail = &data[mark..];
            match self.lex {
                Lex::Url => fire!(self, hooks.on_url(tail)),
                Lex::Field => fire!(self, hooks.on_header_field(tail)),
                Lex::Value => fire!(self, hooks.on_header_value(tail)),
                _ => {}
            }
        }

        Ok(())
    }

    fn in_head(&self) -> bool {
        !matches!(
            self.lex,
            Lex::Body
                | Lex::ChunkSize
                | Lex::ChunkExt
                | Lex::ChunkSizeLf
                | Lex::ChunkData
                | Lex::ChunkDataCr
                | Lex::ChunkDataLf
                | Lex::TrailerStart
                | Lex::Trailer
                | Lex::TrailerLf
                | Lex::TrailerEndLf
                | Lex::Done
        )
    }

    fn fail(&mut self, err: ParseError) -> Result<(), ParseError> {
        tracing::debug!(lex = ?self.lex, error = %err, "Request parse failed");
        self.state = ParserState::Error;
        Err(err)
    }

    fn begin_field(&mut self, c: u8) {
        self.field_len = 0;
        self.maybe_content_length = true;
        self.maybe_transfer_encoding = true;
        self.match_field(c);
    }

    fn match_field(&mut self, c: u8) {
        let c = c.to_ascii_lowercase();
        let n = self.field_len;
        self.maybe_content_length &= CONTENT_LENGTH.get(n) == Some(&c);
        self.maybe_transfer_encoding &= TRANSFER_ENCODING.get(n) == Some(&c);
        self.field_len += 1;
    }

    fn end_field(&mut self) {
        self.header = if self.maybe_content_length && self.field_len == CONTENT_LENGTH.len() {
            HeaderKind::ContentLength
        } else if self.maybe_transfer_encoding && self.field_len == TRANSFER_ENCODING.len() {
            HeaderKind::TransferEncoding
        } else {
            HeaderKind::Other
        };

        match self.header {
            HeaderKind::ContentLength => {
                self.length_digits = false;
                self.length_done = false;
            }
            HeaderKind::TransferEncoding => self.encoding.clear(),
            HeaderKind::Other => {}
        }
    }

    fn match_value(&mut self, c: u8) -> Result<(), ParseError> {
        match self.header {
            HeaderKind::ContentLength => {
                if c.is_ascii_digit() && !self.length_done {
                    // A second Content-Length header is ambiguous framing.
                    if !self.length_digits && self.content_length.is_some() {
                        return Err(ParseError::InvalidContentLength);
                    }
                    let current = self.content_length.unwrap_or(0);
                    let next = current
                        .checked_mul(10)
                        .and_then(|v| v.checked_add((c - b'0') as u64))
                        .ok_or(ParseError::InvalidContentLength)?;
                    self.content_length = Some(next);
                    self.length_digits = true;
                } else if (c == b' ' || c == b'\t') && self.length_digits {
                    self.length_done = true;
                } else {
                    return Err(ParseError::InvalidContentLength);
                }
            }
            // Only the last coding decides the framing.
            HeaderKind::TransferEncoding => {
                if c == b',' {
                    self.encoding.clear();
                } else if self.encoding.len() < 64 {
                    self.encoding.push(c.to_ascii_lowercase());
                }
            }
            HeaderKind::Other => {}
        }
        Ok(())
    }

    fn end_value(&mut self) -> Result<(), ParseError> {
        match self.header {
            HeaderKind::ContentLength if !self.length_digits => {
                Err(ParseError::InvalidContentLength)
            }
            HeaderKind::TransferEncoding => {
                self.chunked = self.encoding.trim_ascii() == b"chunked";
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn is_token(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
                | b'`' | b'|' | b'~'
        )
}

fn is_value_byte(c: u8) -> bool {
    c == b'\t' || (c >= 0x20 && c != 0x7f)
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

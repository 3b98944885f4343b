//! Incremental URL parser.
//!
//! The request parser cannot know where a URL ends until it sees the byte
//! after it, and that byte may arrive in a later read. [`UrlParser`] is fed
//! arbitrary chunks with [`UrlParser::add_chunk`] and is told explicitly when
//! the URL is finished with [`UrlParser::complete`].
//!
//! Every callback receives a slice of the parser's own buffer. The buffer is
//! append-only, so offsets recorded while scanning an earlier chunk stay valid
//! after later chunks are added.
//!
//! ```text
//!  Start ──'/'──────────────────────────────────────┐
//!    │                                              ▼
//!    └─▶ Protocol ─':'─▶ Slash1 ─'/'─▶ Slash2 ─'/'─▶ Host ─'/'─▶ Segment ─'?'─▶ Key ⇄ Value
//!                                                  │            ▲
//!                                                 ':'           │
//!                                                  ▼            │
//!                                               PrePort ─▶ Port ┘
//! ```

use thiserror::Error;

/// States of the URL state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UrlState {
    #[default]
    Start,
    Protocol,
    Slash1,
    Slash2,
    Host,
    PrePort,
    Port,
    Segment,
    Key,
    Value,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("invalid character 0x{0:02x} in URL")]
    IllegalByte(u8),

    #[error("unexpected character 0x{byte:02x} in URL state {state:?}")]
    Unexpected { state: UrlState, byte: u8 },

    #[error("URL cannot end in state {0:?}")]
    Incomplete(UrlState),

    #[error("URL parser is in an error state")]
    Failed,

    #[error("URL has already been completed")]
    Completed,
}

/// Events emitted by [`UrlParser`].
///
/// All methods have empty default implementations, so an implementer only
/// overrides what it cares about.
pub trait UrlHooks {
    fn on_begin(&mut self) {}
    fn on_protocol(&mut self, _protocol: &[u8]) {}
    fn on_host(&mut self, _host: &[u8]) {}
    fn on_port(&mut self, _port: &[u8]) {}
    fn on_path_segment(&mut self, _segment: &[u8]) {}
    /// The full path including its leading `/`.
    fn on_path_complete(&mut self, _path: &[u8]) {}
    fn on_key_value(&mut self, _key: &[u8], _value: &[u8]) {}
    /// The whole URL, fired by [`UrlParser::complete`].
    fn on_complete(&mut self, _url: &[u8]) {}
}

impl UrlHooks for () {}

/// Characters accepted anywhere in a URL.
///
/// This is the unreserved and reserved sets of RFC 3986 plus `%`. Percent
/// escapes are accepted but never decoded.
pub fn is_legal_url_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            b'-' | b'.'
                | b'_'
                | b'~'
                | b':'
                | b'/'
                | b'?'
                | b'#'
                | b'['
                | b']'
                | b'@'
                | b'!'
                | b'$'
                | b'&'
                | b'\''
                | b'('
                | b')'
                | b'*'
                | b'+'
                | b','
                | b';'
                | b'='
                | b'%'
        )
}

#[derive(Debug, Default)]
pub struct UrlParser {
    state: UrlState,
    buffer: Vec<u8>,
    /// Next byte of `buffer` to scan.
    pos: usize,

    protocol: usize,
    host: usize,
    port: usize,
    path: usize,
    segment: usize,
    key: usize,
    key_end: usize,
    value: usize,

    completed: bool,
}

impl UrlParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> UrlState {
        self.state
    }

    /// All URL bytes received so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Appends `chunk` to the buffer and scans it, firing hooks as tokens end.
    ///
    /// Once an illegal byte is seen the parser stays in [`UrlState::Error`] and
    /// no further hooks fire.
    pub fn add_chunk<H>(&mut self, chunk: &[u8], hooks: &mut H) -> Result<(), UrlError>
    where
        H: UrlHooks + ?Sized,
    {
        if self.completed {
            return Err(UrlError::Completed);
        }
        if self.state == UrlState::Error {
            return Err(UrlError::Failed);
        }

        self.buffer.extend_from_slice(chunk);

        while self.pos < self.buffer.len() {
            let i = self.pos;
            let c = self.buffer[i];

            if !is_legal_url_byte(c) {
                self.state = UrlState::Error;
                return Err(UrlError::IllegalByte(c));
            }

            self.step(i, c, hooks)?;
            self.pos += 1;
        }

        Ok(())
    }

    /// Marks the URL as finished.
    ///
    /// Tokens that only end with the URL itself (the last path segment, the
    /// last value, a bare host or port) are emitted here, followed by
    /// `on_complete`.
    pub fn complete<H>(&mut self, hooks: &mut H) -> Result<(), UrlError>
    where
        H: UrlHooks + ?Sized,
    {
        if self.completed {
            return Err(UrlError::Completed);
        }

        let end = self.buffer.len();
        let buf = &self.buffer;

        match self.state {
            UrlState::Segment => {
                hooks.on_path_segment(&buf[self.segment..end]);
                hooks.on_path_complete(&buf[self.path..end]);
            }
            UrlState::Value => {
                hooks.on_key_value(&buf[self.key..self.key_end], &buf[self.value..end]);
            }
            UrlState::Host => hooks.on_host(&buf[self.host..end]),
            UrlState::Port => hooks.on_port(&buf[self.port..end]),
            UrlState::Error => return Err(UrlError::Failed),
            state => {
                self.state = UrlState::Error;
                return Err(UrlError::Incomplete(state));
            }
        }

        self.completed = true;
        hooks.on_complete(&self.buffer);
        Ok(())
    }

    fn step<H>(&mut self, i: usize, c: u8, hooks: &mut H) -> Result<(), UrlError>
    where
        H: UrlHooks + ?Sized,
    {
        match self.state {
            UrlState::Start => {
                hooks.on_begin();
                if c == b'/' {
                    self.enter_path(i);
                } else if c.is_ascii_alphabetic() {
                    self.state = UrlState::Protocol;
                    self.protocol = i;
                } else {
                    return self.unexpected(c);
                }
            }
            UrlState::Protocol => match c {
                b':' => {
                    hooks.on_protocol(&self.buffer[self.protocol..i]);
                    self.state = UrlState::Slash1;
                }
                b'+' | b'-' | b'.' => {}
                c if c.is_ascii_alphanumeric() => {}
                _ => return self.unexpected(c),
            },
            UrlState::Slash1 => {
                if c != b'/' {
                    return self.unexpected(c);
                }
                self.state = UrlState::Slash2;
            }
            UrlState::Slash2 => {
                if c != b'/' {
                    return self.unexpected(c);
                }
                self.state = UrlState::Host;
                self.host = i + 1;
            }
            UrlState::Host => match c {
                b':' => {
                    hooks.on_host(&self.buffer[self.host..i]);
                    self.state = UrlState::PrePort;
                }
                b'/' => {
                    hooks.on_host(&self.buffer[self.host..i]);
                    self.enter_path(i);
                }
                _ => {}
            },
            UrlState::PrePort => {
                if !c.is_ascii_digit() {
                    return self.unexpected(c);
                }
                self.state = UrlState::Port;
                self.port = i;
            }
            UrlState::Port => {
                if c == b'/' {
                    hooks.on_port(&self.buffer[self.port..i]);
                    self.enter_path(i);
                } else if !c.is_ascii_digit() {
                    return self.unexpected(c);
                }
            }
            UrlState::Segment => match c {
                b'/' => {
                    hooks.on_path_segment(&self.buffer[self.segment..i]);
                    self.segment = i + 1;
                }
                b'?' => {
                    hooks.on_path_segment(&self.buffer[self.segment..i]);
                    hooks.on_path_complete(&self.buffer[self.path..i]);
                    self.state = UrlState::Key;
                    self.key = i + 1;
                }
                _ => {}
            },
            UrlState::Key => match c {
                b'=' => {
                    self.key_end = i;
                    self.value = i + 1;
                    self.state = UrlState::Value;
                }
                // A key without a value.
                b'&' => {
                    hooks.on_key_value(&self.buffer[self.key..i], &[]);
                    self.key = i + 1;
                }
                _ => {}
            },
            UrlState::Value => {
                if c == b'&' {
                    hooks.on_key_value(
                        &self.buffer[self.key..self.key_end],
                        &self.buffer[self.value..i],
                    );
                    self.state = UrlState::Key;
                    self.key = i + 1;
                }
            }
            UrlState::Error => return Err(UrlError::Failed),
        }

        Ok(())
    }

    fn enter_path(&mut self, slash: usize) {
        self.state = UrlState::Segment;
        self.path = slash;
        self.segment = slash + 1;
    }

    fn unexpected(&mut self, byte: u8) -> Result<(), UrlError> {
        let state = self.state;
        self.state = UrlState::Error;
        Err(UrlError::Unexpected { state, byte })
    }
}

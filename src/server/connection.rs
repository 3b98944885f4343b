use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::server::ConnectionError;
use crate::server::handler::ConnectionHandler;
use crate::server::registry::RegistryEvent;

/// Upper bound on the slices handed to one vectored write.
const MAX_IOVECS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub(crate) u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

pub(crate) enum Command {
    Send(Bytes),
    Close,
    Kill,
    DisableTimeout,
    Post(Job),
}

/// Bytes accepted for sending but not yet written to the socket.
///
/// Chunks leave in the order they were pushed; a partial write only trims the
/// front chunk.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.len += data.len();
        self.chunks.push_back(data);
    }

    /// Total number of unsent bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The front of the queue as slices for one vectored write.
    pub fn io_slices(&self) -> Vec<IoSlice<'_>> {
        self.chunks
            .iter()
            .take(MAX_IOVECS)
            .map(|chunk| IoSlice::new(chunk))
            .collect()
    }

    /// Drops the first `n` bytes after they were written.
    pub fn consume(&mut self, mut n: usize) {
        n = n.min(self.len);
        self.len -= n;
        while n > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if n >= front.len() {
                n -= front.len();
                self.chunks.pop_front();
            } else {
                front.advance(n);
                n = 0;
            }
        }
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

/// Cloneable, thread-safe way to reach a connection from outside its task.
///
/// Every call is queued to the owning task and applied in order. Once the
/// connection is gone they fail with [`ConnectionError::Closed`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnId,
    peer: SocketAddr,
    tx: UnboundedSender<Command>,
}

impl ConnectionHandle {
    pub(crate) fn channel(id: ConnId, peer: SocketAddr) -> (Self, UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, peer, tx }, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn send(&self, data: impl Into<Bytes>) -> Result<(), ConnectionError> {
        self.command(Command::Send(data.into()))
    }

    /// Closes the connection once everything queued has been written.
    pub fn close(&self) -> Result<(), ConnectionError> {
        self.command(Command::Close)
    }

    /// Closes the connection now, dropping unsent bytes.
    pub fn kill(&self) -> Result<(), ConnectionError> {
        self.command(Command::Kill)
    }

    pub fn disable_timeout(&self) -> Result<(), ConnectionError> {
        self.command(Command::DisableTimeout)
    }

    /// Runs `f` on the connection inside its owning task.
    pub fn post<F>(&self, f: F) -> Result<(), ConnectionError>
    where
        F: FnOnce(&mut Connection) + Send + 'static,
    {
        self.command(Command::Post(Box::new(f)))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn command(&self, cmd: Command) -> Result<(), ConnectionError> {
        self.tx
            .send(cmd)
            .map_err(|_| ConnectionError::Closed(self.id))
    }
}

/// One accepted TCP connection.
///
/// Only the task that owns the connection ever touches it; handlers get it by
/// reference. `kill` and `close` only record the request, the task carries it
/// out once the current callback has returned.
#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    peer: SocketAddr,
    // None once killed.
    stream: Option<TcpStream>,
    queue: OutboundQueue,
    close_after_flush: bool,
    kill_requested: bool,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    handle: ConnectionHandle,
}

impl Connection {
    pub(crate) fn new(
        id: ConnId,
        stream: TcpStream,
        peer: SocketAddr,
        config: &ServerConfig,
    ) -> (Self, UnboundedReceiver<Command>) {
        let (handle, commands) = ConnectionHandle::channel(id, peer);
        let conn = Self {
            id,
            peer,
            stream: Some(stream),
            queue: OutboundQueue::new(),
            close_after_flush: false,
            kill_requested: false,
            timeout: config.timeout(),
            deadline: None,
            handle,
        };
        (conn, commands)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Unsent bytes in the outbound queue.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_alive(&self) -> bool {
        self.stream.is_some() && !self.kill_requested
    }

    pub fn is_closing(&self) -> bool {
        self.close_after_flush
    }

    /// Appends to the outbound queue. Ignored once the connection is dead.
    pub fn send(&mut self, data: impl Into<Bytes>) {
        if self.stream.is_none() {
            return;
        }
        self.queue.push(data.into());
    }

    /// Closes after the outbound queue drains, or right away if it is empty.
    pub fn close(&mut self) {
        self.close_after_flush = true;
        if self.queue.is_empty() {
            self.kill_requested = true;
        }
    }

    pub fn kill(&mut self) {
        self.kill_requested = true;
    }

    /// Turns the inactivity timeout off for good.
    pub fn disable_timeout(&mut self) {
        self.timeout = None;
        self.deadline = None;
    }

    fn rearm_timer(&mut self) {
        if let Some(timeout) = self.timeout {
            self.deadline = Some(Instant::now() + timeout);
        }
    }
}

/// Drives one connection until it dies.
pub(crate) struct ConnectionTask<H: ConnectionHandler> {
    conn: Connection,
    handler: Arc<H>,
    ctx: Option<H::Context>,
    commands: UnboundedReceiver<Command>,
    events: UnboundedSender<RegistryEvent>,
    read_buf: Box<[u8]>,
}

impl<H: ConnectionHandler> ConnectionTask<H> {
    pub(crate) fn new(
        conn: Connection,
        handler: Arc<H>,
        ctx: H::Context,
        commands: UnboundedReceiver<Command>,
        events: UnboundedSender<RegistryEvent>,
        max_read_size: usize,
    ) -> Self {
        Self {
            conn,
            handler,
            ctx: Some(ctx),
            commands,
            events,
            read_buf: vec![0u8; max_read_size.max(1)].into_boxed_slice(),
        }
    }

    pub(crate) async fn run(mut self) {
        self.conn.rearm_timer();

        loop {
            if self.conn.kill_requested {
                self.kill();
            }
            let Some(stream) = self.conn.stream.as_ref() else {
                break;
            };
            let want_write = !self.conn.queue.is_empty();
            let deadline = self.conn.deadline;

            tokio::select! {
                biased;

                Some(cmd) = self.commands.recv() => self.apply(cmd),
                res = stream.writable(), if want_write => match res {
                    Ok(()) => self.on_writable(),
                    Err(e) => self.fail("writable", e),
                },
                res = stream.readable() => match res {
                    Ok(()) => self.on_readable(),
                    Err(e) => self.fail("readable", e),
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_timeout();
                }
            }
        }

        trace!(conn = %self.conn.id, "Connection task finished");
    }

    fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::Send(data) => self.conn.send(data),
            Command::Close => self.conn.close(),
            Command::Kill => self.conn.kill(),
            Command::DisableTimeout => self.conn.disable_timeout(),
            Command::Post(job) => job(&mut self.conn),
        }
    }

    fn on_readable(&mut self) {
        let Some(stream) = self.conn.stream.as_ref() else {
            return;
        };

        match stream.try_read(&mut self.read_buf) {
            Ok(0) => {
                info!(conn = %self.conn.id, peer = %self.conn.peer, "Connection closed by peer");
                self.kill();
            }
            Ok(n) => {
                trace!(conn = %self.conn.id, bytes = n, "Received data");
                let Some(ctx) = self.ctx.as_mut() else {
                    return;
                };
                if let Err(e) = self
                    .handler
                    .on_receive(&mut self.conn, ctx, &self.read_buf[..n])
                {
                    warn!(conn = %self.conn.id, peer = %self.conn.peer, error = %e, "Receive failed");
                    self.kill();
                    return;
                }
                self.conn.rearm_timer();
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => self.fail("read", e),
        }
    }

    fn on_writable(&mut self) {
        let Some(stream) = self.conn.stream.as_ref() else {
            return;
        };

        let res = {
            let slices = self.conn.queue.io_slices();
            stream.try_write_vectored(&slices)
        };

        match res {
            Ok(0) => {
                warn!(conn = %self.conn.id, "Socket accepted no bytes");
                self.kill();
            }
            Ok(n) => {
                self.conn.queue.consume(n);
                trace!(conn = %self.conn.id, written = n, remaining = self.conn.queue.len(), "Wrote data");
                if self.conn.queue.is_empty() && self.conn.close_after_flush {
                    self.kill();
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => self.fail("write", e),
        }
    }

    fn on_timeout(&mut self) {
        info!(conn = %self.conn.id, peer = %self.conn.peer, "Connection timed out");
        self.kill();
    }

    fn fail(&mut self, op: &'static str, e: io::Error) {
        warn!(conn = %self.conn.id, peer = %self.conn.peer, op, error = %e, "Socket error");
        self.kill();
    }

    /// Tears the connection down. Runs its effects at most once.
    fn kill(&mut self) {
        let Some(stream) = self.conn.stream.take() else {
            return;
        };
        debug!(conn = %self.conn.id, peer = %self.conn.peer, unsent = self.conn.queue.len(), "Killing connection");
        drop(stream);
        self.conn.deadline = None;
        self.conn.queue.clear();

        if let Some(ctx) = self.ctx.take() {
            self.handler.on_disconnect(&self.conn, ctx);
        }
        // Reported last: an empty registry means no callback is pending.
        if self.events.send(RegistryEvent::Closed(self.conn.id)).is_err() {
            trace!(conn = %self.conn.id, "Server already gone");
        }
    }
}

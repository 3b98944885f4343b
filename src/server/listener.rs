use anyhow::Context as _;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::server::ConnectionError;
use crate::server::connection::{ConnId, Connection, ConnectionTask};
use crate::server::handler::ConnectionHandler;
use crate::server::registry::{Registry, RegistryEvent};

const LISTEN_BACKLOG: u32 = 1024;

type RegistryJob = Box<dyn FnOnce(&Registry) + Send>;

enum Control {
    Stop,
    Post(RegistryJob),
}

/// Controls a running [`TcpServer`] from any task or thread.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    tx: UnboundedSender<Control>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, kills every live connection and makes
    /// [`TcpServer::run`] return once they are all gone.
    pub fn stop(&self) -> Result<(), ConnectionError> {
        self.tx
            .send(Control::Stop)
            .map_err(|_| ConnectionError::ServerStopped)
    }

    /// Runs `f` against the registry inside the server task.
    pub fn post<F>(&self, f: F) -> Result<(), ConnectionError>
    where
        F: FnOnce(&Registry) + Send + 'static,
    {
        self.tx
            .send(Control::Post(Box::new(f)))
            .map_err(|_| ConnectionError::ServerStopped)
    }
}

/// Accepts TCP connections and hands each one to a [`ConnectionHandler`].
pub struct TcpServer<H: ConnectionHandler> {
    config: ServerConfig,
    handler: Arc<H>,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Registry,
    next_id: u64,
    control_tx: UnboundedSender<Control>,
    control_rx: UnboundedReceiver<Control>,
    events_tx: UnboundedSender<RegistryEvent>,
    events_rx: UnboundedReceiver<RegistryEvent>,
}

impl<H: ConnectionHandler> TcpServer<H> {
    /// Binds the listening socket.
    ///
    /// Without an explicit address the server listens on the IPv6 wildcard,
    /// which accepts IPv4 clients as well on dual-stack hosts, and falls back
    /// to the IPv4 wildcard where IPv6 is unavailable.
    pub async fn bind(config: ServerConfig, handler: H) -> anyhow::Result<Self> {
        let listener = bind_listener(&config)
            .with_context(|| format!("failed to listen on port {}", config.port))?;
        let local_addr = listener.local_addr()?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            handler: Arc::new(handler),
            listener,
            local_addr,
            registry: Registry::default(),
            next_id: 1,
            control_tx,
            control_rx,
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            local_addr: self.local_addr,
            tx: self.control_tx.clone(),
        }
    }

    /// Serves connections until [`ServerHandle::stop`] is called.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr, "Listening");

        loop {
            tokio::select! {
                biased;

                Some(event) = self.events_rx.recv() => self.on_event(event),
                Some(control) = self.control_rx.recv() => match control {
                    Control::Stop => break,
                    Control::Post(job) => job(&self.registry),
                },
                res = self.listener.accept() => self.on_acceptable(res),
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn on_event(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Closed(id) => {
                self.registry.remove(id);
                debug!(conn = %id, live = self.registry.len(), "Connection removed");
            }
        }
    }

    fn on_acceptable(&mut self, res: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, peer) = match res {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "accept() failed");
                return;
            }
        };

        let id = ConnId(self.next_id);
        self.next_id += 1;

        let (mut conn, commands) = Connection::new(id, stream, peer, &self.config);
        let ctx = match self.handler.on_connect(&mut conn) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(conn = %id, %peer, error = %e, "Connection rejected");
                return;
            }
        };

        info!(conn = %id, %peer, "Accepted connection");
        self.registry.insert(conn.handle());

        let task = ConnectionTask::new(
            conn,
            Arc::clone(&self.handler),
            ctx,
            commands,
            self.events_tx.clone(),
            self.config.max_read_size,
        );
        tokio::spawn(task.run());
    }

    async fn shutdown(self) {
        let TcpServer {
            listener,
            mut registry,
            events_tx,
            mut events_rx,
            ..
        } = self;
        drop(listener);
        drop(events_tx);

        info!(connections = registry.len(), "Stopping server");
        for handle in registry.iter() {
            if handle.kill().is_err() {
                debug!(conn = %handle.id(), "Connection already finished");
            }
        }

        while !registry.is_empty() {
            match events_rx.recv().await {
                Some(RegistryEvent::Closed(id)) => {
                    registry.remove(id);
                }
                None => break,
            }
        }
        info!("Server stopped");
    }
}

fn bind_listener(config: &ServerConfig) -> io::Result<TcpListener> {
    let candidates = match config.address {
        Some(ip) => vec![SocketAddr::new(ip, config.port)],
        None => vec![
            SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), config.port),
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), config.port),
        ],
    };

    let mut last_err = None;
    for addr in candidates {
        match listen_on(addr) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!(%addr, error = %e, "Bind failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to bind")))
}

fn listen_on(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv6() {
        TcpSocket::new_v6()?
    } else {
        TcpSocket::new_v4()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

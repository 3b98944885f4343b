use crate::server::connection::Connection;

/// Callbacks a protocol implements on top of raw TCP connections.
///
/// All three run inside the task that owns the connection, so they never race
/// with each other for the same connection. They must not block.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Per-connection state, created on connect and handed back on disconnect.
    type Context: Send + 'static;

    /// Called once for every accepted connection before it is registered.
    /// Returning an error drops the socket right away; `on_disconnect` is
    /// never called for it.
    fn on_connect(&self, conn: &mut Connection) -> anyhow::Result<Self::Context>;

    /// Called with each chunk read from the socket. An error kills the
    /// connection.
    fn on_receive(
        &self,
        conn: &mut Connection,
        ctx: &mut Self::Context,
        data: &[u8],
    ) -> anyhow::Result<()>;

    /// Called exactly once when a registered connection goes away, whatever
    /// the reason.
    fn on_disconnect(&self, _conn: &Connection, _ctx: Self::Context) {}
}

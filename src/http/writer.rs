use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

use crate::http::request::Request;
use crate::http::response::{Cookie, StatusCode};
use crate::server::ConnectionError;
use crate::server::connection::ConnectionHandle;

const HTTP_VERSION: &str = "HTTP/1.1";

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("cannot add header, headers have already been sent")]
    HeadersSent,
    #[error("response has already been finished")]
    Finished,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Streams one response back over a connection.
///
/// The status line and headers are buffered until the first [`send`]; from
/// then on every call goes straight to the connection's outbound queue.
/// Responses always carry `Connection: close`, and [`destroy`] (or dropping
/// the writer) closes the connection once the queue has drained.
///
/// [`send`]: ResponseWriter::send
/// [`destroy`]: ResponseWriter::destroy
#[derive(Debug)]
pub struct ResponseWriter {
    conn: ConnectionHandle,
    status: StatusCode,
    head: Option<Vec<u8>>,
    finished: bool,
}

impl ResponseWriter {
    pub fn create(req: &Request, status: StatusCode) -> Self {
        Self::for_connection(req.connection().clone(), status)
    }

    pub fn for_connection(conn: ConnectionHandle, status: StatusCode) -> Self {
        let head = format!(
            "{} {} {}\r\nConnection: close\r\n",
            HTTP_VERSION,
            status.as_u16(),
            status.reason_phrase()
        )
        .into_bytes();

        Self {
            conn,
            status,
            head: Some(head),
            finished: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers_sent(&self) -> bool {
        self.head.is_none()
    }

    pub fn add_header(&mut self, field: &str, value: &str) -> Result<(), WriterError> {
        let head = self.head.as_mut().ok_or(WriterError::HeadersSent)?;
        head.extend_from_slice(field.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
        Ok(())
    }

    pub fn add_cookie(&mut self, cookie: &Cookie) -> Result<(), WriterError> {
        self.add_header("Set-Cookie", &cookie.to_string())
    }

    /// Sends a piece of body, preceded by the head on the first call.
    pub fn send(&mut self, body: impl Into<Bytes>) -> Result<(), WriterError> {
        if self.finished {
            return Err(WriterError::Finished);
        }
        self.flush_head()?;

        let body = body.into();
        if !body.is_empty() {
            trace!(conn = %self.conn.id(), len = body.len(), "Queueing body");
            self.conn.send(body)?;
        }
        Ok(())
    }

    /// Formatted variant of [`ResponseWriter::send`]:
    /// `writer.send_fmt(format_args!("{} devices", n))`.
    pub fn send_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<(), WriterError> {
        self.send(fmt::format(args))
    }

    /// Ends the response. Pending head bytes are flushed first; the
    /// connection closes after everything queued has been written.
    pub fn destroy(mut self) -> Result<(), WriterError> {
        self.finish()
    }

    fn flush_head(&mut self) -> Result<(), WriterError> {
        if let Some(mut head) = self.head.take() {
            head.extend_from_slice(b"\r\n");
            debug!(conn = %self.conn.id(), status = self.status.as_u16(), "Sending response");
            self.conn.send(head)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), WriterError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let flushed = self.flush_head();
        self.conn.close()?;
        flushed
    }
}

impl Drop for ResponseWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            trace!(error = %e, "Response dropped on a closed connection");
        }
    }
}

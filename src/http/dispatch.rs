//! Glue between raw connections and an application [`Dispatcher`].
//!
//! [`Httpd`] is the [`ConnectionHandler`] that turns bytes into dispatcher
//! callbacks: every connection gets its own [`RequestParser`], [`UrlParser`],
//! [`Request`] and dispatcher context. One connection carries one request.

use tracing::debug;

use crate::config::ServerConfig;
use crate::http::Flow;
use crate::http::parser::{RequestHooks, RequestParser};
use crate::http::request::{Method, Request};
use crate::http::url::{UrlError, UrlParser};
use crate::server::connection::Connection;
use crate::server::handler::ConnectionHandler;

/// Application callbacks for one HTTP request.
///
/// Every hook sees the [`Request`] as far as it has been parsed and the
/// dispatcher's own per-request context. Chunked hooks (`on_url`,
/// `on_header_field`, `on_header_value`, `on_body`) get raw pieces in arrival
/// order; `Request` already has the assembled values by the time
/// `on_url_complete` and `on_headers_complete` run.
///
/// Responses are produced through
/// [`ResponseWriter`](crate::http::writer::ResponseWriter), usually from
/// `on_complete`.
pub trait Dispatcher: Send + Sync + 'static {
    type Context: Default + Send + 'static;

    fn on_begin(&self, _req: &mut Request, _ctx: &mut Self::Context) -> Flow {
        Flow::Continue
    }

    fn on_method(&self, _req: &mut Request, _ctx: &mut Self::Context) -> Flow {
        Flow::Continue
    }

    fn on_url(&self, _req: &mut Request, _ctx: &mut Self::Context, _chunk: &[u8]) -> Flow {
        Flow::Continue
    }

    fn on_url_complete(&self, _req: &mut Request, _ctx: &mut Self::Context) -> Flow {
        Flow::Continue
    }

    fn on_header_field(&self, _req: &mut Request, _ctx: &mut Self::Context, _chunk: &[u8]) -> Flow {
        Flow::Continue
    }

    fn on_header_value(&self, _req: &mut Request, _ctx: &mut Self::Context, _chunk: &[u8]) -> Flow {
        Flow::Continue
    }

    fn on_headers_complete(&self, _req: &mut Request, _ctx: &mut Self::Context) -> Flow {
        Flow::Continue
    }

    fn on_body(&self, _req: &mut Request, _ctx: &mut Self::Context, _chunk: &[u8]) -> Flow {
        Flow::Continue
    }

    fn on_complete(&self, _req: &mut Request, _ctx: &mut Self::Context) -> Flow {
        Flow::Continue
    }

    /// The connection is gone; last chance to release the context.
    fn on_destroy(&self, _req: &Request, _ctx: Self::Context) {}
}

/// Per-connection HTTP state owned by the connection task.
pub struct Exchange<C> {
    parser: RequestParser,
    url: UrlParser,
    request: Request,
    ctx: C,
}

/// HTTP server front end for a [`Dispatcher`].
pub struct Httpd<D> {
    dispatcher: D,
    max_header_size: usize,
}

impl<D: Dispatcher> Httpd<D> {
    pub fn new(dispatcher: D, config: &ServerConfig) -> Self {
        Self {
            dispatcher,
            max_header_size: config.max_header_size,
        }
    }
}

impl<D: Dispatcher> ConnectionHandler for Httpd<D> {
    type Context = Exchange<D::Context>;

    fn on_connect(&self, conn: &mut Connection) -> anyhow::Result<Self::Context> {
        Ok(Exchange {
            parser: RequestParser::with_max_header_size(self.max_header_size),
            url: UrlParser::new(),
            request: Request::new(conn.handle()),
            ctx: D::Context::default(),
        })
    }

    fn on_receive(
        &self,
        conn: &mut Connection,
        exchange: &mut Self::Context,
        data: &[u8],
    ) -> anyhow::Result<()> {
        let Exchange {
            parser,
            url,
            request,
            ctx,
        } = exchange;
        let mut hooks = Hooks {
            dispatcher: &self.dispatcher,
            url,
            request,
            ctx,
            url_error: None,
        };

        match parser.execute(data, &mut hooks) {
            Ok(()) => Ok(()),
            Err(e) => match hooks.url_error.take() {
                Some(url_err) => {
                    debug!(conn = %conn.id(), error = %url_err, "Rejecting request with invalid URL");
                    Err(anyhow::Error::new(url_err).context("invalid URL"))
                }
                None => Err(e.into()),
            },
        }
    }

    fn on_disconnect(&self, _conn: &Connection, exchange: Self::Context) {
        self.dispatcher.on_destroy(&exchange.request, exchange.ctx);
    }
}

/// Routes parser events to the URL parser, the request and the dispatcher.
struct Hooks<'a, D: Dispatcher> {
    dispatcher: &'a D,
    url: &'a mut UrlParser,
    request: &'a mut Request,
    ctx: &'a mut D::Context,
    url_error: Option<UrlError>,
}

impl<D: Dispatcher> Hooks<'_, D> {
    fn url_failed(&mut self, err: UrlError) -> Flow {
        self.url_error = Some(err);
        Flow::Abort
    }
}

impl<D: Dispatcher> RequestHooks for Hooks<'_, D> {
    fn on_begin(&mut self) -> Flow {
        self.dispatcher.on_begin(self.request, self.ctx)
    }

    fn on_method(&mut self, method: Method) -> Flow {
        self.request.set_method(method);
        self.dispatcher.on_method(self.request, self.ctx)
    }

    fn on_url(&mut self, chunk: &[u8]) -> Flow {
        if let Err(e) = self.url.add_chunk(chunk, &mut *self.request) {
            return self.url_failed(e);
        }
        self.request.push_url(chunk);
        self.dispatcher.on_url(self.request, self.ctx, chunk)
    }

    fn on_url_complete(&mut self) -> Flow {
        if let Err(e) = self.url.complete(&mut *self.request) {
            return self.url_failed(e);
        }
        self.dispatcher.on_url_complete(self.request, self.ctx)
    }

    fn on_header_field(&mut self, chunk: &[u8]) -> Flow {
        self.request.push_header_field(chunk);
        self.dispatcher.on_header_field(self.request, self.ctx, chunk)
    }

    fn on_header_value(&mut self, chunk: &[u8]) -> Flow {
        self.request.push_header_value(chunk);
        self.dispatcher.on_header_value(self.request, self.ctx, chunk)
    }

    fn on_headers_complete(&mut self) -> Flow {
        self.request.finish_headers();
        self.dispatcher.on_headers_complete(self.request, self.ctx)
    }

    fn on_body(&mut self, chunk: &[u8]) -> Flow {
        self.dispatcher.on_body(self.request, self.ctx, chunk)
    }

    fn on_complete(&mut self) -> Flow {
        self.dispatcher.on_complete(self.request, self.ctx)
    }
}

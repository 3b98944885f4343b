use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use homeport_httpd::config::Config;
use homeport_httpd::http::Flow;
use homeport_httpd::http::dispatch::{Dispatcher, Httpd};
use homeport_httpd::http::request::{Method, Request};
use homeport_httpd::http::response::{Response, ResponseBuilder, StatusCode};
use homeport_httpd::server::TcpServer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Largest body `/echo` sends back.
const MAX_ECHO: usize = 64 * 1024;

/// Small built-in service: `/` greets, `/status` reports counters and
/// `POST /echo` returns the request body.
struct StatusDispatcher {
    started: Instant,
    served: AtomicU64,
}

#[derive(Default)]
struct Exchange {
    body: Vec<u8>,
}

impl Dispatcher for StatusDispatcher {
    type Context = Exchange;

    fn on_body(&self, _req: &mut Request, ctx: &mut Exchange, chunk: &[u8]) -> Flow {
        let room = MAX_ECHO.saturating_sub(ctx.body.len());
        ctx.body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        Flow::Continue
    }

    fn on_complete(&self, req: &mut Request, ctx: &mut Exchange) -> Flow {
        let served = self.served.fetch_add(1, Ordering::Relaxed) + 1;

        let response = match (req.method(), req.path().unwrap_or("/")) {
            (Some(Method::GET), "/") => Response::ok("homeport-httpd\n"),
            (Some(Method::GET), "/status") => ResponseBuilder::new(StatusCode::Ok)
                .header("Content-Type", "text/plain")
                .body(format!(
                    "uptime_secs: {}\nrequests: {}\n",
                    self.started.elapsed().as_secs(),
                    served
                ))
                .build(),
            (Some(Method::POST), "/echo") => ResponseBuilder::new(StatusCode::Ok)
                .header("Content-Type", "application/octet-stream")
                .body(std::mem::take(&mut ctx.body))
                .build(),
            (_, "/" | "/status" | "/echo") => Response::method_not_allowed(),
            _ => Response::not_found(),
        };

        info!(
            peer = %req.peer_addr(),
            method = req.method().map(|m| m.as_str()).unwrap_or("-"),
            path = req.path().unwrap_or("-"),
            status = response.status.as_u16(),
            "Request"
        );
        if let Err(e) = response.send(req) {
            warn!(error = %e, "Failed to send response");
        }
        Flow::Continue
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level)),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let dispatcher = StatusDispatcher {
        started: Instant::now(),
        served: AtomicU64::new(0),
    };
    let server = TcpServer::bind(cfg.server.clone(), Httpd::new(dispatcher, &cfg.server)).await?;
    let handle = server.handle();
    let mut running = tokio::spawn(server.run());

    tokio::select! {
        res = &mut running => {
            res??;
        }

        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            handle.stop()?;
            running.await??;
        }
    }

    Ok(())
}

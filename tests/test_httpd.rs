use std::fmt::Write as _;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use homeport_httpd::config::ServerConfig;
use homeport_httpd::http::Flow;
use homeport_httpd::http::dispatch::{Dispatcher, Httpd};
use homeport_httpd::http::request::Request;
use homeport_httpd::http::response::{Cookie, ResponseBuilder, StatusCode};
use homeport_httpd::http::writer::ResponseWriter;
use homeport_httpd::server::TcpServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

#[derive(Default)]
struct Exchange {
    events: Vec<String>,
    url_chunks: String,
    body: Vec<u8>,
}

#[derive(Clone, Default)]
struct App {
    finished: Arc<Mutex<Vec<String>>>,
}

impl Dispatcher for App {
    type Context = Exchange;

    fn on_begin(&self, _req: &mut Request, ctx: &mut Exchange) -> Flow {
        ctx.events.push("begin".into());
        Flow::Continue
    }

    fn on_method(&self, req: &mut Request, ctx: &mut Exchange) -> Flow {
        let method = req.method().map(|m| m.as_str()).unwrap_or("?");
        ctx.events.push(format!("method {method}"));
        Flow::Continue
    }

    fn on_url(&self, _req: &mut Request, ctx: &mut Exchange, chunk: &[u8]) -> Flow {
        ctx.url_chunks.push_str(&String::from_utf8_lossy(chunk));
        Flow::Continue
    }

    fn on_url_complete(&self, req: &mut Request, ctx: &mut Exchange) -> Flow {
        ctx.events.push(format!("path {}", req.path().unwrap_or("")));
        if req.path() == Some("/early") {
            let mut writer = ResponseWriter::create(req, StatusCode::Ok);
            let _ = writer.send("early");
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn on_headers_complete(&self, _req: &mut Request, ctx: &mut Exchange) -> Flow {
        ctx.events.push("headers".into());
        Flow::Continue
    }

    fn on_body(&self, _req: &mut Request, ctx: &mut Exchange, chunk: &[u8]) -> Flow {
        ctx.body.extend_from_slice(chunk);
        Flow::Continue
    }

    fn on_complete(&self, req: &mut Request, ctx: &mut Exchange) -> Flow {
        ctx.events.push("complete".into());

        match req.path() {
            Some("/echo") => {
                let mut text = format!(
                    "url={}\nraw={}\npath={}\n",
                    ctx.url_chunks,
                    req.url(),
                    req.path().unwrap_or("-")
                );
                for (k, v) in req.arguments() {
                    let _ = writeln!(text, "{k}={v}");
                }
                let _ = writeln!(text, "host={}", req.header("host").unwrap_or("-"));
                let _ = writeln!(text, "accept={}", req.header("Accept").unwrap_or("-"));
                let _ = writeln!(text, "session={}", req.cookie("session").unwrap_or("-"));
                let _ = write!(text, "body={}", String::from_utf8_lossy(&ctx.body));

                let _ = ResponseBuilder::new(StatusCode::Ok)
                    .header("Content-Type", "text/plain")
                    .body(text)
                    .build()
                    .send(req);
            }
            Some("/stream") => {
                let mut writer = ResponseWriter::create(req, StatusCode::Ok);
                for i in 0..3 {
                    let _ = writer.send_fmt(format_args!("chunk {i}\n"));
                }
                let _ = writer.destroy();
            }
            _ => {
                let mut writer = ResponseWriter::create(req, StatusCode::NotFound);
                let _ = writer.add_cookie(&Cookie::new("seen", "1").path("/"));
                let _ = writer.send("nothing here");
                // Dropping the writer finishes the response.
            }
        }
        Flow::Continue
    }

    fn on_destroy(&self, _req: &Request, ctx: Exchange) {
        self.finished.lock().unwrap().push(ctx.events.join(","));
    }
}

async fn start() -> (SocketAddr, App) {
    let app = App::default();
    let config = ServerConfig {
        address: Some(Ipv4Addr::LOCALHOST.into()),
        port: 0,
        timeout_secs: 5,
        ..ServerConfig::default()
    };
    let server = TcpServer::bind(config.clone(), Httpd::new(app.clone(), &config))
        .await
        .unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run());
    (addr, app)
}

/// Sends `request` in `piece`-byte writes and returns everything the server
/// answers before closing.
async fn exchange(addr: SocketAddr, request: &[u8], piece: usize) -> String {
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.set_nodelay(true).unwrap();
    for part in request.chunks(piece) {
        client.write_all(part).await.unwrap();
        if piece < request.len() {
            sleep(Duration::from_millis(2)).await;
        }
    }

    let mut out = Vec::new();
    match timeout(Duration::from_secs(5), client.read_to_end(&mut out))
        .await
        .expect("server did not close the connection")
    {
        Ok(_) => {}
        // A kill with unread input may end in a reset instead of a FIN.
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {}
        Err(e) => panic!("read failed: {e}"),
    }
    String::from_utf8(out).unwrap()
}

async fn finished(app: &App, count: usize) -> Vec<String> {
    for _ in 0..300 {
        if app.finished.lock().unwrap().len() >= count {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    app.finished.lock().unwrap().clone()
}

fn body_of(response: &str) -> &str {
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or("")
}

const ECHO_REQUEST: &[u8] = b"POST /echo?id=1&brand=Apple HTTP/1.1\r\n\
Host: localhost\r\n\
Cookie: session=abc; theme=dark\r\n\
Accept: text/html\r\n\
Accept: text/plain\r\n\
Content-Length: 11\r\n\
\r\n\
hello world";

const ECHO_BODY: &str = "url=/echo?id=1&brand=Apple\n\
raw=/echo?id=1&brand=Apple\n\
path=/echo\n\
id=1\n\
brand=Apple\n\
host=localhost\n\
accept=text/html,text/plain\n\
session=abc\n\
body=hello world";

#[tokio::test]
async fn test_request_is_dispatched_and_answered() {
    let (addr, app) = start().await;

    let response = exchange(addr, ECHO_REQUEST, ECHO_REQUEST.len()).await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\nConnection: close\r\n"));
    assert!(response.contains("Content-Type: text/plain\r\n"));
    assert!(response.contains(&format!("Content-Length: {}\r\n", ECHO_BODY.len())));
    assert_eq!(body_of(&response), ECHO_BODY);

    let done = finished(&app, 1).await;
    assert_eq!(done, ["begin,method POST,path /echo,headers,complete"]);
}

#[tokio::test]
async fn test_fragmented_request_gives_same_result() {
    let (addr, app) = start().await;

    for piece in [1, 3, 7, 50] {
        let response = exchange(addr, ECHO_REQUEST, piece).await;
        assert_eq!(body_of(&response), ECHO_BODY, "piece size {piece}");
    }

    let done = finished(&app, 4).await;
    assert_eq!(done.len(), 4);
    assert!(
        done.iter()
            .all(|events| events == "begin,method POST,path /echo,headers,complete")
    );
}

#[tokio::test]
async fn test_chunked_request_body() {
    let (addr, _app) = start().await;

    let request = b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
    let response = exchange(addr, request, 4).await;

    assert!(body_of(&response).ends_with("body=hello world"));
}

#[tokio::test]
async fn test_unknown_path_gets_404_with_cookie() {
    let (addr, _app) = start().await;

    let response = exchange(addr, b"GET /missing HTTP/1.1\r\n\r\n", 64).await;

    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(response.contains("Set-Cookie: seen=1; Path=/\r\n"));
    assert_eq!(body_of(&response), "nothing here");
}

#[tokio::test]
async fn test_streamed_response() {
    let (addr, _app) = start().await;

    let response = exchange(addr, b"GET /stream HTTP/1.0\r\n\r\n", 64).await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body_of(&response), "chunk 0\nchunk 1\nchunk 2\n");
}

#[tokio::test]
async fn test_stop_skips_rest_of_request() {
    let (addr, app) = start().await;

    let request = b"POST /early HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody";
    let response = exchange(addr, request, request.len()).await;

    assert_eq!(body_of(&response), "early");
    let done = finished(&app, 1).await;
    assert_eq!(done, ["begin,method POST,path /early"]);
}

#[tokio::test]
async fn test_malformed_requests_are_dropped() {
    let (addr, app) = start().await;

    // Unknown method, illegal URL byte, bad version.
    for request in [
        &b"BREW /pot HTTP/1.1\r\n\r\n"[..],
        &b"GET /a/b/c/| HTTP/1.1\r\n\r\n"[..],
        &b"GET / HTTP/x\r\n\r\n"[..],
    ] {
        let response = exchange(addr, request, request.len()).await;
        assert!(response.is_empty(), "got a response to {request:?}");
    }

    let done = finished(&app, 3).await;
    assert_eq!(done.len(), 3);
}

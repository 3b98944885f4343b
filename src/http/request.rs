use crate::http::url::UrlHooks;
use crate::server::connection::ConnectionHandle;
use std::collections::HashMap;
use std::net::SocketAddr;

/// HTTP request methods.
///
/// Represents the HTTP method/verb of a request. Any other token on the
/// request line is rejected by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, typically uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use homeport_httpd::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        Self::from_bytes(s.as_bytes())
    }

    /// Same as [`Method::from_str`] for the raw token off the wire.
    pub fn from_bytes(token: &[u8]) -> Option<Self> {
        match token {
            b"GET" => Some(Method::GET),
            b"POST" => Some(Method::POST),
            b"PUT" => Some(Method::PUT),
            b"DELETE" => Some(Method::DELETE),
            b"HEAD" => Some(Method::HEAD),
            b"OPTIONS" => Some(Method::OPTIONS),
            b"PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }
}

/// The request as seen so far.
///
/// A `Request` is handed to every dispatcher hook and fills up while the
/// request streams in: the method is known from `on_method`, the path and the
/// query arguments from `on_url_complete`, headers and cookies from
/// `on_headers_complete`. The body is never stored; it is only passed to
/// `on_body`.
#[derive(Debug)]
pub struct Request {
    conn: ConnectionHandle,
    method: Option<Method>,
    url: String,
    path: Option<String>,
    arguments: Vec<(String, String)>,
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,

    // Header pair being assembled from field/value chunks.
    field: Vec<u8>,
    value: Vec<u8>,
    in_value: bool,
}

impl Request {
    pub(crate) fn new(conn: ConnectionHandle) -> Self {
        Self {
            conn,
            method: None,
            url: String::new(),
            path: None,
            arguments: Vec::new(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            field: Vec::new(),
            value: Vec::new(),
            in_value: false,
        }
    }

    pub fn method(&self) -> Option<Method> {
        self.method
    }

    /// The raw URL received so far, exactly as on the request line.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The path part of the URL, including its leading `/`.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// First query argument named `key`. Values are not percent-decoded.
    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All query arguments in URL order.
    pub fn arguments(&self) -> &[(String, String)] {
        &self.arguments
    }

    /// Retrieves a header value by name, ignoring ASCII case.
    ///
    /// Repeated headers are combined into one comma-separated value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn cookie(&self, key: &str) -> Option<&str> {
        self.cookies.get(key).map(|v| v.as_str())
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// Retrieves the Content-Length header value and parses it as a usize.
    ///
    /// Returns 0 if the header is missing or not a valid number.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    /// Handle of the connection the request arrived on.
    pub fn connection(&self) -> &ConnectionHandle {
        &self.conn
    }

    pub(crate) fn set_method(&mut self, method: Method) {
        self.method = Some(method);
    }

    pub(crate) fn push_url(&mut self, chunk: &[u8]) {
        self.url.push_str(&String::from_utf8_lossy(chunk));
    }

    pub(crate) fn push_header_field(&mut self, chunk: &[u8]) {
        if self.in_value {
            self.commit_header();
        }
        self.field.extend_from_slice(chunk);
    }

    pub(crate) fn push_header_value(&mut self, chunk: &[u8]) {
        self.in_value = true;
        self.value.extend_from_slice(chunk);
    }

    pub(crate) fn finish_headers(&mut self) {
        if self.in_value || !self.field.is_empty() {
            self.commit_header();
        }
    }

    fn commit_header(&mut self) {
        let field = String::from_utf8_lossy(&self.field).into_owned();
        let value = String::from_utf8_lossy(&self.value).trim().to_string();
        self.field.clear();
        self.value.clear();
        self.in_value = false;

        if field.eq_ignore_ascii_case("Cookie") {
            self.parse_cookies(&value);
        }

        // RFC 2616 4.2: repeated fields combine into a comma-separated list,
        // kept under the spelling seen first.
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&field))
        {
            Some((_, existing)) => {
                existing.push(',');
                existing.push_str(&value);
            }
            None => {
                self.headers.insert(field, value);
            }
        }
    }

    fn parse_cookies(&mut self, value: &str) {
        for pair in value.split(';') {
            match pair.trim().split_once('=') {
                Some((k, v)) if !k.is_empty() => {
                    self.cookies.insert(k.to_string(), v.to_string());
                }
                _ => tracing::debug!(cookie = pair, "Ignoring malformed cookie"),
            }
        }
    }
}

impl UrlHooks for Request {
    fn on_path_complete(&mut self, path: &[u8]) {
        self.path = Some(String::from_utf8_lossy(path).into_owned());
    }

    fn on_key_value(&mut self, key: &[u8], value: &[u8]) {
        self.arguments.push((
            String::from_utf8_lossy(key).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        ));
    }
}

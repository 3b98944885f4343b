use homeport_httpd::http::response::{Cookie, Response, ResponseBuilder, StatusCode};

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::Created.as_u16(), 201);
    assert_eq!(StatusCode::NoContent.as_u16(), 204);
    assert_eq!(StatusCode::SeeOther.as_u16(), 303);
    assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::MethodNotAllowed.as_u16(), 405);
    assert_eq!(StatusCode::NotAcceptable.as_u16(), 406);
    assert_eq!(StatusCode::RequestTimeout.as_u16(), 408);
    assert_eq!(StatusCode::UnsupportedMediaType.as_u16(), 415);
    assert_eq!(StatusCode::InternalServerError.as_u16(), 500);
    assert_eq!(StatusCode::GatewayTimeout.as_u16(), 504);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::SeeOther.reason_phrase(), "See Other");
    assert_eq!(StatusCode::NotAcceptable.reason_phrase(), "Not Acceptable");
    assert_eq!(StatusCode::RequestTimeout.reason_phrase(), "Request Timeout");
    assert_eq!(
        StatusCode::UnsupportedMediaType.reason_phrase(),
        "Unsupported Media Type"
    );
    assert_eq!(StatusCode::GatewayTimeout.reason_phrase(), "Gateway Timeout");
}

#[test]
fn test_status_code_from_u16() {
    for code in [200, 201, 204, 303, 400, 404, 405, 406, 408, 415, 500, 504] {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(status.as_u16(), code);
    }
    assert_eq!(StatusCode::from_u16(418), None);
}

#[test]
fn test_status_code_display() {
    assert_eq!(StatusCode::NotFound.to_string(), "404 Not Found");
}

#[test]
fn test_response_builder_auto_content_length() {
    let body = b"This is the body".to_vec();
    let response = ResponseBuilder::new(StatusCode::Ok).body(body.clone()).build();

    assert_eq!(response.header("Content-Length").unwrap(), body.len().to_string());
}

#[test]
fn test_response_builder_preserves_custom_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("content-length", "999")
        .body(b"test".to_vec())
        .build();

    assert_eq!(response.header("Content-Length").unwrap(), "999");
    assert_eq!(response.headers.len(), 1);
}

#[test]
fn test_response_builder_header_replaces_case_insensitively() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .header("content-type", "text/html")
        .build();

    assert_eq!(response.header("Content-Type").unwrap(), "text/html");
    assert_eq!(response.headers.len(), 2); // 1 custom + Content-Length
}

#[test]
fn test_response_builder_keeps_header_order() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Header1", "value1")
        .header("Header2", "value2")
        .header("Header3", "value3")
        .body(b"body".to_vec())
        .build();

    let names: Vec<&str> = response.headers.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(names, ["Header1", "Header2", "Header3", "Content-Length"]);
}

#[test]
fn test_response_builder_multiple_cookies() {
    let response = ResponseBuilder::new(StatusCode::SeeOther)
        .cookie(&Cookie::new("a", "1"))
        .cookie(&Cookie::new("b", "2"))
        .build();

    let cookies: Vec<&str> = response
        .headers
        .iter()
        .filter(|(k, _)| k == "Set-Cookie")
        .map(|(_, v)| v.as_str())
        .collect();
    assert_eq!(cookies, ["a=1", "b=2"]);
}

#[test]
fn test_response_builder_empty_body() {
    let response = ResponseBuilder::new(StatusCode::NoContent).build();

    assert_eq!(response.body.len(), 0);
    assert_eq!(response.header("Content-Length").unwrap(), "0");
}

#[test]
fn test_response_helpers() {
    let response = Response::ok(b"test content".to_vec());
    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.body, b"test content".to_vec());

    let response = Response::not_found();
    assert_eq!(response.status, StatusCode::NotFound);
    assert_eq!(response.body, b"404 Not Found".to_vec());

    let response = Response::method_not_allowed();
    assert_eq!(response.status, StatusCode::MethodNotAllowed);

    let response = Response::internal_error();
    assert_eq!(response.status, StatusCode::InternalServerError);
    assert_eq!(response.body, b"500 Internal Server Error".to_vec());
}

#[test]
fn test_cookie_minimal() {
    assert_eq!(Cookie::new("session", "abc").to_string(), "session=abc");
}

#[test]
fn test_cookie_all_attributes() {
    let cookie = Cookie::new("id", "42")
        .expires("Wed, 21 Oct 2026 07:28:00 GMT")
        .max_age(3600)
        .domain("example.com")
        .path("/api")
        .secure()
        .http_only()
        .extension("SameSite=Strict");

    assert_eq!(
        cookie.to_string(),
        "id=42; Expires=Wed, 21 Oct 2026 07:28:00 GMT; Max-Age=3600; \
         Domain=example.com; Path=/api; Secure; HttpOnly; SameSite=Strict"
    );
    assert_eq!(cookie.name(), "id");
    assert_eq!(cookie.value(), "42");
}

// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use assert_matches::assert_matches;
use protocol_http::{Error as ParseError, RequestParser, Version};

fn parser() -> RequestParser {
    RequestParser::new(0)
}

#[test]
fn parse_get() {
    let data: &[u8] = b"\
        GET /test HTTP/1.1\r\n\
        Host: example.com\r\n\
        \r\n\
    ";

    let (request, consumed) = parser().do_parse(data).expect("failed to parse request");

    assert_eq!(consumed, data.len());
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/test");
    assert_eq!(request.query, None);
    assert_eq!(request.version, Version::Http11);
    assert_eq!(request.host().as_deref(), Some("example.com"));
}

#[test]
fn parse_post_with_body() {
    let data: &[u8] = b"\
        POST /submit HTTP/1.1\r\n\
        Content-Length: 10\r\n\
        \r\n\
        abcdefghij\
    ";

    let (request, consumed) = parser().do_parse(data).expect("failed to parse request");

    assert_eq!(consumed, data.len());
    assert_eq!(request.method, "POST");
    assert_eq!(request.body, b"abcdefghij");
}

#[test]
fn parse_query_string_split() {
    let data: &[u8] = b"\
        GET /search?q=tern&page=2 HTTP/1.1\r\n\
        \r\n\
    ";

    let (request, _) = parser().do_parse(data).expect("failed to parse request");

    assert_eq!(request.path, "/search");
    assert_eq!(request.query.as_deref(), Some("q=tern&page=2"));
}

#[test]
fn parse_path_urlencoded() {
    let data: &[u8] = b"\
        GET /a%20b%2Fc HTTP/1.1\r\n\
        \r\n\
    ";

    let (request, _) = parser().do_parse(data).expect("failed to parse request");
    assert_eq!(request.path, "/a b/c");
}

#[test]
fn parse_header_case_insensitive() {
    let data: &[u8] = b"\
        GET /blah HTTP/1.1\r\n\
        Test: yes\r\n\
        \r\n\
    ";

    let (request, _) = parser().do_parse(data).expect("failed to parse request");

    assert_eq!(request.header("test"), Some("yes".as_bytes()));
    assert_eq!(request.header("Test"), Some("yes".as_bytes()));
    assert_eq!(request.header("tEsT"), Some("yes".as_bytes()));
}

#[test]
fn parse_incomplete_head() {
    let data: &[u8] = b"GET / HTTP/1.1\r\nHost: exa";

    let result = parser().do_parse(data);
    assert_matches!(result, Err(ParseError::PartialRequest(None)));
}

#[test]
fn parse_incomplete_body_reports_missing_bytes() {
    let data: &[u8] = b"\
        POST /x HTTP/1.1\r\n\
        Content-Length: 100\r\n\
        \r\n\
    ";

    let result = parser().do_parse(data);
    assert_matches!(result, Err(ParseError::PartialRequest(Some(100))));
}

#[test]
fn parse_bad_content_length() {
    let data: &[u8] = b"\
        POST /x HTTP/1.1\r\n\
        Content-Length: lots\r\n\
        \r\n\
    ";

    let result = parser().do_parse(data);
    assert_matches!(result, Err(ParseError::BadContentLength));
}

#[test]
fn parse_oversized_request() {
    let parser = RequestParser::new(64);
    let data = format!(
        "POST /x HTTP/1.1\r\nContent-Length: 1000\r\n\r\n{}",
        "y".repeat(20)
    );

    let result = parser.do_parse(data.as_bytes());
    assert_matches!(result, Err(ParseError::TooLarge(64)));
}

#[test]
fn keep_alive_negotiation() {
    let http11: &[u8] = b"GET / HTTP/1.1\r\n\r\n";
    let (request, _) = parser().do_parse(http11).unwrap();
    assert!(request.keep_alive());

    let http11_close: &[u8] = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
    let (request, _) = parser().do_parse(http11_close).unwrap();
    assert!(!request.keep_alive());

    let http10: &[u8] = b"GET / HTTP/1.0\r\n\r\n";
    let (request, _) = parser().do_parse(http10).unwrap();
    assert!(!request.keep_alive());

    let http10_keep: &[u8] = b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n";
    let (request, _) = parser().do_parse(http10_keep).unwrap();
    assert!(request.keep_alive());
}

#[test]
fn pipelined_requests_consume_one_at_a_time() {
    let data: &[u8] = b"GET /first HTTP/1.1\r\n\r\nGET /second HTTP/1.1\r\n\r\n";

    let (request, consumed) = parser().do_parse(data).unwrap();
    assert_eq!(request.path, "/first");

    let (request, _) = parser().do_parse(&data[consumed..]).unwrap();
    assert_eq!(request.path, "/second");
}

#[test]
fn host_strips_port() {
    let data: &[u8] = b"GET / HTTP/1.1\r\nHost: Example.COM:8443\r\n\r\n";
    let (request, _) = parser().do_parse(data).unwrap();
    assert_eq!(request.host().as_deref(), Some("example.com"));
}

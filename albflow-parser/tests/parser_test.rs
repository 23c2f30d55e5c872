//! Parser integration tests: the v1/v2 happy paths, the error taxonomy,
//! format sniffing, and the render/reparse round trip.

use albflow_core::errors::ParseErrorKind;
use albflow_parser::{parse, to_line, validate_format};
use proptest::prelude::*;

// ─── Fixtures ────────────────────────────────────────────────────────────────

/// A well-formed v2 line (32 fields, trailing connection id).
fn v2_line() -> String {
    [
        "h2",
        "2023-12-01T10:30:45.123456Z",
        "app/my-lb/50dc6c495c0c9188",
        "203.0.113.12:54321",
        "10.0.1.50:8080",
        "0.001",
        "0.045",
        "0.002",
        "200",
        "200",
        "1024",
        "2048",
        "\"GET https://api.example.com/v1/users/123 HTTP/1.1\"",
        "\"Mozilla/5.0 (Windows NT 10.0) Chrome/119.0\"",
        "ECDHE-RSA-AES128-GCM-SHA256",
        "TLSv1.2",
        "arn:aws:elasticloadbalancing:us-east-1:123456789012:targetgroup/my-targets/73e2d6bc24d8a067",
        "\"Root=1-58337262-36d228ad5d99923122bbe354\"",
        "\"api.example.com\"",
        "\"arn:aws:acm:us-east-1:123456789012:certificate/12345678-1234-1234-1234-123456789012\"",
        "0",
        "2023-12-01T10:30:45.120000Z",
        "\"forward\"",
        "\"-\"",
        "\"-\"",
        "\"10.0.1.50:8080\"",
        "\"200\"",
        "\"-\"",
        "\"-\"",
        "-",
        "-",
        "TID_abc123",
    ]
    .join(" ")
}

/// The same request in the older 30-field shape.
fn v1_line() -> String {
    let line = v2_line();
    let fields: Vec<&str> = line.rsplitn(4, ' ').collect();
    // Drop the two reserved fields and the connection id, keep one
    // reserved field so the count lands on 30.
    format!("{} -", fields[3])
}

// ═══════════════════════════════════════════════════════════════════════════════
// Happy paths
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn parses_v2_line() {
    let record = parse(&v2_line()).unwrap();
    assert_eq!(record.request_verb, "GET");
    assert_eq!(record.request_url, "https://api.example.com/v1/users/123");
    assert_eq!(record.request_protocol, "HTTP/1.1");
    assert_eq!(record.elb_status_code, 200);
    assert_eq!(record.target_status_code, 200);
    assert_eq!(record.client_ip.to_string(), "203.0.113.12");
    assert_eq!(record.client_port, 54321);
    assert_eq!(record.target_ip.unwrap().to_string(), "10.0.1.50");
    assert_eq!(record.received_bytes, 1024);
    assert_eq!(record.sent_bytes, 2048);
    assert_eq!(record.domain_name, "api.example.com");
    assert_eq!(record.connection_id, "TID_abc123");
    assert_eq!(record.timestamp.to_rfc3339(), "2023-12-01T10:30:45.123456+00:00");
    assert!(record.validate());
}

#[test]
fn parses_v1_line_with_empty_connection_id() {
    let record = parse(&v1_line()).unwrap();
    assert_eq!(record.request_verb, "GET");
    assert!(record.connection_id.is_empty());
}

#[test]
fn dash_fields_become_empty_or_zero() {
    let line = v2_line()
        .replace("ECDHE-RSA-AES128-GCM-SHA256 TLSv1.2", "- -")
        .replace("10.0.1.50:8080 0.001 0.045", "- -1 0.045");
    let record = parse(&line).unwrap();
    assert!(record.ssl_cipher.is_empty());
    assert!(record.ssl_protocol.is_empty());
    assert!(record.target_ip.is_none());
    assert_eq!(record.target_port, 0);
    assert_eq!(record.request_processing_time, 0.0);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error taxonomy
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn out_of_range_status_is_validation_error() {
    let line = v2_line().replace(" 200 200 1024", " 999 200 1024");
    let err = parse(&line).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Validation);
}

#[test]
fn bad_timestamp_is_timestamp_error() {
    let line = v2_line().replace("2023-12-01T10:30:45.123456Z", "2023-99-99T10:30:45Z");
    let err = parse(&line).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Timestamp);
}

#[test]
fn wrong_field_count_is_field_count_error() {
    let err = parse("one two three").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::FieldCount);

    let err = parse("").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::FieldCount);
}

#[test]
fn unparseable_bytes_is_numeric_error() {
    let line = v2_line().replace(" 1024 2048 ", " 10x4 2048 ");
    let err = parse(&line).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Numeric);
}

#[test]
fn garbled_request_field_is_http_request_error() {
    let line = v2_line().replace(
        "\"GET https://api.example.com/v1/users/123 HTTP/1.1\"",
        "\"GET https://api.example.com/v1/users/123\"",
    );
    let err = parse(&line).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::HttpRequest);
}

#[test]
fn missing_trace_id_is_validation_error() {
    let line = v2_line().replace("\"Root=1-58337262-36d228ad5d99923122bbe354\"", "\"-\"");
    let err = parse(&line).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Validation);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Format sniffing & round trip
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn validate_format_accepts_majority_valid_samples() {
    let sample = format!("{}\n\n{}\nnot a log line\n", v2_line(), v1_line());
    assert!(validate_format(&sample));
}

#[test]
fn validate_format_rejects_majority_invalid_samples() {
    let sample = "junk one\njunk two\njunk three\n".to_string() + &v2_line();
    assert!(!validate_format(&sample));
    assert!(!validate_format(""));
    assert!(!validate_format("\n\n\n"));
}

#[test]
fn render_reparse_round_trip() {
    let record = parse(&v2_line()).unwrap();
    let reparsed = parse(&to_line(&record)).unwrap();
    assert_eq!(record, reparsed);
}

proptest! {
    // Parser totality: any input terminates with a record or an error.
    #[test]
    fn parse_never_panics(line in ".{0,512}") {
        let _ = parse(&line);
    }

    #[test]
    fn parse_never_panics_on_field_noise(
        fields in proptest::collection::vec("[a-z0-9:\\.\"-]{0,12}", 0..40)
    ) {
        let _ = parse(&fields.join(" "));
    }
}

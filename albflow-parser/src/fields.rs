//! Field-level sub-parsers. Strict: anything that does not match the
//! expected shape is a typed error, never a guess.

use std::net::IpAddr;

use albflow_core::errors::ParseError;
use albflow_core::models::log_record::ACCEPTED_VERBS;
use chrono::{DateTime, Utc};

/// `-` (bare or previously quoted) means "absent" throughout the format.
pub fn dash_to_empty(field: &str) -> &str {
    if field == "-" {
        ""
    } else {
        field
    }
}

pub fn parse_u16(field: &str, name: &str) -> Result<u16, ParseError> {
    let field = dash_to_empty(field);
    if field.is_empty() {
        return Ok(0);
    }
    field
        .parse()
        .map_err(|_| ParseError::numeric(format!("{name}: {field:?} is not a u16")))
}

pub fn parse_u64(field: &str, name: &str) -> Result<u64, ParseError> {
    let field = dash_to_empty(field);
    if field.is_empty() {
        return Ok(0);
    }
    field
        .parse()
        .map_err(|_| ParseError::numeric(format!("{name}: {field:?} is not a u64")))
}

pub fn parse_i32(field: &str, name: &str) -> Result<i32, ParseError> {
    let field = dash_to_empty(field);
    if field.is_empty() {
        return Ok(0);
    }
    field
        .parse()
        .map_err(|_| ParseError::numeric(format!("{name}: {field:?} is not an i32")))
}

/// Processing times: seconds, `-1` (upstream failure) maps to 0.
pub fn parse_processing_time(field: &str, name: &str) -> Result<f64, ParseError> {
    let field = dash_to_empty(field);
    if field.is_empty() {
        return Ok(0.0);
    }
    let value: f64 = field
        .parse()
        .map_err(|_| ParseError::numeric(format!("{name}: {field:?} is not a float")))?;
    if !value.is_finite() {
        return Err(ParseError::numeric(format!("{name}: {field:?} is not finite")));
    }
    Ok(value.max(0.0))
}

/// RFC-3339 with subsecond precision, as ALB emits it.
pub fn parse_timestamp(field: &str, name: &str) -> Result<DateTime<Utc>, ParseError> {
    DateTime::parse_from_rfc3339(field)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ParseError::timestamp(format!("{name}: {field:?}: {e}")))
}

/// `host:port` with IPv6-bracket support. A bare `-` or empty address is
/// "absent" (upstream never reached). Unbracketed IPv6 is rejected.
pub fn parse_host_port(field: &str, name: &str) -> Result<(Option<IpAddr>, u16), ParseError> {
    let field = dash_to_empty(field);
    if field.is_empty() {
        return Ok((None, 0));
    }

    let (host, port) = if let Some(rest) = field.strip_prefix('[') {
        let (addr, tail) = rest
            .split_once(']')
            .ok_or_else(|| ParseError::address_port(format!("{name}: unclosed bracket in {field:?}")))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| ParseError::address_port(format!("{name}: missing port in {field:?}")))?;
        (addr, port)
    } else {
        field
            .rsplit_once(':')
            .ok_or_else(|| ParseError::address_port(format!("{name}: missing ':' in {field:?}")))?
    };

    if host.is_empty() {
        return Ok((None, parse_port(port, name)?));
    }

    let ip: IpAddr = host
        .parse()
        .map_err(|_| ParseError::address_port(format!("{name}: bad address in {field:?}")))?;
    Ok((Some(ip), parse_port(port, name)?))
}

fn parse_port(port: &str, name: &str) -> Result<u16, ParseError> {
    if port == "-" || port.is_empty() {
        return Ok(0);
    }
    port.parse()
        .map_err(|_| ParseError::address_port(format!("{name}: bad port {port:?}")))
}

/// The quoted request field: exactly `verb url protocol`.
pub fn parse_http_request(field: &str) -> Result<(String, String, String), ParseError> {
    let parts: Vec<&str> = field.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(ParseError::http_request(format!(
            "expected 3 tokens in request field, got {}",
            parts.len()
        )));
    }
    let (verb, url, protocol) = (parts[0], parts[1], parts[2]);
    if !ACCEPTED_VERBS.contains(&verb) {
        return Err(ParseError::http_request(format!("unknown verb {verb:?}")));
    }
    if !protocol.starts_with("HTTP/") {
        return Err(ParseError::http_request(format!(
            "protocol {protocol:?} does not start with HTTP/"
        )));
    }
    Ok((verb.to_string(), url.to_string(), protocol.to_string()))
}

//! # albflow-parser
//!
//! Stateless ALB access-log parser. One line in, one `LogRecord` or one
//! typed `ParseError` out; no I/O, safe from any thread. Two line shapes
//! are accepted: v1 (30 fields, no connection id) and v2 (32+ fields,
//! trailing `TID_…` connection id).

pub mod fields;
pub mod tokenizer;

use albflow_core::errors::ParseError;
use albflow_core::models::LogRecord;
use chrono::{DateTime, Utc};

use fields::{
    dash_to_empty, parse_host_port, parse_http_request, parse_i32, parse_processing_time,
    parse_timestamp, parse_u16, parse_u64,
};
use tokenizer::tokenize;

/// v1 lines: through `classification_reason` plus one reserved field.
pub const V1_FIELD_COUNT: usize = 30;
/// v2 lines: v1 plus two reserved fields and the connection id.
pub const V2_FIELD_COUNT: usize = 32;

/// How many non-blank lines `validate_format` samples at most.
const VALIDATE_SAMPLE_LINES: usize = 100;

/// Parse one access-log line into a record.
pub fn parse(line: &str) -> Result<LogRecord, ParseError> {
    if line.trim().is_empty() {
        return Err(ParseError::field_count("empty line"));
    }

    let fields = tokenize(line);
    let connection_id = match fields.len() {
        V1_FIELD_COUNT => String::new(),
        n if n >= V2_FIELD_COUNT => dash_to_empty(&fields[V2_FIELD_COUNT - 1]).to_string(),
        n => {
            return Err(ParseError::field_count(format!(
                "expected {V1_FIELD_COUNT} or {V2_FIELD_COUNT}+ fields, got {n}"
            )))
        }
    };

    // Field 0 (listener type) and field 2 (load balancer name) are not
    // part of the record.
    let timestamp = parse_timestamp(&fields[1], "timestamp")?;
    let (client_ip, client_port) = parse_host_port(&fields[3], "client")?;
    let client_ip = client_ip
        .ok_or_else(|| ParseError::address_port("client: address required"))?;
    let (target_ip, target_port) = parse_host_port(&fields[4], "target")?;

    let request_processing_time = parse_processing_time(&fields[5], "request_processing_time")?;
    let target_processing_time = parse_processing_time(&fields[6], "target_processing_time")?;
    let response_processing_time = parse_processing_time(&fields[7], "response_processing_time")?;

    let elb_status_code = parse_u16(&fields[8], "elb_status_code")?;
    let target_status_code = parse_u16(&fields[9], "target_status_code")?;
    let received_bytes = parse_u64(&fields[10], "received_bytes")?;
    let sent_bytes = parse_u64(&fields[11], "sent_bytes")?;

    let (request_verb, request_url, request_protocol) = parse_http_request(&fields[12])?;

    let matched_rule_priority = parse_i32(&fields[20], "matched_rule_priority")?;
    let request_creation_time = parse_timestamp(&fields[21], "request_creation_time")?;

    let record = LogRecord {
        id: 0,
        timestamp,
        client_ip,
        client_port,
        target_ip,
        target_port,
        request_processing_time,
        target_processing_time,
        response_processing_time,
        elb_status_code,
        target_status_code,
        received_bytes,
        sent_bytes,
        request_verb,
        request_url,
        request_protocol,
        user_agent: dash_to_empty(&fields[13]).to_string(),
        ssl_cipher: dash_to_empty(&fields[14]).to_string(),
        ssl_protocol: dash_to_empty(&fields[15]).to_string(),
        target_group_arn: dash_to_empty(&fields[16]).to_string(),
        trace_id: dash_to_empty(&fields[17]).to_string(),
        domain_name: dash_to_empty(&fields[18]).to_string(),
        chosen_cert_arn: dash_to_empty(&fields[19]).to_string(),
        matched_rule_priority,
        request_creation_time,
        actions_executed: dash_to_empty(&fields[22]).to_string(),
        redirect_url: dash_to_empty(&fields[23]).to_string(),
        error_reason: dash_to_empty(&fields[24]).to_string(),
        target_port_list: dash_to_empty(&fields[25]).to_string(),
        target_status_code_list: dash_to_empty(&fields[26]).to_string(),
        classification: dash_to_empty(&fields[27]).to_string(),
        classification_reason: dash_to_empty(&fields[28]).to_string(),
        connection_id,
        created_at: DateTime::UNIX_EPOCH,
    };

    validate(&record)?;
    Ok(record)
}

/// Invariants a tokenizable line must still satisfy.
fn validate(record: &LogRecord) -> Result<(), ParseError> {
    if !(100..=599).contains(&record.elb_status_code) {
        return Err(ParseError::validation(format!(
            "elb_status_code {} out of range 100..=599",
            record.elb_status_code
        )));
    }
    if record.target_group_arn.is_empty() {
        return Err(ParseError::validation("target_group_arn is required"));
    }
    if record.trace_id.is_empty() {
        return Err(ParseError::validation("trace_id is required"));
    }
    Ok(())
}

/// True iff at least half of the first `VALIDATE_SAMPLE_LINES` non-blank
/// lines parse. An all-blank sample is not a valid format.
pub fn validate_format(sample: &str) -> bool {
    let mut total = 0usize;
    let mut ok = 0usize;
    for line in sample
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(VALIDATE_SAMPLE_LINES)
    {
        total += 1;
        if parse(line).is_ok() {
            ok += 1;
        }
    }
    total > 0 && ok * 2 >= total
}

/// Render a record back into a v2-shape line. Mainly useful for fixtures;
/// `parse(to_line(r))` returns a record equal to `r` modulo `id` and
/// `created_at`.
pub fn to_line(record: &LogRecord) -> String {
    fn opt(s: &str) -> &str {
        if s.is_empty() {
            "-"
        } else {
            s
        }
    }
    fn host_port(ip: Option<&std::net::IpAddr>, port: u16) -> String {
        match ip {
            Some(std::net::IpAddr::V6(v6)) => format!("[{v6}]:{port}"),
            Some(v4) => format!("{v4}:{port}"),
            None => "-".to_string(),
        }
    }
    let ts = |t: &DateTime<Utc>| t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

    format!(
        "https {} app/albflow/0123456789abcdef {} {} {} {} {} {} {} {} {} \"{} {} {}\" \"{}\" {} {} {} \"{}\" \"{}\" \"{}\" {} {} \"{}\" \"{}\" \"{}\" \"{}\" \"{}\" \"{}\" \"{}\" - - {}",
        ts(&record.timestamp),
        host_port(Some(&record.client_ip), record.client_port),
        host_port(record.target_ip.as_ref(), record.target_port),
        record.request_processing_time,
        record.target_processing_time,
        record.response_processing_time,
        record.elb_status_code,
        record.target_status_code,
        record.received_bytes,
        record.sent_bytes,
        record.request_verb,
        record.request_url,
        record.request_protocol,
        opt(&record.user_agent),
        opt(&record.ssl_cipher),
        opt(&record.ssl_protocol),
        opt(&record.target_group_arn),
        opt(&record.trace_id),
        opt(&record.domain_name),
        opt(&record.chosen_cert_arn),
        record.matched_rule_priority,
        ts(&record.request_creation_time),
        opt(&record.actions_executed),
        opt(&record.redirect_url),
        opt(&record.error_reason),
        opt(&record.target_port_list),
        opt(&record.target_status_code_list),
        opt(&record.classification),
        opt(&record.classification_reason),
        opt(&record.connection_id),
    )
}

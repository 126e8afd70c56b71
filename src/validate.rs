use std::{net::IpAddr, str::FromStr, sync::LazyLock};

use chrono::{DateTime, FixedOffset, Timelike};
use percent_encoding::percent_decode_str;
use regex::Regex;
use winnow::{
    ascii::{space0, space1},
    combinator::eof,
    token::take_till,
    PResult, Parser,
};

use crate::{
    error::{Field, FieldValidationError, LineError},
    tokenizer::FieldSet,
    user_agent::{parse_user_agent, UserAgentTree, DEFAULT_MAX_DEPTH},
};

/// HTTP verbs accepted without extra configuration.
pub const DEFAULT_METHODS: [&str; 9] = [
    "OPTIONS", "GET", "HEAD", "POST", "PUT", "DELETE", "TRACE", "CONNECT", "PATCH",
];

static TIMESTAMP_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{2}/[A-Z][a-z]{2}/[0-9]{4}:[0-9]{2}:[0-9]{2}:[0-9]{2} [+-][0-9]{4}$")
        .expect("timestamp pattern is valid")
});

static PROTOCOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^HTTP/[0-9]\.[0-9]$").expect("protocol pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationConfig {
    pub methods: Vec<String>,
    pub max_ua_depth: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            methods: DEFAULT_METHODS.iter().map(|m| m.to_string()).collect(),
            max_ua_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ValidationConfig {
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        let method = method.into();
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    pub fn with_max_ua_depth(mut self, depth: usize) -> Self {
        self.max_ua_depth = depth;
        self
    }
}

/// One fully validated access-log line.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub client_address: String,
    pub identifier: String,
    pub user: String,
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub status_code: u16,
    pub response_size: u64,
    pub user_agent: UserAgentTree,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub protocol: String,
}

/// Run every field validator; the first failure rejects the whole line.
pub fn validate(fields: &FieldSet<'_>, config: &ValidationConfig) -> Result<Record, LineError> {
    validate_address(fields.client_address)?;
    let identifier = validate_token(Field::Identifier, fields.identifier)?;
    let user = validate_token(Field::User, fields.user)?;
    validate_timestamp(fields.timestamp)?;
    let request = validate_request(fields.request, &config.methods)?;
    let status_code = validate_status(fields.status_code)?;
    let response_size = validate_size(fields.response_size)?;
    let user_agent = parse_user_agent(fields.user_agent, config.max_ua_depth)?;

    Ok(Record {
        client_address: fields.client_address.to_string(),
        identifier: identifier.to_string(),
        user: user.to_string(),
        timestamp: fields.timestamp.to_string(),
        method: request.method,
        path: request.path,
        protocol: request.protocol,
        status_code,
        response_size,
        user_agent,
    })
}

/// Dotted-decimal IPv4 or an IPv6 literal.
pub fn validate_address(raw: &str) -> Result<IpAddr, FieldValidationError> {
    IpAddr::from_str(raw)
        .map_err(|_| FieldValidationError::new(Field::ClientAddress, raw, "not an IPv4 or IPv6 address"))
}

/// Identifier and user: any non-empty run without whitespace. `-` means unknown.
pub fn validate_token(field: Field, raw: &str) -> Result<&str, FieldValidationError> {
    if raw.is_empty() {
        return Err(FieldValidationError::new(field, raw, "empty"));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(FieldValidationError::new(field, raw, "contains whitespace"));
    }
    Ok(raw)
}

/// `DD/Mon/YYYY:HH:MM:SS +ZZZZ`, calendar-valid.
pub fn validate_timestamp(raw: &str) -> Result<DateTime<FixedOffset>, FieldValidationError> {
    if !TIMESTAMP_SHAPE.is_match(raw) {
        return Err(FieldValidationError::new(
            Field::Timestamp,
            raw,
            "expected DD/Mon/YYYY:HH:MM:SS +ZZZZ",
        ));
    }
    let dt = DateTime::parse_from_str(raw, "%d/%b/%Y:%H:%M:%S %z")
        .map_err(|e| FieldValidationError::new(Field::Timestamp, raw, e.to_string()))?;
    // chrono accepts :60 as a leap second
    if dt.nanosecond() >= 1_000_000_000 {
        return Err(FieldValidationError::new(Field::Timestamp, raw, "second out of range"));
    }
    Ok(dt)
}

fn request_tokens<'s>(input: &mut &'s str) -> PResult<(&'s str, &'s str, &'s str)> {
    space0(input)?;
    let method = take_till(1.., ' ').parse_next(input)?;
    space1(input)?;
    let path = take_till(1.., ' ').parse_next(input)?;
    space1(input)?;
    let protocol = take_till(1.., ' ').parse_next(input)?;
    space0(input)?;
    eof(input)?;
    Ok((method, path, protocol))
}

/// `METHOD PATH PROTOCOL`. The returned path is percent-decoded.
pub fn validate_request(raw: &str, methods: &[String]) -> Result<Request, FieldValidationError> {
    let input = &mut (&*raw);
    let (method, path, protocol) = request_tokens(input).map_err(|_| {
        FieldValidationError::new(Field::Request, raw, "expected METHOD PATH PROTOCOL")
    })?;

    if !methods.iter().any(|m| m == method) {
        return Err(FieldValidationError::new(Field::Method, method, "unknown HTTP method"));
    }
    if !path.starts_with('/') {
        return Err(FieldValidationError::new(Field::Path, path, "must start with '/'"));
    }
    if !PROTOCOL.is_match(protocol) {
        return Err(FieldValidationError::new(
            Field::Protocol,
            protocol,
            "expected HTTP/<digit>.<digit>",
        ));
    }

    Ok(Request {
        method: method.to_string(),
        path: percent_decode_str(path).decode_utf8_lossy().into_owned(),
        protocol: protocol.to_string(),
    })
}

/// Three digits, 100 through 599.
pub fn validate_status(raw: &str) -> Result<u16, FieldValidationError> {
    if raw.len() != 3 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FieldValidationError::new(Field::StatusCode, raw, "expected three digits"));
    }
    let status: u16 = raw
        .parse()
        .map_err(|_| FieldValidationError::new(Field::StatusCode, raw, "not a number"))?;
    if !(100..=599).contains(&status) {
        return Err(FieldValidationError::new(Field::StatusCode, raw, "outside 100..=599"));
    }
    Ok(status)
}

pub fn validate_size(raw: &str) -> Result<u64, FieldValidationError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FieldValidationError::new(
            Field::ResponseSize,
            raw,
            "expected a non-negative integer",
        ));
    }
    raw.parse()
        .map_err(|_| FieldValidationError::new(Field::ResponseSize, raw, "too large"))
}

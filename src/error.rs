use std::{fmt, io};

use thiserror::Error;
use winnow::error::{ContextError, ErrMode, StrContext};

/// A line that cannot be split into the expected fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedLineError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("unterminated quote starting at byte {0}")]
    UnterminatedQuote(usize),

    #[error("unterminated bracket starting at byte {0}")]
    UnterminatedBracket(usize),

    #[error("{field} must be enclosed in {open}{close}")]
    MissingGroup {
        field: Field,
        open: char,
        close: char,
    },

    #[error("cannot split line at byte {0}")]
    Unsplittable(usize),

    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Names the field a validator rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    ClientAddress,
    Identifier,
    User,
    Timestamp,
    Request,
    Method,
    Path,
    Protocol,
    StatusCode,
    ResponseSize,
    UserAgent,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientAddress => "client address",
            Self::Identifier => "identifier",
            Self::User => "user",
            Self::Timestamp => "timestamp",
            Self::Request => "request line",
            Self::Method => "method",
            Self::Path => "path",
            Self::Protocol => "protocol",
            Self::StatusCode => "status code",
            Self::ResponseSize => "response size",
            Self::UserAgent => "user agent",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field} {raw:?}: {reason}")]
pub struct FieldValidationError {
    pub field: Field,
    pub raw: String,
    pub reason: String,
}

impl FieldValidationError {
    pub fn new(field: Field, raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field,
            raw: raw.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserAgentError {
    #[error("unbalanced parenthesis at byte {position}")]
    UnbalancedNesting { position: usize },

    #[error("comment nesting deeper than {limit}")]
    MaxDepthExceeded { limit: usize },
}

/// Why a single line was classified as failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("malformed line: {0}")]
    Malformed(#[from] MalformedLineError),

    #[error(transparent)]
    Field(#[from] FieldValidationError),

    #[error("invalid user agent: {0}")]
    UserAgent(#[from] UserAgentError),
}

impl LineError {
    /// The offending field, when the failure is attributable to one.
    pub fn field(&self) -> Option<Field> {
        match self {
            Self::Malformed(MalformedLineError::MissingGroup { field, .. }) => Some(*field),
            Self::Malformed(_) => None,
            Self::Field(e) => Some(e.field),
            Self::UserAgent(_) => Some(Field::UserAgent),
        }
    }
}

/// First label attached to a winnow error, used to tell failure kinds apart.
pub(crate) fn context_label(err: ErrMode<ContextError>) -> Option<&'static str> {
    let err = err.into_inner()?;
    let label = err.context().find_map(|c| match c {
        StrContext::Label(label) => Some(*label),
        _ => None,
    });
    label
}

/// Failures that stop a whole run. Only the input boundary produces these.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),

    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

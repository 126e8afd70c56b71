//! Validate Common Log Format access logs and summarise them.
//!
//! Each line goes through [`tokenizer::tokenize`], the field validators in
//! [`validate`] (with [`user_agent`] for the agent string) and, when valid,
//! into an [`aggregate::AggregateState`]. [`summary::build_summary`] turns
//! that state into the final report.

pub mod aggregate;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod sink;
pub mod summary;
pub mod tokenizer;
pub mod user_agent;
pub mod validate;

pub use aggregate::{AggregateState, PathStats};
pub use error::{Field, FieldValidationError, LineError, MalformedLineError, RunError, UserAgentError};
pub use pipeline::{parse_line, Pipeline};
pub use sink::{LineSink, NoopSink, StatsdSink};
pub use summary::{build_summary, SummaryReport};
pub use tokenizer::{tokenize, FieldSet};
pub use user_agent::{parse_user_agent, Node, NodeId, UserAgentTree};
pub use validate::{validate, Record, ValidationConfig};

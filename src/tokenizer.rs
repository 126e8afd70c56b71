use winnow::{
    combinator::{alt, cut_err, eof, fail, opt, preceded, repeat, separated},
    error::StrContext,
    token::{any, take_till, take_while},
    PResult, Parser,
};

use crate::error::{context_label, Field, MalformedLineError};

/// Number of fields in one access-log line.
pub const FIELD_COUNT: usize = 8;

/// The raw fields of one line, group delimiters already stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSet<'a> {
    pub client_address: &'a str,
    pub identifier: &'a str,
    pub user: &'a str,
    pub timestamp: &'a str,
    pub request: &'a str,
    pub status_code: &'a str,
    pub response_size: &'a str,
    pub user_agent: &'a str,
}

const QUOTE: &str = "closing quote";
const BRACKET: &str = "closing bracket";

/// Split `line` on spaces, keeping `"..."` and `[...]` groups intact.
///
/// Runs of spaces count as a single delimiter. A trailing line terminator is
/// ignored.
pub fn tokenize(line: &str) -> Result<FieldSet<'_>, MalformedLineError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let raw = split_fields(line)?;

    if raw.len() != FIELD_COUNT {
        return Err(MalformedLineError::FieldCount {
            expected: FIELD_COUNT,
            found: raw.len(),
        });
    }

    Ok(FieldSet {
        client_address: raw[0],
        identifier: raw[1],
        user: raw[2],
        timestamp: strip_group(raw[3], Field::Timestamp, '[', ']')?,
        request: strip_group(raw[4], Field::Request, '"', '"')?,
        status_code: raw[5],
        response_size: raw[6],
        user_agent: strip_group(raw[7], Field::UserAgent, '"', '"')?,
    })
}

fn split_fields(line: &str) -> Result<Vec<&str>, MalformedLineError> {
    let input = &mut (&*line);
    fields(input).map_err(|e| {
        let at = line.len() - input.len();
        match context_label(e) {
            Some(QUOTE) => MalformedLineError::UnterminatedQuote(at),
            Some(BRACKET) => MalformedLineError::UnterminatedBracket(at),
            _ => MalformedLineError::Unsplittable(at),
        }
    })
}

fn gap<'s>(input: &mut &'s str) -> PResult<&'s str> {
    take_while(1.., ' ').parse_next(input)
}

fn fields<'s>(input: &mut &'s str) -> PResult<Vec<&'s str>> {
    take_while(0.., ' ').parse_next(input)?;
    let fields = separated(0.., field, gap).parse_next(input)?;
    take_while(0.., ' ').parse_next(input)?;
    eof(input)?;
    Ok(fields)
}

/// One field, groups included: `a"b c"[d e]` is a single field.
fn field<'s>(input: &mut &'s str) -> PResult<&'s str> {
    let bare = take_till(1.., |c: char| c == ' ' || c == '"' || c == '[').void();
    repeat::<_, _, (), _, _>(1.., alt((quoted, bracketed, bare)))
        .take()
        .parse_next(input)
}

/// `"..."` where `\` escapes the next character.
fn quoted(input: &mut &str) -> PResult<()> {
    let open = *input;
    '"'.parse_next(input)?;
    repeat::<_, _, (), _, _>(
        0..,
        alt((
            preceded('\\', any).void(),
            take_till(1.., |c: char| c == '"' || c == '\\').void(),
        )),
    )
    .parse_next(input)?;
    closing(input, open, '"', QUOTE)
}

fn bracketed(input: &mut &str) -> PResult<()> {
    let open = *input;
    '['.parse_next(input)?;
    take_till(0.., ']').parse_next(input)?;
    closing(input, open, ']', BRACKET)
}

/// A missing `close` is fatal; the error points back at the opening byte.
fn closing<'s>(input: &mut &'s str, open: &'s str, close: char, label: &'static str) -> PResult<()> {
    if opt(close).parse_next(input)?.is_none() {
        *input = open;
        return cut_err(fail).context(StrContext::Label(label)).parse_next(input);
    }
    Ok(())
}

fn strip_group(raw: &str, field: Field, open: char, close: char) -> Result<&str, MalformedLineError> {
    raw.strip_prefix(open)
        .and_then(|s| s.strip_suffix(close))
        .ok_or(MalformedLineError::MissingGroup { field, open, close })
}

//! Line parsing for the legacy command log.
//!
//! A command line looks like
//! `[17] 2021-12-20 10:00:00.123456 ... CMD-START ... ID_REQ_LOGIN ...`.
//! Lines are scanned once from the left; no regex engine is involved so the
//! hot path stays allocation-free apart from the owned command label.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use thiserror::Error;

use super::event::{
    EventKind, LogEvent, COMMAND_PREFIX, END_MARKER, START_MARKER, UNKNOWN_COMMAND,
    UNRECOGNIZED_MARKER,
};

/// Errors that can occur while decoding a command-log line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line carries neither start nor end marker")]
    NoMarker,

    #[error("missing bracketed thread id")]
    MissingThreadId,

    #[error("invalid thread id {raw:?}")]
    InvalidThreadId { raw: String },

    #[error("missing timestamp after thread id")]
    MissingTimestamp,

    #[error("invalid timestamp {raw:?}")]
    InvalidTimestamp { raw: String },
}

/// Returns true when the line contains the command start marker.
///
/// Independent of [`parse_line`] so rate counting never depends on a full
/// record parse.
#[inline]
pub fn is_start_marker(line: &str) -> bool {
    line.contains(START_MARKER)
}

/// Returns true when the line contains the command end marker.
#[inline]
pub fn is_end_marker(line: &str) -> bool {
    line.contains(END_MARKER)
}

/// Parse one raw log line into a [`LogEvent`].
pub fn parse_line(line: &str) -> Result<LogEvent, ParseError> {
    let kind = if is_start_marker(line) {
        EventKind::Start
    } else if is_end_marker(line) {
        EventKind::End
    } else {
        return Err(ParseError::NoMarker);
    };

    let thread_id = parse_thread_id(line)?;
    let timestamp = parse_timestamp(line)?;
    let command_id = extract_command(line).to_string();

    Ok(LogEvent {
        thread_id,
        timestamp,
        kind,
        command_id,
    })
}

/// Extracts the integer between the first `[` and the following `]`.
pub fn parse_thread_id(line: &str) -> Result<u32, ParseError> {
    let open = line.find('[').ok_or(ParseError::MissingThreadId)?;
    let rest = &line[open + 1..];
    let close = rest.find(']').ok_or(ParseError::MissingThreadId)?;
    let raw = rest[..close].trim();

    raw.parse::<u32>()
        .map_err(|_| ParseError::InvalidThreadId {
            raw: raw.to_string(),
        })
}

/// Extracts the timestamp that follows the first `]` of the line.
///
/// Two variants exist, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD HH:MM:SS.f+`;
/// the fractional token decides which one applies.
pub fn parse_timestamp(line: &str) -> Result<NaiveDateTime, ParseError> {
    let close = line.find(']').ok_or(ParseError::MissingTimestamp)?;
    let rest = line[close + 1..].trim_start();

    let (date_token, rest) = split_token(rest).ok_or(ParseError::MissingTimestamp)?;
    let rest = rest.trim_start();
    let time_len = rest
        .bytes()
        .take_while(|b| b.is_ascii_digit() || *b == b':' || *b == b'.')
        .count();
    if time_len == 0 {
        return Err(ParseError::MissingTimestamp);
    }
    let time_token = &rest[..time_len];

    let invalid = || ParseError::InvalidTimestamp {
        raw: format!("{date_token} {time_token}"),
    };

    let date = NaiveDate::parse_from_str(date_token, "%Y-%m-%d").map_err(|_| invalid())?;
    let time = parse_time_of_day(time_token).ok_or_else(invalid)?;

    Ok(date.and_time(time))
}

/// Parses `HH:MM:SS` with an optional `.fraction` suffix.
pub(crate) fn parse_time_of_day(token: &str) -> Option<NaiveTime> {
    match token.split_once('.') {
        Some((hms, fraction)) if has_fraction_digits(fraction) => {
            let time = NaiveTime::parse_from_str(hms, "%H:%M:%S").ok()?;
            time.with_nanosecond(parse_fraction_nanos(fraction)?)
        }
        Some((hms, _)) => NaiveTime::parse_from_str(hms, "%H:%M:%S").ok(),
        None => NaiveTime::parse_from_str(token, "%H:%M:%S").ok(),
    }
}

/// Converts fractional-second digits (left aligned) into nanoseconds.
///
/// Digits beyond nanosecond precision are ignored.
pub(crate) fn parse_fraction_nanos(digits: &str) -> Option<u32> {
    if !has_fraction_digits(digits) {
        return None;
    }

    let mut nanos: u32 = 0;
    let mut scale: u32 = 100_000_000;
    for b in digits.bytes().take(9) {
        nanos += u32::from(b - b'0') * scale;
        scale /= 10;
    }
    Some(nanos)
}

fn has_fraction_digits(digits: &str) -> bool {
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Returns the command label of a line.
///
/// The explicit "unrecognized command" marker maps to [`UNKNOWN_COMMAND`],
/// as does a line without any `ID_<word>` token.
pub fn extract_command(line: &str) -> &str {
    if line.contains(UNRECOGNIZED_MARKER) {
        return UNKNOWN_COMMAND;
    }

    let mut offset = 0;
    while let Some(pos) = line[offset..].find(COMMAND_PREFIX) {
        let start = offset + pos;
        let label_body = &line[start + COMMAND_PREFIX.len()..];
        let body_len = label_body
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
            .count();
        if body_len > 0 {
            return &line[start..start + COMMAND_PREFIX.len() + body_len];
        }
        offset = start + COMMAND_PREFIX.len();
    }

    UNKNOWN_COMMAND
}

fn split_token(s: &str) -> Option<(&str, &str)> {
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(idx) => Some((&s[..idx], &s[idx..])),
        None => Some((s, "")),
    }
}

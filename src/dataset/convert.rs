//! Codec for the converted per-request log (`Conv_<date>.log`).
//!
//! ```text
//! [2021-12-20 10:00:00,150000] (PR:  0/ 1/ 0) ID_A                               : Response time 150 ms
//! ```

use std::io::Write;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::cmdlog::parse::parse_time_of_day;
use crate::cmdlog::extract_command;
use crate::lifecycle::CompletedRequest;

const RESPONSE_MARKER: &str = "Response time";
const PR_MARKER: &str = "PR:";

/// Errors that can occur while decoding a converted-log line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertedLineError {
    #[error("line is not a request record")]
    NotARecord,

    #[error("missing bracketed timestamp")]
    MissingTimestamp,

    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("missing or invalid concurrency triple")]
    InvalidConcurrency,

    #[error("missing or invalid response time")]
    InvalidResponseTime,
}

/// Formats one completed request as a converted-log line (no terminator).
pub fn format_converted_line(req: &CompletedRequest) -> String {
    format!(
        "[{:26}] (PR: {:2}/{:2}/{:2}) {:35}: Response time {} ms",
        req.timestamp.format("%Y-%m-%d %H:%M:%S,%6f").to_string(),
        req.concurrency_start,
        req.concurrency_end,
        req.concurrency_finished,
        req.command_id,
        req.duration_ms,
    )
}

pub fn write_converted_line<W: Write>(out: &mut W, req: &CompletedRequest) -> std::io::Result<()> {
    writeln!(out, "{}", format_converted_line(req))
}

/// Parses a converted-log line back into a [`CompletedRequest`].
pub fn parse_converted_line(line: &str) -> Result<CompletedRequest, ConvertedLineError> {
    let marker = line
        .find(RESPONSE_MARKER)
        .ok_or(ConvertedLineError::NotARecord)?;

    let timestamp = bracketed_timestamp(line)?;
    let (concurrency_start, concurrency_end, concurrency_finished) = concurrency_triple(line)?;

    let response = line[marker + RESPONSE_MARKER.len()..].trim_start();
    let digits = response
        .bytes()
        .take_while(|b| b.is_ascii_digit() || *b == b'-')
        .count();
    let duration_ms = response[..digits]
        .parse::<i64>()
        .map_err(|_| ConvertedLineError::InvalidResponseTime)?;

    let command_id = extract_command(&line[..marker]).to_string();

    Ok(CompletedRequest {
        timestamp,
        command_id,
        concurrency_start,
        concurrency_end,
        concurrency_finished,
        duration_ms,
    })
}

fn bracketed_timestamp(line: &str) -> Result<NaiveDateTime, ConvertedLineError> {
    let open = line.find('[').ok_or(ConvertedLineError::MissingTimestamp)?;
    let rest = &line[open + 1..];
    let close = rest.find(']').ok_or(ConvertedLineError::MissingTimestamp)?;
    let raw = rest[..close].trim();

    let invalid = || ConvertedLineError::InvalidTimestamp(raw.to_string());
    let (date, time) = raw.split_once(' ').ok_or_else(invalid)?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;
    let time = parse_time_of_day(&time.trim().replacen(',', ".", 1)).ok_or_else(invalid)?;
    Ok(date.and_time(time))
}

fn concurrency_triple(line: &str) -> Result<(u32, u32, u32), ConvertedLineError> {
    let start = line
        .find(PR_MARKER)
        .ok_or(ConvertedLineError::InvalidConcurrency)?;
    let rest = &line[start + PR_MARKER.len()..];
    let end = rest.find(')').ok_or(ConvertedLineError::InvalidConcurrency)?;

    let mut parts = rest[..end]
        .split('/')
        .map(|p| p.trim().parse::<u32>());
    let mut next = || match parts.next() {
        Some(Ok(v)) => Ok(v),
        _ => Err(ConvertedLineError::InvalidConcurrency),
    };
    let triple = (next()?, next()?, next()?);
    if parts.next().is_some() {
        return Err(ConvertedLineError::InvalidConcurrency);
    }
    Ok(triple)
}

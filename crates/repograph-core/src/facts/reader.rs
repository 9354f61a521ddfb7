//! JSON-lines fact stream decoding.

use serde::Deserialize;
use std::io::BufRead;
use thiserror::Error;
use tracing::warn;

use super::{Fact, FactBatch, MalformedFact, ParseFailure};

/// Errors that stop a fact stream from being read at all.
#[derive(Debug, Error)]
pub enum FactError {
    /// The stream itself could not be read; no graph can be built from it.
    #[error("Fact stream '{source_name}' is unreadable: {source}")]
    FactStreamUnreadable {
        source_name: String,
        #[source]
        source: std::io::Error,
    },
}

/// One line of a fact stream: either a fact or a parse-failure record.
#[derive(Deserialize)]
#[serde(untagged)]
enum Line {
    Failure(FailureLine),
    Fact(Fact),
}

#[derive(Deserialize)]
struct FailureLine {
    #[serde(rename = "type")]
    kind: FailureTag,
    path: String,
    error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum FailureTag {
    ParseFailure,
}

/// Read a JSON-lines fact stream into a batch.
///
/// Blank lines and `#` comments are skipped. A line that is not UTF-8 or does
/// not decode is recorded as [`MalformedFact`] and reading continues; only an
/// I/O failure of the reader is fatal.
pub fn read_fact_stream<R: BufRead>(source_name: &str, mut reader: R) -> Result<FactBatch, FactError> {
    let mut batch = FactBatch::new();
    let mut buf = Vec::new();
    let mut line_number = 0;

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| FactError::FactStreamUnreadable {
                source_name: source_name.to_string(),
                source: e,
            })?;
        if read == 0 {
            break;
        }
        line_number += 1;

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                warn!(source = source_name, line = line_number, "Skipping non-UTF-8 line: {}", e);
                batch.malformed.push(MalformedFact {
                    source: source_name.to_string(),
                    line: line_number,
                    message: e.to_string(),
                });
                continue;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match serde_json::from_str::<Line>(trimmed) {
            Ok(Line::Fact(fact)) => batch.facts.push(fact),
            Ok(Line::Failure(FailureLine { kind: FailureTag::ParseFailure, path, error })) => {
                batch.failures.push(ParseFailure { path, error });
            }
            Err(e) => {
                warn!(source = source_name, line = line_number, "Skipping malformed fact: {}", e);
                batch.malformed.push(MalformedFact {
                    source: source_name.to_string(),
                    line: line_number,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(batch)
}

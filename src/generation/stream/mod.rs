
use std::io::{BufRead, ErrorKind};
use std::iter::FusedIterator;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{RagError, Result};

/// Fragment stream over a boxed response body
pub type GenerationStream = FragmentStream<Box<dyn BufRead + Send>>;

/// One line of a streamed generation response
#[derive(Debug, Deserialize)]
struct StreamRecord {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Lazy sequence of text fragments parsed from newline-delimited JSON records
///
/// The sequence ends only at a record whose `done` flag is set. Malformed
/// lines are skipped. Reaching end of input before the terminal record, or an
/// `error` record, yields one `GenerationBackend` error and ends the sequence.
pub struct FragmentStream<R> {
    reader: R,
    line: String,
    finished: bool,
    skipped: usize,
}

impl<R: BufRead> FragmentStream<R> {
    #[inline]
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            finished: false,
            skipped: 0,
        }
    }

    /// Number of malformed records skipped so far
    #[inline]
    pub fn skipped_records(&self) -> usize {
        self.skipped
    }

    fn fail(&mut self, message: String) -> Option<Result<String>> {
        self.finished = true;
        Some(Err(RagError::GenerationBackend {
            message,
            partial: None,
        }))
    }
}

impl<R: BufRead> Iterator for FragmentStream<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    return self.fail("stream ended without a terminal record".to_string());
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    self.skipped += 1;
                    warn!("Skipping stream record that is not valid UTF-8");
                    continue;
                }
                Err(e) => {
                    return self.fail(format!("failed to read generation stream: {}", e));
                }
            }

            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }

            let record: StreamRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    self.skipped += 1;
                    warn!("Skipping malformed stream record: {}", e);
                    continue;
                }
            };

            if let Some(error) = record.error {
                return self.fail(error);
            }

            if record.done {
                self.finished = true;
                debug!(
                    "Generation stream finished ({} malformed records skipped)",
                    self.skipped
                );
                return (!record.response.is_empty()).then_some(Ok(record.response));
            }

            if !record.response.is_empty() {
                return Some(Ok(record.response));
            }
        }
    }
}

impl<R: BufRead> FusedIterator for FragmentStream<R> {}

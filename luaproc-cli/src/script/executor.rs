//! Per-record transform executor
//!
//! Each input record is exported to GeoJSON, passed through the session's
//! dispatcher, and the JSON result decoded back into zero or more records.
//! Failures are per record and leave the session usable.

use super::codec::{Crs, InterchangeCodec, Record};
use super::engine::ScriptEngine;
use super::environment::ExecutionContext;

/// Failure while transforming a single record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordError {
    /// The record could not be serialized
    Export(String),
    /// No transform between the two reference systems
    Reprojection { from: Crs, to: Crs },
    /// The script raised an error
    Script(String),
    /// The result is not valid JSON
    MalformedResult(String),
    /// The result is JSON but not a feature, collection or feature array
    UnexpectedShape(String),
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::Export(msg) => write!(f, "failed to export record: {}", msg),
            RecordError::Reprojection { from, to } => {
                write!(f, "cannot reproject from {} to {}", from, to)
            }
            RecordError::Script(msg) => write!(f, "script error: {}", msg),
            RecordError::MalformedResult(msg) => write!(f, "malformed result: {}", msg),
            RecordError::UnexpectedShape(msg) => write!(f, "unexpected result shape: {}", msg),
        }
    }
}

impl std::error::Error for RecordError {}

/// Outcome of driving a transformer over a sequence of records
#[derive(Debug, Default)]
pub struct RunReport {
    pub outputs: Vec<Record>,
    /// Input index and error of every failed record
    pub failures: Vec<(usize, RecordError)>,
    pub processed: usize,
    /// Records that produced no output
    pub filtered: usize,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies a session's transform to individual records
pub struct RecordTransformer<'a, E: ScriptEngine> {
    context: &'a ExecutionContext<E>,
    codec: InterchangeCodec,
}

impl<'a, E: ScriptEngine> RecordTransformer<'a, E> {
    pub fn new(context: &'a ExecutionContext<E>, codec: InterchangeCodec) -> Self {
        RecordTransformer { context, codec }
    }

    pub fn codec(&self) -> &InterchangeCodec {
        &self.codec
    }

    /// Transform one record; an empty result yields no records
    pub fn execute(&self, record: &Record) -> Result<Vec<Record>, RecordError> {
        let payload = self.codec.export(record)?;

        let result = self
            .context
            .dispatch(&payload)
            .map_err(|e| RecordError::Script(format!("{:#}", e)))?;

        match result {
            None => Ok(Vec::new()),
            Some(text) => self.codec.decode(&text),
        }
    }

    /// Transform every record in order, collecting failures instead of
    /// stopping at the first one
    pub fn run(&self, records: impl IntoIterator<Item = Record>) -> RunReport {
        let mut report = RunReport::default();

        for (index, record) in records.into_iter().enumerate() {
            report.processed += 1;
            match self.execute(&record) {
                Ok(outputs) if outputs.is_empty() => report.filtered += 1,
                Ok(outputs) => report.outputs.extend(outputs),
                Err(e) => {
                    log::warn!(
                        "Record {} failed in '{}': {}",
                        index,
                        self.context.script_id(),
                        e
                    );
                    report.failures.push((index, e));
                }
            }
        }

        log::debug!(
            "Processed {} records: {} outputs, {} filtered, {} failed",
            report.processed,
            report.outputs.len(),
            report.filtered,
            report.failures.len()
        );

        report
    }
}

use std::io::BufRead;

use rayon::prelude::*;
use tracing::debug;

use crate::{
    aggregate::AggregateState,
    error::{LineError, MalformedLineError, RunError},
    sink::{LineSink, NoopSink},
    summary::{build_summary, SummaryReport},
    tokenizer::tokenize,
    validate::{validate, Record, ValidationConfig},
};

/// Lines handed to the worker pool at a time when running with several jobs.
pub const DEFAULT_BATCH_SIZE: usize = 4096;

/// Tokenize and validate one line. Pure; safe to call from any thread.
pub fn parse_line(line: &str, config: &ValidationConfig) -> Result<Record, LineError> {
    let fields = tokenize(line)?;
    validate(&fields, config)
}

/// Like [`parse_line`] for raw bytes; invalid UTF-8 is a malformed line.
pub fn parse_line_bytes(line: &[u8], config: &ValidationConfig) -> Result<Record, LineError> {
    let line = std::str::from_utf8(line).map_err(|_| MalformedLineError::InvalidUtf8)?;
    parse_line(line, config)
}

/// Feeds lines through tokenizer, validators and aggregator in input order.
#[derive(Debug)]
pub struct Pipeline<S = NoopSink> {
    config: ValidationConfig,
    state: AggregateState,
    sink: S,
    jobs: usize,
    batch_size: usize,
}

impl Pipeline<NoopSink> {
    pub fn new(config: ValidationConfig) -> Self {
        Self::with_sink(config, NoopSink)
    }
}

impl<S: LineSink> Pipeline<S> {
    pub fn with_sink(config: ValidationConfig, sink: S) -> Self {
        Self {
            config,
            state: AggregateState::new(),
            sink,
            jobs: 1,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Parse lines on `jobs` worker threads. Aggregation stays serial.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn state(&self) -> &AggregateState {
        &self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Process one line and report how it was classified.
    pub fn process_line(&mut self, line: &str) -> Result<(), LineError> {
        let parsed = parse_line(line, &self.config);
        self.record(&parsed);
        parsed.map(drop)
    }

    pub fn process_bytes(&mut self, line: &[u8]) -> Result<(), LineError> {
        let parsed = parse_line_bytes(line, &self.config);
        self.record(&parsed);
        parsed.map(drop)
    }

    /// Count one classified line. A failed line is an outcome, not an error.
    fn record(&mut self, parsed: &Result<Record, LineError>) {
        match parsed {
            Ok(record) => {
                self.state.observe(record);
                self.sink.line_ok();
            }
            Err(e) => {
                self.state.observe_failure();
                debug!(line = self.state.total_lines(), field = ?e.field(), error = %e, "line rejected");
                self.sink.line_failed(e);
            }
        }
    }

    /// Consume every `\n`-terminated line of `reader`.
    pub fn process_reader<R: BufRead>(&mut self, reader: R) -> Result<(), RunError> {
        if self.jobs > 1 {
            self.process_reader_parallel(reader)
        } else {
            self.process_reader_serial(reader)
        }
    }

    fn process_reader_serial<R: BufRead>(&mut self, mut reader: R) -> Result<(), RunError> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                return Ok(());
            }
            let parsed = parse_line_bytes(&buf, &self.config);
            self.record(&parsed);
        }
    }

    fn process_reader_parallel<R: BufRead>(&mut self, mut reader: R) -> Result<(), RunError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()?;
        let mut batch: Vec<Vec<u8>> = Vec::with_capacity(self.batch_size);

        loop {
            batch.clear();
            while batch.len() < self.batch_size {
                let mut line = Vec::new();
                if reader.read_until(b'\n', &mut line)? == 0 {
                    break;
                }
                batch.push(line);
            }
            if batch.is_empty() {
                return Ok(());
            }

            let config = &self.config;
            // collect keeps input order, so first-seen ranking matches a serial run
            let parsed: Vec<_> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|line| parse_line_bytes(line, config))
                    .collect()
            });
            for result in &parsed {
                self.record(result);
            }
        }
    }

    /// Snapshot the current aggregate. Safe to call at any point.
    pub fn summary(&self, top_ips: usize, top_paths: usize) -> SummaryReport {
        build_summary(&self.state, top_ips, top_paths)
    }
}

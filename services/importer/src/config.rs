//! Runtime tuning for an import run, read from the environment.

use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_LOOKUP_CHUNK_SIZE: usize = 100;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_WRITE_CONCURRENCY: usize = 1;

/// Upper bound keeping one batched insert under the Postgres bind limit.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Rows previewed before committing to a full run.
pub const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub lookup_chunk_size: usize,
    pub call_timeout: Duration,
    pub write_concurrency: usize,
    pub delimiter: u8,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            lookup_chunk_size: DEFAULT_LOOKUP_CHUNK_SIZE,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            write_concurrency: DEFAULT_WRITE_CONCURRENCY,
            delimiter: b',',
        }
    }
}

impl ImportConfig {
    /// Read `IMPORT_*` variables; unset or unparseable values keep defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str, default: u64| -> u64 {
            get(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let delimiter = get("IMPORT_DELIMITER")
            .and_then(|v| match v.as_str() {
                "\\t" | "tab" => Some(b'\t'),
                s if s.len() == 1 => s.bytes().next(),
                _ => None,
            })
            .unwrap_or(b',');

        Self {
            batch_size: parse("IMPORT_BATCH_SIZE", DEFAULT_BATCH_SIZE as u64) as usize,
            lookup_chunk_size: parse("IMPORT_LOOKUP_CHUNK_SIZE", DEFAULT_LOOKUP_CHUNK_SIZE as u64)
                as usize,
            call_timeout: Duration::from_secs(parse(
                "IMPORT_CALL_TIMEOUT_SECS",
                DEFAULT_CALL_TIMEOUT_SECS,
            )),
            write_concurrency: parse("IMPORT_WRITE_CONCURRENCY", DEFAULT_WRITE_CONCURRENCY as u64)
                as usize,
            delimiter,
        }
        .sanitized()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self.sanitized()
    }

    /// Clamp every knob into its usable range.
    pub fn sanitized(mut self) -> Self {
        self.batch_size = self.batch_size.clamp(1, MAX_BATCH_SIZE);
        self.lookup_chunk_size = self.lookup_chunk_size.max(1);
        self.write_concurrency = self.write_concurrency.max(1);
        if self.call_timeout.is_zero() {
            self.call_timeout = Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS);
        }
        self
    }
}

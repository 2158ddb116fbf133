//! The request log sink.
//!
//! Every outgoing provider request is written as a single JSON object to the
//! configured directory, one file per request:
//! `<iso8601-with-safe-separators>_<provider>.json`. The core only emits
//! these files; rotation and retention are external concerns. Failures to
//! write are logged and never fail the request.

use std::path::PathBuf;

use jiff::Timestamp;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct RequestLogger {
    dir: PathBuf,
}

#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: Timestamp,
    provider: &'a str,
    model: &'a str,
    request: &'a Value,
}

impl RequestLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write one request log file. Best-effort: IO problems are logged at
    /// warn level and swallowed.
    pub fn log_request(&self, provider: &str, model: &str, request: &Value) {
        let timestamp = Timestamp::now();
        let file_name = format!("{}_{provider}.json", safe_iso8601(timestamp));
        let path = self.dir.join(file_name);

        let entry = LogEntry {
            timestamp,
            provider,
            model,
            request,
        };

        let json = match serde_json::to_vec_pretty(&entry) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("Failed to serialize request log entry for {provider}/{model}: {e}");
                return;
            }
        };

        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            log::warn!("Failed to create request log directory {}: {e}", self.dir.display());
            return;
        }

        if let Err(e) = std::fs::write(&path, json) {
            log::warn!("Failed to write request log {}: {e}", path.display());
        }
    }
}

/// ISO-8601 with `:` replaced so the result is a portable file name.
fn safe_iso8601(timestamp: Timestamp) -> String {
    timestamp.to_string().replace(':', "-")
}

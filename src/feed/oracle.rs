use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};

use crate::models::OracleSignal;

/// Reader for the side-channel oracle file.
///
/// An external process rewrites a small JSON file with order-flow scores
/// (CVD, momentum, trend) and an embedded timestamp. Values older than
/// the TTL are discarded; the engine then votes without flow input
/// rather than on stale flow.
#[derive(Debug)]
pub struct OracleReader {
    path: PathBuf,
    ttl_secs: i64,
}

impl OracleReader {
    pub fn new(path: impl AsRef<Path>, ttl_secs: i64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ttl_secs,
        }
    }

    /// Current oracle signal, or None when the file is missing,
    /// unparseable, or past its TTL.
    pub fn read(&self) -> Option<OracleSignal> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("oracle file unreadable: {}", e);
                return None;
            }
        };

        let signal: OracleSignal = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!("oracle file unparseable: {}", e);
                return None;
            }
        };

        let age = Utc::now() - signal.timestamp;
        if age > Duration::seconds(self.ttl_secs) {
            tracing::debug!("oracle signal expired ({}s old)", age.num_seconds());
            return None;
        }

        Some(signal)
    }
}

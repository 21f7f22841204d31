use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;

use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::orchestrator::RetrievalOutcome;

const LOG_FILE: &str = "diagnostics.jsonl";
const BACKUP_FILE: &str = "diagnostics.1.jsonl";

#[derive(Clone)]
pub struct DiagnosticsLog {
    enabled: Arc<AtomicBool>,
    path: PathBuf,
    backup_path: PathBuf,
    max_bytes: u64,
    write_lock: Arc<Mutex<()>>,
}

impl DiagnosticsLog {
    pub fn new<P: AsRef<Path>>(data_dir: P, config: &AppConfig) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(LOG_FILE);
        OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            enabled: Arc::new(AtomicBool::new(config.diagnostics_enabled)),
            path,
            backup_path: data_dir.join(BACKUP_FILE),
            max_bytes: config.diagnostics_max_bytes,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn record(&self, name: impl Into<String>, payload: serde_json::Value) -> AppResult<()> {
        self.append(&[DiagnosticEvent::new(name.into(), payload)])
    }

    pub fn record_outcome(&self, scope: &str, outcome: &RetrievalOutcome) -> AppResult<()> {
        let mut events = outcome
            .attempts
            .iter()
            .map(|attempt| {
                DiagnosticEvent::new(
                    "fetch_attempt".into(),
                    json!({
                        "scope": scope,
                        "source": attempt.source,
                        "keywordCount": attempt.keyword_count,
                        "error": attempt.error,
                        "timingMs": attempt.timing_ms,
                    }),
                )
            })
            .collect::<Vec<_>>();
        events.push(DiagnosticEvent::new(
            "fetch_outcome".into(),
            json!({
                "scope": scope,
                "source": outcome.result.source,
                "keywordCount": outcome.result.keywords.len(),
                "error": outcome.result.error,
                "attempts": outcome.attempts.len(),
                "totalMs": outcome.total_ms,
            }),
        ));
        self.append(&events)
    }

    fn append(&self, events: &[DiagnosticEvent]) -> AppResult<()> {
        if !self.enabled.load(Ordering::Relaxed) || events.is_empty() {
            return Ok(());
        }

        let (encoded, incoming_bytes) = encode_events(events)?;
        let _guard = self.write_lock.lock();
        self.rotate_if_needed(incoming_bytes)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for line in &encoded {
            file.write_all(line)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        Ok(())
    }

    fn rotate_if_needed(&self, incoming_bytes: u64) -> AppResult<()> {
        let current_size = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if current_size == 0 || current_size + incoming_bytes <= self.max_bytes {
            return Ok(());
        }
        fs::rename(&self.path, &self.backup_path)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct DiagnosticEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl DiagnosticEvent {
    fn new(name: String, payload: serde_json::Value) -> Self {
        Self {
            name,
            timestamp: Utc::now(),
            payload,
        }
    }
}

fn encode_events(events: &[DiagnosticEvent]) -> AppResult<(Vec<Vec<u8>>, u64)> {
    let mut encoded = Vec::with_capacity(events.len());
    let mut bytes = 0_u64;
    for event in events {
        let line = serde_json::to_vec(event)?;
        bytes += (line.len() + 1) as u64;
        encoded.push(line);
    }
    Ok((encoded, bytes))
}

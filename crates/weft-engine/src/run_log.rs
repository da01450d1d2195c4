use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use weft_core::event::EventBus;
use weft_core::types::{LogEntry, NodeId, RunEvent, RunId, Severity};

/// Append-only audit trail of one run.
///
/// Cheap to clone; clones share the same entries. Every append is mirrored
/// to `tracing` and, when attached, published on the event bus.
#[derive(Clone, Default)]
pub struct RunLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    bus: Option<Arc<EventBus>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that publishes each entry on `bus`.
    pub fn with_bus(bus: Arc<EventBus>) -> Self {
        Self {
            entries: Arc::default(),
            bus: Some(bus),
        }
    }

    pub fn append(&self, entry: LogEntry) {
        let node = entry.node_id.as_ref().map(NodeId::as_str).unwrap_or("-");
        match entry.severity {
            Severity::Error => error!(node, "{}", entry.message),
            Severity::Warning => warn!(node, "{}", entry.message),
            Severity::Running => debug!(node, "{}", entry.message),
            Severity::Info | Severity::Success => info!(node, "{}", entry.message),
        }

        if let Some(bus) = &self.bus {
            bus.publish(RunEvent::Log(entry.clone()));
        }
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    pub fn log(&self, severity: Severity, message: impl Into<String>) {
        self.append(LogEntry::new(severity, message));
    }

    pub fn node(&self, severity: Severity, node_id: &NodeId, message: impl Into<String>) {
        self.append(LogEntry::new(severity, message).for_node(node_id));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Severity::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(Severity::Warning, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(Severity::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Severity::Error, message);
    }

    /// Snapshot of all entries so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog")
            .field("entries", &self.len())
            .field("bus", &self.bus.is_some())
            .finish()
    }
}

/// JSONL run log writer.
///
/// Subscribes to the EventBus and writes structured entries as JSONL
/// (one JSON object per line), so a crashed process still leaves every
/// line written before it died.
pub struct RunLogWriter {
    log_dir: PathBuf,
}

/// A single line written to the JSONL file.
#[derive(Serialize)]
struct JsonlEntry {
    timestamp: String,
    run_id: String,
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogWriter {
    /// Logs are written to `{log_dir}/{run_id}/{timestamp}.jsonl`.
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    /// Subscribe now and write on a background task, so events published
    /// right after this call are not missed.
    pub fn spawn(
        self,
        event_bus: Arc<EventBus>,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<Option<PathBuf>> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.write(rx, run_id, cancel))
    }

    /// Writes until cancellation or RunComplete/RunFailed. Returns the path
    /// of the file written, if one was opened.
    async fn write(
        self,
        mut rx: broadcast::Receiver<RunEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> Option<PathBuf> {

        let run_dir = self.log_dir.join(&run_id.0);
        if let Err(e) = tokio::fs::create_dir_all(&run_dir).await {
            error!(error = %e, "Failed to create log directory");
            return None;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = run_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return None;
            }
        };

        info!(path = %log_path.display(), "RunLogWriter started");

        let mut writer = tokio::io::BufWriter::new(file);
        let rid = run_id.0.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogWriter cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let entry = match event_to_entry(&rid, &event) {
                                Some(e) => e,
                                None => continue,
                            };

                            if let Ok(json) = serde_json::to_string(&entry) {
                                let line = format!("{}\n", json);
                                if let Err(e) = writer.write_all(line.as_bytes()).await {
                                    error!(error = %e, "Failed to write log entry");
                                    break;
                                }
                                if let Err(e) = writer.flush().await {
                                    error!(error = %e, "Failed to flush log");
                                }
                            }

                            if matches!(event, RunEvent::RunComplete { .. } | RunEvent::RunFailed { .. }) {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "RunLogWriter lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, RunLogWriter stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogWriter finished");
        Some(log_path)
    }
}

/// Convert a RunEvent to a JSONL line (None for events not worth persisting).
fn event_to_entry(run_id: &str, event: &RunEvent) -> Option<JsonlEntry> {
    let ts = Utc::now().to_rfc3339();

    match event {
        RunEvent::RunStarted {
            run_id: engine_run,
            strategy,
        } => Some(JsonlEntry {
            timestamp: ts,
            run_id: run_id.to_string(),
            event_type: "run_started".to_string(),
            node_id: None,
            detail: Some(serde_json::json!({ "strategy": strategy, "engine_run_id": engine_run.0 })),
        }),
        RunEvent::Log(entry) => Some(JsonlEntry {
            timestamp: entry.timestamp.to_rfc3339(),
            run_id: run_id.to_string(),
            event_type: "log".to_string(),
            node_id: entry.node_id.as_ref().map(|n| n.0.clone()),
            detail: Some(serde_json::json!({
                "severity": entry.severity,
                "message": truncate_str(&entry.message, 2000),
            })),
        }),
        RunEvent::RunComplete {
            succeeded,
            total_elapsed_ms,
            ..
        } => Some(JsonlEntry {
            timestamp: ts,
            run_id: run_id.to_string(),
            event_type: "run_complete".to_string(),
            node_id: None,
            detail: Some(serde_json::json!({
                "succeeded": succeeded,
                "total_elapsed_ms": total_elapsed_ms,
            })),
        }),
        RunEvent::RunFailed { error, .. } => Some(JsonlEntry {
            timestamp: ts,
            run_id: run_id.to_string(),
            event_type: "run_failed".to_string(),
            node_id: None,
            detail: Some(serde_json::json!({ "error": error })),
        }),
        // Status changes are already covered by log entries.
        RunEvent::NodeStatus { .. } => None,
    }
}

/// Truncate a string for logging without splitting a character.
pub(crate) fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

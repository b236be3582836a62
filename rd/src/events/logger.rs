//! Audit logger - single writer, append-only JSONL
//!
//! Components publish through a cheap clonable handle backed by a bounded
//! channel; a background task owns the file. Emitting never blocks component
//! progress: if the channel is full or the sink is gone, the event is
//! dropped and a single stderr warning is printed per run.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::types::{ActionType, AuditEvent};
use crate::error::EngineError;

/// Channel depth before events start being dropped
const SINK_CAPACITY: usize = 1024;

/// Clonable handle for emitting audit events
#[derive(Clone)]
pub struct AuditLogger {
    run_id: String,
    tx: mpsc::Sender<AuditEvent>,
    warned: Arc<AtomicBool>,
}

impl AuditLogger {
    /// Emit one event. Never blocks, never fails the caller.
    pub fn emit(
        &self,
        task_id: Option<u32>,
        action_type: ActionType,
        action_payload: Option<serde_json::Value>,
    ) {
        let event = AuditEvent::new(&self.run_id, task_id, action_type, action_payload);
        if self.tx.try_send(event).is_err() {
            self.warn_once();
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn warn_once(&self) {
        if !self.warned.swap(true, Ordering::SeqCst) {
            eprintln!("warning: audit log sink unavailable; further events will be dropped");
        }
    }
}

/// Spawn the single writer task for a run's execution log
///
/// The file is opened eagerly so startup I/O errors surface before any
/// research work begins. The returned handle resolves once every sender
/// clone is dropped and the buffer is flushed.
pub fn spawn_audit_logger(
    log_path: &Path,
    run_id: &str,
) -> Result<(AuditLogger, JoinHandle<()>), EngineError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let (tx, rx) = mpsc::channel(SINK_CAPACITY);
    let warned = Arc::new(AtomicBool::new(false));

    let logger = AuditLogger {
        run_id: run_id.to_string(),
        tx,
        warned: Arc::clone(&warned),
    };
    debug!(?log_path, %run_id, "audit logger started");

    let join = tokio::spawn(write_loop(rx, file, warned));
    Ok((logger, join))
}

async fn write_loop(mut rx: mpsc::Receiver<AuditEvent>, file: File, warned: Arc<AtomicBool>) {
    let mut writer = BufWriter::new(file);
    while let Some(event) = rx.recv().await {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "audit event failed to serialize; dropped");
                continue;
            }
        };
        if writeln!(writer, "{line}").and_then(|_| writer.flush()).is_err()
            && !warned.swap(true, Ordering::SeqCst)
        {
            eprintln!("warning: audit log sink unavailable; further events will be dropped");
        }
    }
    let _ = writer.flush();
    debug!("audit logger drained");
}

/// Read all events back from an execution log
///
/// Unparseable lines are skipped with a warning so a partially corrupt log
/// still replays.
pub fn read_run_events(log_path: &Path) -> Result<Vec<AuditEvent>, EngineError> {
    if !log_path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(log_path)?;
    let mut events = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(line, error = %e, "skipping unparseable audit line"),
        }
    }
    Ok(events)
}

//! Signal-triggered exporter.
//!
//! Runs on its own thread in state [`ExporterState::Armed`] until the trigger
//! channel delivers. It then stops the sampler, reads the latest snapshot and
//! archive, renders the recent window to the graph file and reports. Only the
//! first trigger is honoured; the exporter thread ends after it.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::collector::{Clock, Shared};
use crate::fmt::FmtStyle;
use crate::graph::GraphRenderer;
use crate::storage::{Snapshot, StoreInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterState {
    Armed,
    Triggered,
    Terminated,
}

/// What the export produced.
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub snapshot: Option<Arc<Snapshot>>,
    pub info: StoreInfo,
    /// Graph file written, or why it was not.
    pub graph: Result<PathBuf, String>,
}

impl fmt::Display for ExportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.snapshot {
            Some(s) => writeln!(
                f,
                "Latest snapshot at {}: {}",
                crate::fmt::format_timestamp(Some(s.captured_at)),
                s.summary(FmtStyle::Detail)
            )?,
            None => writeln!(f, "No snapshot captured")?,
        }
        write!(f, "{}", self.info)?;
        match &self.graph {
            Ok(path) => writeln!(f, "Graph written to {}", path.display()),
            Err(e) => writeln!(f, "Graph not written: {}", e),
        }
    }
}

pub struct Exporter {
    shared: Arc<Shared>,
    renderer: Box<dyn GraphRenderer>,
    clock: Arc<dyn Clock>,
    graph_path: PathBuf,
    window: Duration,
}

pub struct ExporterHandle {
    state: Arc<Mutex<ExporterState>>,
    thread: JoinHandle<Option<ExportReport>>,
}

impl ExporterHandle {
    pub fn state(&self) -> ExporterState {
        *self.state.lock()
    }

    /// Waits for the exporter. `None` if it was never triggered.
    pub fn join(self) -> Option<ExportReport> {
        self.thread.join().unwrap_or_else(|_| {
            error!("Exporter thread panicked");
            None
        })
    }
}

impl Exporter {
    pub fn new(
        shared: Arc<Shared>,
        renderer: Box<dyn GraphRenderer>,
        clock: Arc<dyn Clock>,
        graph_path: impl Into<PathBuf>,
        window: Duration,
    ) -> Self {
        Self {
            shared,
            renderer,
            clock,
            graph_path: graph_path.into(),
            window,
        }
    }

    /// Starts the watcher thread.
    ///
    /// On the first message from `trigger`, `stop` is raised and the export
    /// runs. If every sender is dropped first, the thread ends without
    /// exporting.
    pub fn spawn(self, trigger: Receiver<()>, stop: Arc<AtomicBool>) -> std::io::Result<ExporterHandle> {
        let state = Arc::new(Mutex::new(ExporterState::Armed));
        let thread_state = state.clone();
        let thread = thread::Builder::new()
            .name("exporter".to_string())
            .spawn(move || {
                if trigger.recv().is_err() {
                    debug!("Exporter disarmed without trigger");
                    *thread_state.lock() = ExporterState::Terminated;
                    return None;
                }
                *thread_state.lock() = ExporterState::Triggered;
                stop.store(true, Ordering::SeqCst);
                info!("Export triggered");

                let report = self.export();
                *thread_state.lock() = ExporterState::Terminated;
                Some(report)
            })?;
        Ok(ExporterHandle { state, thread })
    }

    /// Reads shared state and writes the graph file.
    pub fn export(&self) -> ExportReport {
        let snapshot = self.shared.latest();
        let (info, rendered) = {
            let store = self.shared.store();
            let to = store.last_update().unwrap_or_else(|| self.clock.unix_now());
            let from = to - self.window.as_secs().max(1) as i64;
            (store.info(), store.render(from, to, self.renderer.as_ref()))
        };

        let graph = rendered
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                fs::write(&self.graph_path, bytes)
                    .map(|()| self.graph_path.clone())
                    .map_err(|e| format!("{}: {}", self.graph_path.display(), e))
            });
        match &graph {
            Ok(path) => info!("Graph written to {}", path.display()),
            Err(e) => error!("Graph export failed: {}", e),
        }

        ExportReport {
            snapshot,
            info,
            graph,
        }
    }
}

//! Staged progress reporting
//!
//! The engine emits discrete lifecycle events over a channel; a UI layer
//! owns presentation. Events are transient and never persisted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Export lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    /// Checkpointing and snapshotting the live store
    Preparing,
    /// Writing the archive file
    Copying,
    /// Re-parsing the written archive
    Verifying,
    /// Archive in place at its final path
    Complete,
}

impl ExportStage {
    /// Get display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Preparing => "Preparing Export",
            Self::Copying => "Writing Archive",
            Self::Verifying => "Verifying Archive",
            Self::Complete => "Export Complete",
        }
    }
}

/// Import lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    /// Extracting and unlocking the archive payload
    Preparing,
    /// Copying rows into the live store
    Copying,
    /// Committing and cleaning up
    Finalizing,
    /// Import finished
    Complete,
}

impl ImportStage {
    /// Get display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Preparing => "Preparing Import",
            Self::Copying => "Copying Tables",
            Self::Finalizing => "Finalizing Import",
            Self::Complete => "Import Complete",
        }
    }
}

/// A progress event pushed to the UI collaborator
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Export entered a new stage
    Export {
        /// The stage entered
        stage: ExportStage,
    },
    /// Import entered a new stage
    Import {
        /// The stage entered
        stage: ImportStage,
    },
    /// A batch of rows finished copying. Fired between batches, never
    /// per-row.
    TableProgress {
        /// Table being copied
        table: String,
        /// Rows copied so far
        current: u64,
        /// Total rows in the table
        total: u64,
    },
}

/// Sending half of the progress channel. A disabled sender silently drops
/// events, as does a sender whose receiver has gone away.
#[derive(Clone)]
pub struct ProgressSender {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressSender {
    /// Create a connected sender/receiver pair
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Create a sender with no consumer
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit an event. Delivery is best-effort.
    pub fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Cancellation flag for an in-flight import. Honored immediately before
/// the exclusive transaction starts; once copying begins, the transaction
/// always runs to commit or rollback.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a new, uncancelled flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

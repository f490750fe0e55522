//! Ambience daemon library
//!
//! Configuration, music rotation and output wiring for the
//! `ambience-daemon` binary.

pub mod config;
pub mod error;
pub mod rotation;

use crate::config::{OutputSettings, OutputTarget};
use crate::error::{DaemonError, Result};
use ambience_playback::{AudioOutput, NullOutput, WriterOutput};
use std::fs::File;
use std::io::BufWriter;
use tokio::task::JoinHandle;
use tracing::warn;

/// Open the PCM sink described by `settings`
pub fn open_output(settings: &OutputSettings) -> Result<Box<dyn AudioOutput>> {
    match settings.target {
        OutputTarget::Stdout => Ok(Box::new(WriterOutput::new(std::io::stdout()))),
        OutputTarget::File => {
            let path = settings
                .path
                .as_ref()
                .ok_or_else(|| DaemonError::Config("output.path is not set".to_string()))?;
            let file = File::create(path)?;
            Ok(Box::new(WriterOutput::new(BufWriter::new(file))))
        }
        OutputTarget::Null => Ok(Box::new(NullOutput)),
    }
}

/// Wait for named background tasks, logging any that panicked or were aborted
///
/// Returns how many ended abnormally.
pub async fn join_tasks(tasks: Vec<(&'static str, JoinHandle<()>)>) -> usize {
    let mut failed = 0;
    for (name, handle) in tasks {
        if let Err(e) = handle.await {
            warn!(task = name, "Task ended abnormally: {}", e);
            failed += 1;
        }
    }
    failed
}

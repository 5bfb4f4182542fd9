//! Line-oriented output sinks for machine and process logs.

use crate::RuntimeError;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// A sink accepting output one line at a time.
pub trait LineConsumer: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), RuntimeError>;

    /// Release underlying resources. Lines written afterwards are rejected or dropped.
    fn close(&self) {}
}

pub type SharedConsumer = Arc<dyn LineConsumer>;

/// Appends lines to a file, creating parent directories on open.
pub struct FileLineConsumer {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileLineConsumer {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RuntimeError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LineConsumer for FileLineConsumer {
    fn write_line(&self, line: &str) -> Result<(), RuntimeError> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        let writer = guard.as_mut().ok_or_else(|| {
            RuntimeError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("log {} is closed", self.path.display()),
            ))
        })?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut guard) = self.writer.lock() {
            if let Some(mut writer) = guard.take() {
                if let Err(e) = writer.flush() {
                    warn!("failed to flush log {}: {e}", self.path.display());
                }
            }
        }
    }
}

/// Fans each line out to several consumers.
///
/// A failing consumer does not prevent delivery to the others.
pub struct CompositeLineConsumer {
    consumers: Vec<SharedConsumer>,
}

impl CompositeLineConsumer {
    pub fn new(consumers: Vec<SharedConsumer>) -> Self {
        Self { consumers }
    }
}

impl LineConsumer for CompositeLineConsumer {
    fn write_line(&self, line: &str) -> Result<(), RuntimeError> {
        for consumer in &self.consumers {
            if let Err(e) = consumer.write_line(line) {
                warn!("log consumer rejected line: {e}");
            }
        }
        Ok(())
    }

    fn close(&self) {
        for consumer in &self.consumers {
            consumer.close();
        }
    }
}

/// Forwards lines to a live listener. A disconnected listener is ignored.
pub struct ChannelLineConsumer {
    sender: Sender<String>,
}

impl ChannelLineConsumer {
    pub fn new(sender: Sender<String>) -> Self {
        Self { sender }
    }
}

impl LineConsumer for ChannelLineConsumer {
    fn write_line(&self, line: &str) -> Result<(), RuntimeError> {
        if self.sender.send(line.to_owned()).is_err() {
            debug!("live listener disconnected, dropping line");
        }
        Ok(())
    }
}

pub struct NullLineConsumer;

impl LineConsumer for NullLineConsumer {
    fn write_line(&self, _line: &str) -> Result<(), RuntimeError> {
        Ok(())
    }
}

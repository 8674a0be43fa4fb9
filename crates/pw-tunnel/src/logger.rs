//! Diagnostic line sinks for tunnel sessions
//!
//! The surrounding environment hands a [`SessionLogger`] to each session.
//! The session keeps it in a [`LogSink`] that is attached on connect and
//! detached on close, and shares clones of the sink with the transport so
//! transport-side diagnostics land in the same place.

use std::io::Write;
use std::sync::{Arc, Mutex, RwLock};

/// Prefix added to every line so operators can tell manager output apart
/// from the task's own output
pub const LOG_PREFIX: &str = "[PortForwarding] ";

/// Line-based text sink provided by the surrounding environment
pub trait SessionLogger: Send + Sync {
    /// Write one complete line
    fn write(&self, line: &str);
}

/// Forwards lines to `tracing` at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl SessionLogger for TracingLogger {
    fn write(&self, line: &str) {
        tracing::info!(target: "portwrap", "{}", line);
    }
}

/// Writes lines to any `io::Write`, such as stderr or a task console
pub struct WriterLogger<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterLogger<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl WriterLogger<std::io::Stderr> {
    /// Logger writing to the process's stderr
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> SessionLogger for WriterLogger<W> {
    fn write(&self, line: &str) {
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };
        // A broken console must not take the session down with it
        let _ = writeln!(writer, "{}", line).and_then(|_| writer.flush());
    }
}

/// Collects lines in memory
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogger {
    /// Create an empty logger
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines written so far
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Number of lines containing `needle`
    pub fn count_containing(&self, needle: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(needle)).count()
    }
}

impl SessionLogger for MemoryLogger {
    fn write(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

/// Per-session slot holding the logger currently receiving diagnostics.
///
/// Clones share the slot. Once [`LogSink::detach`] is called, every clone
/// (including those held by background forwarding tasks) stops writing and
/// drops its reference to the logger.
#[derive(Clone, Default)]
pub struct LogSink {
    target: Arc<RwLock<Option<Arc<dyn SessionLogger>>>>,
}

impl LogSink {
    /// Create a detached sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Route lines to `logger`
    pub fn attach(&self, logger: Arc<dyn SessionLogger>) {
        if let Ok(mut target) = self.target.write() {
            *target = Some(logger);
        }
    }

    /// Stop routing lines and release the logger
    pub fn detach(&self) {
        if let Ok(mut target) = self.target.write() {
            *target = None;
        }
    }

    /// Whether a logger is currently attached
    pub fn is_attached(&self) -> bool {
        self.target.read().map(|t| t.is_some()).unwrap_or(false)
    }

    /// Write a prefixed line to the attached logger, if any
    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!("{}", message);

        let logger = match self.target.read() {
            Ok(target) => target.clone(),
            Err(_) => None,
        };
        if let Some(logger) = logger {
            logger.write(&format!("{}{}", LOG_PREFIX, message));
        }
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("attached", &self.is_attached())
            .finish()
    }
}

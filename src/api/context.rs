//! Per-run context.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::{Result, TagflowError};

/// Shared cooperative cancellation flag.
///
/// Cloning shares the flag. Steps check it between remote calls and the
/// runner checks it before starting a step; nothing already written is
/// rolled back.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TagflowError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Where dry-run renderings are written.
#[derive(Clone, Default)]
pub enum DiagnosticSink {
    #[default]
    Stdout,
    /// Collects output in memory.
    Buffer(Arc<Mutex<Vec<u8>>>),
}

impl DiagnosticSink {
    /// A sink that keeps everything written to it.
    pub fn buffer() -> Self {
        DiagnosticSink::Buffer(Arc::new(Mutex::new(Vec::new())))
    }

    /// Write one document followed by a newline.
    pub fn emit(&self, document: &str) -> io::Result<()> {
        match self {
            DiagnosticSink::Stdout => {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                writeln!(handle, "{}", document)
            }
            DiagnosticSink::Buffer(buf) => {
                let mut buf = buf.lock().unwrap_or_else(|p| p.into_inner());
                writeln!(buf, "{}", document)
            }
        }
    }

    /// Everything written so far; empty for stdout.
    pub fn contents(&self) -> String {
        match self {
            DiagnosticSink::Stdout => String::new(),
            DiagnosticSink::Buffer(buf) => {
                let buf = buf.lock().unwrap_or_else(|p| p.into_inner());
                String::from_utf8_lossy(&buf).into_owned()
            }
        }
    }
}

impl fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticSink::Stdout => f.write_str("Stdout"),
            DiagnosticSink::Buffer(_) => f.write_str("Buffer"),
        }
    }
}

/// Settings that identify one pipeline run.
///
/// Built once, wrapped in an `Arc`, and handed to every step constructor.
/// Nothing in it changes during the run; the cancellation token is a shared
/// signal, not step-owned state.
#[derive(Debug, Clone)]
pub struct RunContext {
    namespace: String,
    run_id: String,
    cancel: CancellationToken,
    diagnostics: DiagnosticSink,
}

impl RunContext {
    pub fn new(namespace: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            run_id: run_id.into(),
            cancel: CancellationToken::new(),
            diagnostics: DiagnosticSink::default(),
        }
    }

    /// Use a run id derived from the current time.
    pub fn with_generated_id(namespace: impl Into<String>) -> Self {
        Self::new(namespace, generate_run_id())
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticSink) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Namespace steps write to unless configured otherwise.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn diagnostics(&self) -> &DiagnosticSink {
        &self.diagnostics
    }
}

/// `run_{millis}` from the wall clock.
pub fn generate_run_id() -> String {
    format!("run_{}", Utc::now().timestamp_millis())
}

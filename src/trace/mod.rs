use anyhow::{Result, anyhow, bail};
use std::env;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

const APP_DIR: &str = "offline-fc";
const TRACES_DIR: &str = "traces";
const EMPTY_MARKER: &str = "<empty>";

/// What a trace line records. The label is padded to a fixed width in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    UserInput,
    ModelReply,
    SandboxCode,
    SandboxOutput,
    SandboxError,
    HttpRequest,
    HttpResponse,
    HttpError,
    Session,
    Calls,
}

impl TraceKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::UserInput => "user.in",
            Self::ModelReply => "model.out",
            Self::SandboxCode => "sbx.code",
            Self::SandboxOutput => "sbx.out",
            Self::SandboxError => "sbx.err",
            Self::HttpRequest => "http.in",
            Self::HttpResponse => "http.out",
            Self::HttpError => "http.err",
            Self::Session => "session",
            Self::Calls => "calls",
        }
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<9}", self.label())
    }
}

/// Append-only per-session log file. Cloning shares the same file.
#[derive(Clone)]
pub struct SessionTrace {
    shared: Arc<TraceFile>,
}

struct TraceFile {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    warned: AtomicBool,
}

impl SessionTrace {
    pub fn create(session_id: &str) -> Result<Self> {
        let dir = trace_dir(
            env::var("XDG_STATE_HOME").ok().as_deref(),
            dirs::home_dir().as_deref(),
        )?;
        Self::open_in(&dir, session_id)
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn create_in_temp_dir(session_id: &str, dir: &Path) -> Result<Self> {
        Self::open_in(dir, session_id)
    }

    fn open_in(dir: &Path, session_id: &str) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|err| {
            anyhow!("Failed to create trace directory {}: {err}", dir.display())
        })?;

        let started = OffsetDateTime::now_utc().unix_timestamp();
        let path = dir.join(format!("session-{session_id}-{started}.log"));
        let file = open_owner_only(&path)
            .map_err(|err| anyhow!("Failed to create trace file {}: {err}", path.display()))?;

        Ok(Self {
            shared: Arc::new(TraceFile {
                path,
                writer: Mutex::new(BufWriter::new(file)),
                warned: AtomicBool::new(false),
            }),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.shared.path
    }

    pub fn log_user_input(&self, text: &str) {
        self.record(TraceKind::UserInput, text);
    }

    pub fn log_model_reply(&self, text: &str) {
        self.record(TraceKind::ModelReply, text);
    }

    pub fn log_sandbox_code(&self, code: &str) {
        self.record(TraceKind::SandboxCode, code);
    }

    /// Stdout is always recorded; stderr only when the run produced some.
    pub fn log_sandbox_result(&self, output: &str, error: &str) {
        self.record(TraceKind::SandboxOutput, output);
        if !error.is_empty() {
            self.record(TraceKind::SandboxError, error);
        }
    }

    pub fn log_event(&self, kind: TraceKind, text: &str) {
        self.record(kind, text);
    }

    /// Records one side of an HTTP exchange: a start line, header lines, then the body.
    pub fn log_http(&self, kind: TraceKind, start_line: &str, headers: &[String], body: &str) {
        let mut block = String::new();
        append_line(&mut block, kind, start_line);
        for header in headers {
            append_line(&mut block, kind, header);
        }
        append_text(&mut block, kind, body);
        self.write_block(&block);
    }

    /// Appends every line of `text` under `kind`, or an `<empty>` marker.
    pub fn record(&self, kind: TraceKind, text: &str) {
        let mut block = String::new();
        append_text(&mut block, kind, text);
        self.write_block(&block);
    }

    fn write_block(&self, block: &str) {
        let written = match self.shared.writer.lock() {
            Ok(mut writer) => writer
                .write_all(block.as_bytes())
                .and_then(|()| writer.flush())
                .map_err(|err| err.to_string()),
            Err(_) => Err("trace writer lock poisoned".to_string()),
        };

        let Err(reason) = written else {
            return;
        };
        if !self.shared.warned.swap(true, Ordering::Relaxed) {
            eprintln!(
                "offline-fc trace warning: cannot write {}: {reason}",
                self.shared.path.display()
            );
        }
    }
}

fn append_text(block: &mut String, kind: TraceKind, text: &str) {
    if text.is_empty() {
        append_line(block, kind, EMPTY_MARKER);
        return;
    }
    for line in text.lines() {
        append_line(block, kind, line);
    }
}

fn append_line(block: &mut String, kind: TraceKind, line: &str) {
    block.push_str(&format!("[{}] [{kind}] {line}\n", timestamp()));
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.millisecond()
    )
}

#[cfg(unix)]
fn open_owner_only(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_owner_only(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
}

/// `$XDG_STATE_HOME/offline-fc/traces`, falling back to `~/.local/state/offline-fc/traces`.
fn trace_dir(xdg_state_home: Option<&str>, home: Option<&Path>) -> Result<PathBuf> {
    let base = match xdg_state_home.map(str::trim) {
        Some("") => bail!("Failed to resolve trace path: XDG_STATE_HOME is set but empty"),
        Some(xdg) => PathBuf::from(xdg),
        None => home
            .ok_or_else(|| anyhow!("Failed to resolve trace path: HOME directory is unavailable"))?
            .join(".local")
            .join("state"),
    };
    Ok(base.join(APP_DIR).join(TRACES_DIR))
}

//! Sandbox control interface.
//!
//! A sandbox is started once per session, runs code snippets against a
//! persistent interpreter state, and is stopped on exit. Two backends exist:
//!
//! - [`MicrosandboxClient`] speaks JSON-RPC to a microsandbox server, which
//!   owns isolation and resource limits;
//! - [`LocalInterpreter`] runs code in an embedded CPython with no isolation
//!   at all, for offline development.

mod local;
mod microsandbox;

pub use local::LocalInterpreter;
pub use microsandbox::{MicrosandboxClient, MicrosandboxSettings};

use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    status: String,
    stdout: String,
    stderr: String,
    has_error: bool,
}

impl Execution {
    pub fn new(
        status: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        has_error: bool,
    ) -> Self {
        Self {
            status: status.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
            has_error,
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn output(&self) -> &str {
        &self.stdout
    }

    pub fn error(&self) -> &str {
        &self.stderr
    }

    pub fn has_error(&self) -> bool {
        self.has_error || !self.stderr.is_empty()
    }

    /// True only when the code itself failed. Warnings on stderr do not count.
    pub fn raised(&self) -> bool {
        self.has_error || self.status == "error"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    NotStarted,
    HttpStatus { status: u16, body: String },
    Transport(String),
    Rpc { code: i64, message: String },
    Parse(String),
    Interpreter(String),
}

impl Display for SandboxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "sandbox is not started"),
            Self::HttpStatus { status, body } => {
                write!(f, "sandbox request failed with status {status}: {body}")
            }
            Self::Transport(msg) => write!(f, "sandbox transport error: {msg}"),
            Self::Rpc { code, message } => write!(f, "sandbox rpc error {code}: {message}"),
            Self::Parse(msg) => write!(f, "sandbox response parse error: {msg}"),
            Self::Interpreter(msg) => write!(f, "local interpreter error: {msg}"),
        }
    }
}

impl Error for SandboxError {}

pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

pub trait Sandbox {
    fn start(&mut self) -> impl std::future::Future<Output = SandboxResult<()>> + Send;

    fn run(
        &self,
        code: &str,
    ) -> impl std::future::Future<Output = SandboxResult<Execution>> + Send;

    fn stop(&mut self) -> impl std::future::Future<Output = SandboxResult<()>> + Send;
}

/// Backend picked at startup from configuration.
pub enum SandboxBackend {
    Microsandbox(MicrosandboxClient),
    Local(LocalInterpreter),
}

impl SandboxBackend {
    pub fn describe(&self) -> String {
        match self {
            Self::Microsandbox(client) => format!("microsandbox at {}", client.server_url()),
            Self::Local(_) => "local interpreter (not isolated)".to_string(),
        }
    }
}

impl Sandbox for SandboxBackend {
    async fn start(&mut self) -> SandboxResult<()> {
        match self {
            Self::Microsandbox(client) => client.start().await,
            Self::Local(interpreter) => interpreter.start().await,
        }
    }

    async fn run(&self, code: &str) -> SandboxResult<Execution> {
        match self {
            Self::Microsandbox(client) => client.run(code).await,
            Self::Local(interpreter) => interpreter.run(code).await,
        }
    }

    async fn stop(&mut self) -> SandboxResult<()> {
        match self {
            Self::Microsandbox(client) => client.stop().await,
            Self::Local(interpreter) => interpreter.stop().await,
        }
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::{Execution, Sandbox, SandboxError, SandboxResult};
use crate::http::client::HttpClient;

const RPC_PATH: &str = "/api/v1/rpc";
const ERROR_BODY_MAX_CHARS: usize = 400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicrosandboxSettings {
    pub server_url: String,
    pub api_key: Option<String>,
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub memory_mib: u32,
    pub cpus: u32,
}

/// JSON-RPC client for a single named python sandbox on a microsandbox
/// server.
#[derive(Debug, Clone)]
pub struct MicrosandboxClient {
    http: HttpClient,
    settings: MicrosandboxSettings,
    started: bool,
}

impl MicrosandboxClient {
    pub fn new(http: HttpClient, mut settings: MicrosandboxSettings) -> Self {
        settings.server_url = settings.server_url.trim_end_matches('/').to_string();
        Self {
            http,
            settings,
            started: false,
        }
    }

    pub fn server_url(&self) -> &str {
        &self.settings.server_url
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    async fn call(&self, method: &str, params: Value) -> SandboxResult<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: Uuid::new_v4().to_string(),
        };
        let resp = self
            .http
            .post_json(
                &format!("{}{RPC_PATH}", self.settings.server_url),
                self.settings.api_key.as_deref(),
                &request,
            )
            .await
            .map_err(|err| SandboxError::Transport(err.to_string()))?;

        if resp.status != 200 {
            let body = resp.body.chars().take(ERROR_BODY_MAX_CHARS).collect::<String>();
            return Err(SandboxError::HttpStatus {
                status: resp.status,
                body,
            });
        }

        let parsed = serde_json::from_str::<RpcResponse>(&resp.body)
            .map_err(|err| SandboxError::Parse(err.to_string()))?;
        if let Some(error) = parsed.error {
            return Err(SandboxError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(parsed.result.unwrap_or(Value::Null))
    }

    fn sandbox_params(&self) -> Value {
        json!({
            "sandbox": self.settings.name,
            "namespace": self.settings.namespace,
        })
    }
}

impl Sandbox for MicrosandboxClient {
    async fn start(&mut self) -> SandboxResult<()> {
        let mut params = self.sandbox_params();
        params["config"] = json!({
            "image": self.settings.image,
            "memory": self.settings.memory_mib,
            "cpus": self.settings.cpus,
        });

        self.call("sandbox.start", params).await?;
        self.started = true;
        Ok(())
    }

    async fn run(&self, code: &str) -> SandboxResult<Execution> {
        if !self.started {
            return Err(SandboxError::NotStarted);
        }

        let mut params = self.sandbox_params();
        params["language"] = json!("python");
        params["code"] = json!(code);

        let result = self.call("sandbox.repl.run", params).await?;
        let raw = serde_json::from_value::<RawExecution>(result)
            .map_err(|err| SandboxError::Parse(err.to_string()))?;
        Ok(raw.into_execution())
    }

    async fn stop(&mut self) -> SandboxResult<()> {
        if !self.started {
            return Ok(());
        }

        self.call("sandbox.stop", self.sandbox_params()).await?;
        self.started = false;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawExecution {
    status: Option<String>,
    has_error: bool,
    output: Vec<RawOutputLine>,
}

#[derive(Debug, Deserialize)]
struct RawOutputLine {
    stream: String,
    #[serde(default)]
    text: String,
}

impl RawExecution {
    fn into_execution(self) -> Execution {
        let stdout = self.stream_text("stdout");
        let stderr = self.stream_text("stderr");
        Execution::new(
            self.status.unwrap_or_else(|| "unknown".to_string()),
            stdout,
            stderr,
            self.has_error,
        )
    }

    fn stream_text(&self, stream: &str) -> String {
        self.output
            .iter()
            .filter(|line| line.stream == stream)
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub mod agent;
pub mod blocks;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod http;
pub mod llm;
pub mod sandbox;
pub mod session;
pub mod trace;

use agent::RunConfig;
use anyhow::{Result, anyhow};
use cli::{CliArgs, render_answer, run_repl};
use config::{AppConfig, BackendKind};
use http::client::HttpClient;
use http::debug::HttpDebugConfig;
use llm::ollama::{OllamaProvider, SamplingOptions};
use llm::provider::LlmProvider;
use sandbox::{
    LocalInterpreter, MicrosandboxClient, MicrosandboxSettings, Sandbox, SandboxBackend,
};
use session::Session;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use trace::{SessionTrace, TraceKind};

pub async fn run(args: CliArgs) -> Result<()> {
    let mut config = AppConfig::load_with_path(args.config.as_deref())?;
    args.apply_overrides(&mut config);

    let session_id = generate_session_id();
    let trace = SessionTrace::create(&session_id)?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(|err| anyhow!("Failed to build HTTP client: {err}"))?;
    let http = HttpClient::new(client, HttpDebugConfig::from_verbose(args.verbose))
        .with_trace(trace.clone());

    let provider = OllamaProvider::new(
        http.clone(),
        config.ollama_base_url.clone(),
        config.model.clone(),
        SamplingOptions {
            num_ctx: config.num_ctx,
            top_p: config.top_p,
        },
    );
    let backend = build_backend(&config, http);
    trace.log_event(
        TraceKind::Session,
        &format!(
            "model {} via {}; sandbox {}",
            config.model,
            config.ollama_base_url,
            backend.describe()
        ),
    );
    if config.sandbox.backend == BackendKind::Local {
        eprintln!("warning: the local backend runs model code in this process without isolation");
    }

    let mut session = Session::open(
        provider,
        backend,
        RunConfig {
            max_rounds: config.max_rounds,
        },
        trace,
        config.preamble_file.as_deref(),
    )
    .await?;

    let outcome = match args.task.as_deref() {
        Some(task) => run_one_shot(&mut session, task).await,
        None => run_repl(&mut session).await,
    };
    let closed = session.close().await;

    outcome?;
    closed
}

async fn run_one_shot<P: LlmProvider, S: Sandbox>(
    session: &mut Session<P, S>,
    task: &str,
) -> Result<()> {
    let answer = session.ask(task).await?;
    println!("{}", render_answer(&answer));
    Ok(())
}

fn build_backend(config: &AppConfig, http: HttpClient) -> SandboxBackend {
    match config.sandbox.backend {
        BackendKind::Microsandbox => SandboxBackend::Microsandbox(MicrosandboxClient::new(
            http,
            MicrosandboxSettings {
                server_url: config.sandbox.server_url.clone(),
                api_key: config.sandbox.api_key.clone(),
                name: config.sandbox.name.clone(),
                namespace: config.sandbox.namespace.clone(),
                image: config.sandbox.image.clone(),
                memory_mib: config.sandbox.memory_mib,
                cpus: config.sandbox.cpus,
            },
        )),
        BackendKind::Local => SandboxBackend::Local(LocalInterpreter::new()),
    }
}

fn generate_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis());
    format!("{millis:x}-{:x}", std::process::id())
}

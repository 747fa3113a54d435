use anyhow::{Result, anyhow, bail};
use std::fs;
use std::path::Path;

use crate::agent::prompt::{WEATHER_FUNCTION_CODE, seed_prompts};
use crate::agent::{RunConfig, TaskAnswer, TaskEvent, run_task};
use crate::conversation::Transcript;
use crate::llm::provider::LlmProvider;
use crate::sandbox::Sandbox;
use crate::trace::{SessionTrace, TraceKind};

/// One started sandbox plus the conversation that drives it.
pub struct Session<P, S> {
    provider: P,
    sandbox: S,
    transcript: Transcript,
    seed_len: usize,
    run_config: RunConfig,
    trace: SessionTrace,
}

impl<P: LlmProvider, S: Sandbox> Session<P, S> {
    /// Starts the sandbox, installs the preamble and seeds the transcript.
    /// The sandbox is stopped again if any step after `start` fails.
    pub async fn open(
        provider: P,
        mut sandbox: S,
        run_config: RunConfig,
        trace: SessionTrace,
        preamble_file: Option<&Path>,
    ) -> Result<Self> {
        sandbox
            .start()
            .await
            .map_err(|err| anyhow!("Failed to start sandbox: {err}"))?;
        trace.log_event(TraceKind::Session, "sandbox started");

        let mut session = Self {
            provider,
            sandbox,
            transcript: Transcript::new(),
            seed_len: 0,
            run_config,
            trace,
        };

        if let Err(err) = session.prepare(preamble_file).await {
            session.trace.log_event(TraceKind::Session, &format!("setup failed: {err}"));
            if let Err(stop_err) = session.sandbox.stop().await {
                eprintln!("warning: failed to stop sandbox: {stop_err}");
            }
            return Err(err);
        }

        Ok(session)
    }

    async fn prepare(&mut self, preamble_file: Option<&Path>) -> Result<()> {
        self.run_preamble("built-in functions", WEATHER_FUNCTION_CODE)
            .await?;

        if let Some(path) = preamble_file {
            let source = fs::read_to_string(path).map_err(|err| {
                anyhow!(
                    "Failed to load preamble file {}: unable to read file: {err}",
                    path.display()
                )
            })?;
            self.run_preamble(&format!("preamble file {}", path.display()), &source)
                .await?;
        }

        for prompt in seed_prompts() {
            self.transcript.push_user(prompt)?;
        }
        self.seed_len = self.transcript.len();
        Ok(())
    }

    async fn run_preamble(&self, label: &str, code: &str) -> Result<()> {
        self.trace.log_sandbox_code(code);
        let execution = self
            .sandbox
            .run(code)
            .await
            .map_err(|err| anyhow!("Failed to install {label}: {err}"))?;
        self.trace
            .log_sandbox_result(execution.output(), execution.error());

        if execution.raised() {
            bail!("Failed to install {label}:\n{}", execution.error());
        }
        Ok(())
    }

    pub async fn ask(&mut self, task: &str) -> Result<TaskAnswer> {
        self.trace.log_user_input(task);
        let trace = &self.trace;
        let answer = run_task(
            &self.provider,
            &self.sandbox,
            &mut self.transcript,
            task,
            &self.run_config,
            &mut |event| {
                record_event(trace, &event);
                if let Some(line) = describe_event(&event) {
                    eprintln!("{line}");
                }
            },
        )
        .await?;

        if answer.exhausted {
            trace.log_event(
                TraceKind::Session,
                &format!("round limit {} reached", self.run_config.max_rounds),
            );
        }
        Ok(answer)
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Drops everything after the seeded prompts.
    pub fn reset(&mut self) {
        self.transcript.truncate_to(self.seed_len);
        self.trace.log_event(TraceKind::Session, "conversation reset");
    }

    pub fn max_rounds(&self) -> usize {
        self.run_config.max_rounds
    }

    pub fn set_max_rounds(&mut self, max_rounds: usize) {
        self.run_config.max_rounds = max_rounds;
    }

    pub fn trace(&self) -> &SessionTrace {
        &self.trace
    }

    pub async fn close(mut self) -> Result<()> {
        self.sandbox
            .stop()
            .await
            .map_err(|err| anyhow!("Failed to stop sandbox: {err}"))?;
        self.trace.log_event(TraceKind::Session, "sandbox stopped");
        Ok(())
    }
}

fn record_event(trace: &SessionTrace, event: &TaskEvent) {
    match event {
        TaskEvent::ModelReply { text, .. } => trace.log_model_reply(text),
        TaskEvent::CallsExtracted { round, calls } => {
            trace.log_event(TraceKind::Calls, &format!("round {round}: {} call(s)", calls.len()));
        }
        TaskEvent::CallFinished { outcome, .. } => {
            trace.log_sandbox_code(&outcome.code);
            trace.log_sandbox_result(outcome.execution.output(), outcome.execution.error());
        }
    }
}

pub(crate) fn describe_event(event: &TaskEvent) -> Option<String> {
    match event {
        TaskEvent::ModelReply { .. } => None,
        TaskEvent::CallsExtracted { round, calls } => Some(format!(
            "[round {round}] running {} function call(s)",
            calls.len()
        )),
        TaskEvent::CallFinished {
            round,
            index,
            outcome,
        } => {
            let first_line = outcome.code.lines().next().unwrap_or("").trim();
            let status = if outcome.execution.has_error() {
                "error"
            } else {
                "ok"
            };
            Some(format!("[round {round}] {}. {first_line} -> {status}", index + 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Session, describe_event};
    use crate::agent::RunConfig;
    use crate::agent::TaskEvent;
    use crate::agent::dispatch::CallOutcome;
    use crate::agent::fakes::{FakeProvider, FakeSandbox};
    use crate::agent::prompt::{DISCOVERY_PROMPT, INSTRUCTION_PROMPT, WEATHER_FUNCTION_CODE};
    use crate::sandbox::{Execution, SandboxError};
    use crate::trace::SessionTrace;
    use std::fs;
    use tempfile::tempdir;

    fn trace(dir: &std::path::Path) -> SessionTrace {
        SessionTrace::create_in_temp_dir("test", dir).expect("trace")
    }

    #[tokio::test]
    async fn open_installs_preamble_and_seeds_prompts() {
        let dir = tempdir().expect("tempdir");
        let session = Session::open(
            FakeProvider::replies(&[]),
            FakeSandbox::default(),
            RunConfig::default(),
            trace(dir.path()),
            None,
        )
        .await
        .expect("open");

        assert_eq!(session.sandbox.ran(), vec![WEATHER_FUNCTION_CODE.to_string()]);
        let contents = session
            .transcript()
            .messages()
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec![INSTRUCTION_PROMPT, DISCOVERY_PROMPT]);
    }

    #[tokio::test]
    async fn open_runs_configured_preamble_file_after_builtin() {
        let dir = tempdir().expect("tempdir");
        let preamble = dir.path().join("functions.py");
        fs::write(&preamble, "def greet(name):\n    return f'hi {name}'\n").expect("write");

        let session = Session::open(
            FakeProvider::replies(&[]),
            FakeSandbox::default(),
            RunConfig::default(),
            trace(dir.path()),
            Some(&preamble),
        )
        .await
        .expect("open");

        let ran = session.sandbox.ran();
        assert_eq!(ran.len(), 2);
        assert!(ran[1].contains("def greet(name):"));
    }

    #[tokio::test]
    async fn open_fails_when_preamble_raises() {
        let dir = tempdir().expect("tempdir");
        let preamble = dir.path().join("broken.py");
        fs::write(&preamble, "import missing_module").expect("write");
        let sandbox = FakeSandbox::default().with_result(
            "import missing_module",
            Execution::new(
                "error",
                "",
                "ModuleNotFoundError: No module named 'missing_module'",
                true,
            ),
        );

        let err = Session::open(
            FakeProvider::replies(&[]),
            sandbox,
            RunConfig::default(),
            trace(dir.path()),
            Some(&preamble),
        )
        .await
        .err()
        .expect("open should fail");

        assert!(err.to_string().contains("Failed to install preamble file"));
        assert!(err.to_string().contains("ModuleNotFoundError"));
    }

    #[tokio::test]
    async fn open_tolerates_preamble_warnings_on_stderr() {
        let dir = tempdir().expect("tempdir");
        let preamble = dir.path().join("fns.py");
        fs::write(&preamble, "import warnings\nwarnings.warn('old api')").expect("write");
        let sandbox = FakeSandbox::default().with_result(
            "import warnings\nwarnings.warn('old api')",
            Execution::new("success", "", "fns.py:2: UserWarning: old api", false),
        );
        let session_trace = trace(dir.path());

        let session = Session::open(
            FakeProvider::replies(&[]),
            sandbox,
            RunConfig::default(),
            session_trace.clone(),
            Some(&preamble),
        )
        .await
        .expect("a warning must not abort setup");

        assert_eq!(session.sandbox.ran().len(), 2);
        let logged = fs::read_to_string(session_trace.file_path()).expect("read trace");
        assert!(logged.contains("UserWarning: old api"));
    }

    #[tokio::test]
    async fn open_fails_when_preamble_file_is_missing() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("missing.py");

        let err = Session::open(
            FakeProvider::replies(&[]),
            FakeSandbox::default(),
            RunConfig::default(),
            trace(dir.path()),
            Some(&missing),
        )
        .await
        .err()
        .expect("open should fail");

        assert!(err.to_string().contains("Failed to load preamble file"));
    }

    #[tokio::test]
    async fn open_surfaces_start_failure() {
        struct RefusingSandbox;

        impl crate::sandbox::Sandbox for RefusingSandbox {
            async fn start(&mut self) -> crate::sandbox::SandboxResult<()> {
                Err(SandboxError::Transport("connection refused".to_string()))
            }

            async fn run(&self, _code: &str) -> crate::sandbox::SandboxResult<Execution> {
                Err(SandboxError::NotStarted)
            }

            async fn stop(&mut self) -> crate::sandbox::SandboxResult<()> {
                Ok(())
            }
        }

        let dir = tempdir().expect("tempdir");
        let err = Session::open(
            FakeProvider::replies(&[]),
            RefusingSandbox,
            RunConfig::default(),
            trace(dir.path()),
            None,
        )
        .await
        .err()
        .expect("open should fail");

        assert!(
            err.to_string()
                .contains("Failed to start sandbox: sandbox transport error: connection refused")
        );
    }

    #[tokio::test]
    async fn ask_logs_exchange_and_reset_keeps_seed() {
        let dir = tempdir().expect("tempdir");
        let mut session = Session::open(
            FakeProvider::replies(&["```python\nfetch_weather(place=\"Pune\")\n```", "Hazy, 31°C."]),
            FakeSandbox::default().with_result(
                "fetch_weather(place=\"Pune\")",
                Execution::new("success", "{'temperature': 31}", "", false),
            ),
            RunConfig::default(),
            trace(dir.path()),
            None,
        )
        .await
        .expect("open");

        let answer = session.ask("Weather in Pune?").await.expect("ask");
        assert_eq!(answer.text, "Hazy, 31°C.");
        assert_eq!(session.transcript().len(), 6);

        let logged = fs::read_to_string(session.trace().file_path()).expect("read trace");
        assert!(logged.contains("[user.in  ] Weather in Pune?"));
        assert!(logged.contains("[sbx.code ] fetch_weather(place=\"Pune\")"));
        assert!(logged.contains("[sbx.out  ] {'temperature': 31}"));
        assert!(logged.contains("[model.out] Hazy, 31°C."));

        session.reset();
        assert_eq!(session.transcript().len(), 2);
    }

    #[tokio::test]
    async fn close_stops_sandbox() {
        let dir = tempdir().expect("tempdir");
        let session = Session::open(
            FakeProvider::replies(&[]),
            FakeSandbox::default(),
            RunConfig::default(),
            trace(dir.path()),
            None,
        )
        .await
        .expect("open");

        let trace_path = session.trace().file_path().to_path_buf();
        session.close().await.expect("close");
        let logged = fs::read_to_string(trace_path).expect("read trace");
        assert!(logged.contains("sandbox stopped"));
    }

    #[test]
    fn describe_event_summarizes_calls() {
        let finished = TaskEvent::CallFinished {
            round: 1,
            index: 0,
            outcome: CallOutcome {
                code: "fetch_weather(place=\"Pune\")\nprint('x')".to_string(),
                execution: Execution::new("error", "", "HTTPError", true),
            },
        };
        assert_eq!(
            describe_event(&finished).as_deref(),
            Some("[round 1] 1. fetch_weather(place=\"Pune\") -> error")
        );

        let extracted = TaskEvent::CallsExtracted {
            round: 2,
            calls: vec!["a()".to_string(), "b()".to_string()],
        };
        assert_eq!(
            describe_event(&extracted).as_deref(),
            Some("[round 2] running 2 function call(s)")
        );

        let reply = TaskEvent::ModelReply {
            round: 0,
            text: "hi".to_string(),
        };
        assert_eq!(describe_event(&reply), None);
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::conversation::Message;
use crate::llm::provider::{ChatReply, LlmError, LlmProvider};
use crate::sandbox::{Execution, Sandbox, SandboxError, SandboxResult};

pub struct FakeProvider {
    responses: Arc<Mutex<VecDeque<Result<ChatReply, LlmError>>>>,
    pub seen_inputs: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl FakeProvider {
    pub fn new(responses: Vec<Result<ChatReply, LlmError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            seen_inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn replies(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|text| {
                    Ok(ChatReply {
                        text: (*text).to_string(),
                    })
                })
                .collect(),
        )
    }
}

impl LlmProvider for FakeProvider {
    async fn chat(&self, messages: &[Message]) -> Result<ChatReply, LlmError> {
        self.seen_inputs
            .lock()
            .expect("lock")
            .push(messages.to_vec());
        self.responses
            .lock()
            .expect("lock")
            .pop_front()
            .expect("queued response")
    }
}

/// Sandbox returning canned results per snippet. Unknown snippets succeed
/// with no output.
#[derive(Default)]
pub struct FakeSandbox {
    results: HashMap<String, Result<Execution, SandboxError>>,
    ran: Mutex<Vec<String>>,
    pub started: bool,
    pub stopped: bool,
}

impl FakeSandbox {
    pub fn started() -> Self {
        Self {
            started: true,
            ..Self::default()
        }
    }

    pub fn with_result(mut self, code: &str, execution: Execution) -> Self {
        self.results.insert(code.to_string(), Ok(execution));
        self
    }

    pub fn with_failure(mut self, code: &str, err: SandboxError) -> Self {
        self.results.insert(code.to_string(), Err(err));
        self
    }

    pub fn ran(&self) -> Vec<String> {
        self.ran.lock().expect("lock").clone()
    }
}

impl Sandbox for FakeSandbox {
    async fn start(&mut self) -> SandboxResult<()> {
        self.started = true;
        Ok(())
    }

    async fn run(&self, code: &str) -> SandboxResult<Execution> {
        if !self.started {
            return Err(SandboxError::NotStarted);
        }
        self.ran.lock().expect("lock").push(code.to_string());
        self.results
            .get(code)
            .cloned()
            .unwrap_or_else(|| Ok(Execution::new("success", "", "", false)))
    }

    async fn stop(&mut self) -> SandboxResult<()> {
        self.stopped = true;
        self.started = false;
        Ok(())
    }
}

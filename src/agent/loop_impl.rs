use anyhow::Result;

use crate::agent::dispatch::{CallOutcome, execute_calls, join_outputs};
use crate::blocks::function_calls;
use crate::config::DEFAULT_MAX_ROUNDS;
use crate::conversation::Transcript;
use crate::llm::provider::LlmProvider;
use crate::sandbox::Sandbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    /// Upper bound on execute-and-follow-up cycles per task.
    pub max_rounds: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskAnswer {
    pub text: String,
    pub rounds: usize,
    /// The round limit was hit while the latest reply still asked for calls.
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    ModelReply {
        round: usize,
        text: String,
    },
    CallsExtracted {
        round: usize,
        calls: Vec<String>,
    },
    CallFinished {
        round: usize,
        index: usize,
        outcome: CallOutcome,
    },
}

pub async fn run_task<P, S, F>(
    provider: &P,
    sandbox: &S,
    transcript: &mut Transcript,
    task: &str,
    config: &RunConfig,
    on_event: &mut F,
) -> Result<TaskAnswer>
where
    P: LlmProvider,
    S: Sandbox,
    F: FnMut(TaskEvent),
{
    transcript.push_user(task)?;
    let mut reply = chat(provider, transcript).await?;
    on_event(TaskEvent::ModelReply {
        round: 0,
        text: reply.clone(),
    });

    let mut rounds = 0;
    loop {
        let calls = function_calls(&reply);
        if calls.is_empty() {
            return Ok(TaskAnswer {
                text: reply,
                rounds,
                exhausted: false,
            });
        }

        if rounds >= config.max_rounds {
            return Ok(TaskAnswer {
                text: reply,
                rounds,
                exhausted: true,
            });
        }

        rounds += 1;
        on_event(TaskEvent::CallsExtracted {
            round: rounds,
            calls: calls.clone(),
        });

        let outcomes = execute_calls(sandbox, &calls, &mut |index, outcome: &CallOutcome| {
            on_event(TaskEvent::CallFinished {
                round: rounds,
                index,
                outcome: outcome.clone(),
            });
        })
        .await?;

        transcript.push_user(join_outputs(&outcomes))?;
        reply = chat(provider, transcript).await?;
        on_event(TaskEvent::ModelReply {
            round: rounds,
            text: reply.clone(),
        });
    }
}

async fn chat<P: LlmProvider>(provider: &P, transcript: &mut Transcript) -> Result<String> {
    let reply = provider.chat(transcript.messages()).await?;
    transcript.push_assistant(reply.text.clone())?;
    Ok(reply.text)
}

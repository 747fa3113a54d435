use crate::sandbox::{Execution, Sandbox, SandboxResult};

pub const NO_OUTPUT_PLACEHOLDER: &str = "(no output)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub code: String,
    pub execution: Execution,
}

impl CallOutcome {
    /// What the model gets back for this call: stderr if anything was
    /// written there, otherwise stdout.
    pub fn reply(&self) -> &str {
        if self.execution.error().is_empty() {
            self.execution.output()
        } else {
            self.execution.error()
        }
    }
}

/// Runs each call in order against the same session. Stops at the first
/// sandbox failure; code that raises is not a failure.
pub async fn execute_calls<S, F>(
    sandbox: &S,
    calls: &[String],
    on_outcome: &mut F,
) -> SandboxResult<Vec<CallOutcome>>
where
    S: Sandbox,
    F: FnMut(usize, &CallOutcome),
{
    let mut outcomes = Vec::with_capacity(calls.len());
    for (index, code) in calls.iter().enumerate() {
        let execution = sandbox.run(code).await?;
        let outcome = CallOutcome {
            code: code.clone(),
            execution,
        };
        on_outcome(index, &outcome);
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

pub fn join_outputs(outcomes: &[CallOutcome]) -> String {
    let joined = outcomes
        .iter()
        .map(CallOutcome::reply)
        .collect::<Vec<_>>()
        .join("\n\n");

    if joined.trim().is_empty() {
        NO_OUTPUT_PLACEHOLDER.to_string()
    } else {
        joined
    }
}

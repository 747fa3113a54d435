use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use super::commands::{Command, help_text, is_command_line, parse_command};
use crate::agent::TaskAnswer;
use crate::conversation::Message;
use crate::llm::provider::LlmProvider;
use crate::sandbox::Sandbox;
use crate::session::Session;

const PROMPT: &str = "you> ";

const HISTORY_PREVIEW_CHARS: usize = 120;

pub async fn run_repl<P: LlmProvider, S: Sandbox>(session: &mut Session<P, S>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("Type a message for the model, /help for commands, exit to quit.");

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
                    break;
                }

                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                if is_command_line(line) {
                    println!("{}", handle_command(session, line));
                    continue;
                }

                match session.ask(line).await {
                    Ok(answer) => println!("{}", render_answer(&answer)),
                    Err(err) => println!("Assistant request failed: {err}"),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}

pub fn render_answer(answer: &TaskAnswer) -> String {
    if answer.exhausted {
        format!(
            "{}\n(stopped after {} function-call round(s); the reply above still contains calls)",
            answer.text, answer.rounds
        )
    } else {
        answer.text.clone()
    }
}

fn handle_command<P: LlmProvider, S: Sandbox>(session: &mut Session<P, S>, line: &str) -> String {
    let command = match parse_command(line) {
        Ok(command) => command,
        Err(err) => return format!("error: {err}"),
    };

    match command {
        Command::Help => help_text(),
        Command::History(limit) => format_history(session.transcript().messages(), limit),
        Command::Reset => {
            session.reset();
            "Conversation reset.".to_string()
        }
        Command::Trace => format!("Trace file: {}", session.trace().file_path().display()),
        Command::Rounds(None) => format!("Max rounds: {}", session.max_rounds()),
        Command::Rounds(Some(value)) => {
            session.set_max_rounds(value);
            format!("Max rounds set to {value}")
        }
    }
}

fn format_history(messages: &[Message], limit: Option<usize>) -> String {
    if messages.is_empty() {
        return "(empty conversation)".to_string();
    }

    let skip = limit.map_or(0, |n| messages.len().saturating_sub(n));
    messages
        .iter()
        .enumerate()
        .skip(skip)
        .map(|(index, message)| {
            format!(
                "{:<3} {:<9} {}",
                index + 1,
                message.role.as_str(),
                preview(&message.content)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn preview(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("");
    let extra_lines = content.lines().count().saturating_sub(1);
    let mut shown = first_line.chars().take(HISTORY_PREVIEW_CHARS).collect::<String>();
    if first_line.chars().count() > HISTORY_PREVIEW_CHARS {
        shown.push_str("...");
    }
    if extra_lines > 0 {
        shown.push_str(&format!(" [+{extra_lines} lines]"));
    }
    shown
}

use std::fmt;

/// Slash commands understood by the REPL. Anything else is a task for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Help,
    History(Option<usize>),
    Reset,
    Trace,
    Rounds(Option<usize>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct CommandSpec {
    name: &'static str,
    args: &'static str,
    summary: &'static str,
}

const COMMANDS: [CommandSpec; 5] = [
    CommandSpec {
        name: "help",
        args: "",
        summary: "Show this command list",
    },
    CommandSpec {
        name: "history",
        args: "[n]",
        summary: "Show the conversation (or its last n messages)",
    },
    CommandSpec {
        name: "reset",
        args: "",
        summary: "Forget the conversation, keeping the built-in prompts",
    },
    CommandSpec {
        name: "trace",
        args: "",
        summary: "Show path to the current trace file",
    },
    CommandSpec {
        name: "rounds",
        args: "[n]",
        summary: "Show or set the maximum function-call rounds per task",
    },
];

impl CommandSpec {
    fn usage(&self) -> String {
        if self.args.is_empty() {
            format!("/{}", self.name)
        } else {
            format!("/{} {}", self.name, self.args)
        }
    }
}

pub(crate) fn help_text() -> String {
    let mut text = String::from("Available commands:");
    for spec in &COMMANDS {
        text.push_str(&format!("\n  {:<14} {}", spec.usage(), spec.summary));
    }
    text.push_str(&format!("\n  {:<14} {}", "exit, quit", "Stop the sandbox and leave"));
    text
}

pub(crate) fn is_command_line(line: &str) -> bool {
    line.starts_with('/')
}

pub(crate) fn parse_command(line: &str) -> Result<Command, ParseError> {
    let body = line
        .strip_prefix('/')
        .ok_or_else(|| ParseError("not a command".to_string()))?;
    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body.trim_end(), ""),
    };
    if name.is_empty() {
        return Err(ParseError("empty command. Try /help".to_string()));
    }

    let name = name.to_ascii_lowercase();
    let spec = COMMANDS
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| ParseError(format!("unknown command '/{name}'. Try /help")))?;
    let usage = || ParseError(format!("usage: {}", spec.usage()));

    match spec.name {
        "history" => match optional_count(rest).map_err(|()| usage())? {
            Some(0) => Err(ParseError(format!(
                "usage: {} (n must be >= 1)",
                spec.usage()
            ))),
            count => Ok(Command::History(count)),
        },
        "rounds" => optional_count(rest)
            .map(Command::Rounds)
            .map_err(|()| usage()),
        _ if !rest.is_empty() => Err(usage()),
        "help" => Ok(Command::Help),
        "reset" => Ok(Command::Reset),
        _ => Ok(Command::Trace),
    }
}

fn optional_count(rest: &str) -> Result<Option<usize>, ()> {
    if rest.is_empty() {
        return Ok(None);
    }
    rest.parse::<usize>().map(Some).map_err(|_| ())
}

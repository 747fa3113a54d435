//! Fenced code block extraction from model replies.
//!
//! A reply asks for a function call by emitting a fenced block tagged
//! `python`. Fences follow the usual markdown shape:
//!
//! ````text
//! ```python {attrs}
//! fetch_weather(place="Pune")
//! ```
//! ````
//!
//! An opener may also follow prose on the same line (`Sure: ```python`).
//! The closing line must repeat the opening fence exactly, indentation
//! included, so a longer or shorter run of backticks inside the body does not
//! end the block.

use regex::{Captures, Regex};
use std::sync::LazyLock;

pub const FUNCTION_CALL_LANGUAGE: &str = "python";

static OPENING_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<fence> {0,3}`{3,})[ \t]*(?:(?P<class>[\w\-.]+)(?:[ \t]*\{(?P<attrs_a>[^}]+)\})?|[ \t]*\{(?P<attrs_b>[^}]+)\})?$",
    )
    .expect("opening fence pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub fence: String,
    pub language: Option<String>,
    pub attributes: Option<String>,
    pub content: String,
}

impl CodeBlock {
    pub fn is_function_call(&self) -> bool {
        self.language.as_deref() == Some(FUNCTION_CALL_LANGUAGE)
    }
}

pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    let lines = text.lines().collect::<Vec<_>>();
    let mut blocks = Vec::new();
    let mut index = 0;

    while index < lines.len() {
        let line = lines[index];
        let Some(captures) = OPENING_FENCE.captures(line) else {
            index += 1;
            continue;
        };
        let Some(fence) = opening_fence(line, &captures) else {
            index += 1;
            continue;
        };

        // At least one line of body is required between the fences.
        let closing = lines
            .iter()
            .enumerate()
            .skip(index + 2)
            .find(|(_, line)| **line == fence)
            .map(|(pos, _)| pos);
        let Some(closing) = closing else {
            index += 1;
            continue;
        };

        let attributes = captures
            .name("attrs_a")
            .or_else(|| captures.name("attrs_b"))
            .map(|m| m.as_str().to_string());

        blocks.push(CodeBlock {
            fence: fence.to_string(),
            language: captures.name("class").map(|m| m.as_str().to_string()),
            attributes,
            content: body_between(&lines[index + 1..closing]),
        });
        index = closing + 1;
    }

    blocks
}

/// The fence a closer has to repeat. Indentation only counts when the opener
/// starts the line; behind prose the backtick run alone is the fence. Four or
/// more spaces of indent is an indented code line, not an opener.
fn opening_fence<'a>(line: &str, captures: &Captures<'a>) -> Option<&'a str> {
    let fence = captures.name("fence")?;
    let prefix = &line[..fence.start()];
    if prefix.is_empty() {
        Some(fence.as_str())
    } else if prefix.trim().is_empty() {
        None
    } else {
        Some(fence.as_str().trim_start_matches(' '))
    }
}

/// Bodies of every `python` block, in reply order.
pub fn function_calls(text: &str) -> Vec<String> {
    extract_code_blocks(text)
        .into_iter()
        .filter(CodeBlock::is_function_call)
        .map(|block| block.content)
        .collect()
}

fn body_between(lines: &[&str]) -> String {
    let start = lines
        .iter()
        .position(|line| !line.is_empty())
        .unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|line| !line.is_empty())
        .map_or(start, |pos| pos + 1);

    lines[start..end].join("\n")
}

use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::conversation::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    HttpStatus { status: u16, body: String },
    Transport(String),
    Parse(String),
    EmptyResponse,
}

impl Display for LlmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpStatus { status, body } => {
                write!(f, "chat request failed with status {status}: {body}")
            }
            Self::Transport(msg) => write!(f, "chat transport error: {msg}"),
            Self::Parse(msg) => write!(f, "chat response parse error: {msg}"),
            Self::EmptyResponse => write!(f, "chat endpoint returned empty message content"),
        }
    }
}

impl Error for LlmError {}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// A chat endpoint that takes the whole history and returns the next
/// assistant message.
pub trait LlmProvider {
    fn chat(
        &self,
        messages: &[Message],
    ) -> impl std::future::Future<Output = LlmResult<ChatReply>> + Send;
}

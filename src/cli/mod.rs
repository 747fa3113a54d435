mod args;
mod commands;
mod repl;

pub use args::CliArgs;
pub use repl::{render_answer, run_repl};

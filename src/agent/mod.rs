pub mod dispatch;
mod loop_impl;
pub mod prompt;

#[cfg(test)]
pub(crate) mod fakes;

pub use loop_impl::{RunConfig, TaskAnswer, TaskEvent, run_task};

pub mod ollama;
pub mod provider;

// Data models for the Ollama API and the benchmark surface

pub mod benchmark;
pub mod ollama;

// Ollama Bench - Library root

pub mod bench;
pub mod config;
pub mod error;
pub mod http_client;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod tokenizer;

pub mod config;
pub mod engine;
pub mod responder;
pub mod sink;

//! Re-exports the structured-generation core consumed by the decision service:
//! configuration handling, error types, the generation backend transport, JSON
//! extraction, payload validation and the deterministic scoring policy.

pub mod config;
pub mod dto;
pub mod error;
pub mod generation;
pub mod json_extract;
pub mod openai_client;
pub mod openai_settings;
pub mod scoring;
pub mod validation;

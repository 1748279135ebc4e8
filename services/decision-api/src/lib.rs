//! HTTP surface of the decision aid: anonymous sessions, context tokens and
//! the framing, questions, analysis and chat flows.

pub mod analysis;
pub mod chat;
pub mod error;
pub mod framing;
pub mod inflight;
pub mod middleware;
pub mod prompts;
pub mod questions;
pub mod routes;
pub mod session;
pub mod state;

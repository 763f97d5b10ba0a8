//! # toolchat agent
//!
//! The orchestration loop between a model and local tools:
//! 1. The operator sends a message; it becomes a user turn
//! 2. The model answers with final text or a batch of tool requests
//! 3. The batch runs concurrently, each tool under its own timeout
//! 4. Requests and results are committed together and the model is asked again
//! 5. Until final text, the round cap, an interrupt, or a transport error
//!
//! [`ChatSession`] wraps one loop with its transcript and snapshot storage.

mod agent;
mod session;

pub use agent::{is_resumable, Agent, FinalAnswer};
pub use session::{ChatSession, Exchange};

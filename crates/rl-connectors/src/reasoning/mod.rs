//! Reasoning service connectors.

pub mod mock;
pub mod openai;

pub use mock::{MockReasoningClient, PromptRecord, ScriptedReply};
pub use openai::{OpenAiReasoningClient, OpenAiReasoningConfig};

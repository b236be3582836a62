//! LLM client abstraction and the structured-call gateway

mod anthropic;
mod client;
mod error;
mod gateway;

pub use anthropic::AnthropicClient;
pub use client::testing;
pub use client::{LlmClient, StructuredRequest, StructuredResponse, TokenUsage};
pub use error::LlmError;
pub use gateway::{CostLedger, LlmGateway, PurposeCost};

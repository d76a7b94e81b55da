//! Decision-maker protocol types and the Anthropic client

pub mod anthropic;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use provider::{LlmError, LlmProvider, LlmResult};
pub use types::{
    ContentBlock, ImageSource, LlmContent, LlmMessage, LlmRequest, LlmResponse, LlmTool,
    ResultBlock, ToolResultContent, Usage,
};

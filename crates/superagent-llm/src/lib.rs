//! Model handles for Superagent's agent roles.
//!
//! Each role (assistant, planner, executor, critic) is bound to a model spec
//! of the form `provider/model`. A [`ModelResolver`] turns that string into a
//! [`SharedModel`], a handle that can run completions:
//!
//! ```text
//! "anthropic/claude-3-5-haiku-latest"
//!            │ ModelSpec::parse
//!            ▼
//!   ProviderResolver ── config + env ──► AnthropicBackend
//!                                        OpenAiBackend (openai, gemini, local)
//! ```
//!
//! Resolution fails with [`LlmError::UnsupportedProvider`] or
//! [`LlmError::MissingCredential`]; nothing is substituted silently.

pub mod anthropic;
pub mod backend;
pub mod error;
pub mod openai;
pub mod resolver;
pub mod types;

pub use backend::{ModelHandle, SharedModel, with_retry};
#[cfg(any(test, feature = "testing"))]
pub use backend::{MockModel, MockReply};
pub use error::{LlmError, RateLimitInfo, Result};
#[cfg(any(test, feature = "testing"))]
pub use resolver::FixedResolver;
pub use resolver::{ModelResolver, ModelSpec, Provider, ProviderResolver, RoleBindings, SharedResolver};
pub use types::{ChatMessage, ChatRole, Completion, CompletionRequest, Usage};

pub use anthropic::{AnthropicBackend, AnthropicConfig};
pub use openai::{OpenAiBackend, OpenAiConfig};

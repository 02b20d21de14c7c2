//! LLM provider adapters with failure isolation.
//!
//! Every outbound model call goes through a [`directory::ProviderDirectory`]:
//! descriptors ordered by priority, a circuit breaker per provider, bounded
//! retries with jittered backoff, and per-call deadlines. Successful replies
//! carry token usage for per-conversation accounting.

pub mod anthropic;
pub mod breaker;
pub mod directory;
pub mod embed;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod retry;

pub use anthropic::AnthropicProvider;
pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use directory::{ProviderDescriptor, ProviderDirectory, ProviderKind, TaskKind};
pub use embed::{cosine_similarity, EmbeddingProvider, OpenAiEmbeddings};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::{ChatReply, ChatRequest, LlmProvider, Message, ProviderError, Role, Usage};
pub use retry::RetryPolicy;

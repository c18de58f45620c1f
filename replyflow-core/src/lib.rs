pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fallback;
pub mod generation;
pub mod knowledge;
pub mod prompt;
pub mod resolver;
pub mod utterance;

pub use cache::{cache_key, CacheStats, InMemoryCache, ResponseCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ReplyflowConfig;
pub use error::ReplyflowError;
pub use fallback::{FallbackMessages, FallbackReason};
pub use generation::{ChatCompletionClient, GenerationError, GenerationRequest, Generator};
pub use knowledge::{KnowledgeBase, KnowledgeMatch};
pub use resolver::{ResolutionResult, ResolutionSource, ResolverBuilder, ResponseResolver};
pub use utterance::{Parameters, Utterance};

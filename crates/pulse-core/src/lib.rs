pub mod ai;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod provider;
pub mod sources;
pub mod state;
pub mod stream;
pub mod suggestions;

// Re-export main types for convenience
pub use ai::{ChatBackend, GroqClient, PerplexityClient, SearchBackend};
pub use config::Config;
pub use coordinator::{
    CoordinatorSettings, ResponseCoordinator, TurnEvent, TurnFailure, TurnObserver, TurnOutcome,
    TurnPhase, TurnStream,
};
pub use error::{PulseError, PulseResult};
pub use provider::Provider;
pub use sources::{extract_sources, SourceResolver};
pub use state::{ChatRole, ChatTurn, Conversation, Source};
pub use stream::{Delta, StreamState, TokenAssembler};
pub use suggestions::SuggestionGenerator;

pub mod analysis;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod normalizer;
pub mod sources;
pub mod text;
pub mod types;

// Re-export the types most callers need.
pub use analysis::local_nlp::LocalNlpBackend;
pub use analysis::remote_llm::RemoteLlmBackend;
pub use analysis::rule_based::RuleBasedBackend;
pub use analysis::{AnalysisBackend, AnalysisRun};
pub use config::{ConfigUpdate, ProcessingConfig};
pub use context::{ContextAnalyzer, SubscriberId, TriggerOutcome};
pub use directory::{resolve_client, Client, ClientDirectory, InMemoryDirectory, ResolvedClient};
pub use error::AnalysisError;
pub use manager::ProcessingManager;
pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use normalizer::CommunicationLoader;
pub use sources::{
    CalendarEntry, CalendarStore, ChatMessage, ChatStore, EmailStore, InMemorySources,
    MeetingRecord, MeetingStore, StoredEmail,
};
pub use types::{
    AnalysisMode, CommunicationKind, CommunicationRecord, ContextEvent, Insights,
    ProcessingMetrics, Sentiment, Summary,
};

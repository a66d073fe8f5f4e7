//! quill: generation gateway for SEO content.
//!
//! Outbound LLM calls pass through a FIFO [`AdmissionPool`] so the backend
//! never runs more than the configured number of generations at once.

mod health;
mod version;

pub mod config;
pub mod generation;
pub mod permit;
pub mod provider;
pub mod service;
pub mod transport;

pub use config::{AppConfig, ConfigError, GateConfig, ProviderConfig};
pub use generation::{
    Completion, ContentKind, GenerationError, GenerationOutput, GenerationRequest, Generator,
    Prompt, TokenUsage, WritingProfile,
};
pub use health::{Health, HealthSnapshot};
pub use permit::{AcquireError, AdmissionPool, Permit, PoolSnapshot, ReleaseError};
pub use provider::HttpGenerator;
pub use service::{GenerateError, GenerationService};
pub use version::{QUILL_VERSION, VersionInfo};

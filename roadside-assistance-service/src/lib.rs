pub mod agents;
pub mod config;
pub mod conversation;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod relay;
pub mod service;
pub mod store;

pub use config::{LogFormat, ServiceConfig};
pub use conversation::{RoadsideAssistant, TurnOutcome};
pub use error::{Result, ServiceError};
pub use models::*;
pub use orchestrator::{
    CancelResult, Confirmation, ConfirmationOutcome, DispatchOrchestrator, DispatchResult,
    DispatchStatus,
};
pub use relay::{ConnectionManager, RelayConnection, Role};
pub use service::{AppState, build_router};
pub use store::{CaseRepository, DocumentStore, FileDocumentStore, InMemoryDocumentStore};

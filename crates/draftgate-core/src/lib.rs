//! draftgate core: transport-agnostic domain logic for a resumable
//! draft, human review, finalize workflow.
//!
//! The crate contains the models, the session store and checkpoint
//! persistence, the workflow state machine, the execution engine and the
//! streaming coordinator. It has **no HTTP framework dependency** by default,
//! making it suitable for use in:
//!
//! - HTTP servers (via `draftgate-server`)
//! - CLI tools (via `draftgate-cli`)
//!
//! # Feature Flags
//!
//! - `axum`: enables the `IntoResponse` impl on `WorkflowError` for use in axum handlers.

pub mod config;
pub mod db;
pub mod error;
pub mod generation;
pub mod models;
pub mod service;
pub mod state;
pub mod store;
pub mod streaming;
pub mod workflow;

// Convenience re-exports
pub use config::{GeneratorConfig, GeneratorKind, WorkflowConfig};
pub use db::Database;
pub use error::WorkflowError;
pub use service::{SessionView, WorkflowService};
pub use state::{AppState, AppStateInner};
pub use streaming::EventStream;
pub use workflow::{RunOutcome, RunStatus, StreamEvent};

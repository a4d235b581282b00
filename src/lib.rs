pub mod authorizer;
pub mod config;
pub mod engine;
pub mod error;
pub mod fields;
pub mod history;
pub mod http;
pub mod ledger;
pub mod repository;
pub mod store;
pub mod types;

pub use engine::{Actor, TransitionOutcome, WorkflowEngine};
pub use error::WorkflowError;

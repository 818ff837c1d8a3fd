//! Room restyling service - spends a credit to restyle an uploaded room photo
//!
//! Reserves a credit, dispatches an image-to-image request to an asynchronous
//! inference provider, polls it to completion or a deadline, and reconciles the
//! job record and credit balance with the outcome.

pub mod ai;
pub mod error;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod polling;
pub mod prompts;
pub mod server;
pub mod status;
pub mod storage;
pub mod store;

pub use error::{Error, GenerationError, Result};

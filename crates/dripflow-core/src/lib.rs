//! # Dripflow Core
//!
//! Domain model, configuration, error type, store/gateway seams, and the
//! pure time-rule evaluator for the sequence automation engine.

pub mod config;
pub mod error;
pub mod timing;
pub mod traits;
pub mod types;

pub use config::DripflowConfig;
pub use error::{DripflowError, Result};
pub use timing::next_eligible;
pub use traits::{DefinitionStore, MessageGateway, RuntimeStore};

pub mod config;
pub mod error;
pub mod ledger;
pub mod ops;
pub mod recipe;
pub mod runtime;

pub use error::{EngineError, Result};

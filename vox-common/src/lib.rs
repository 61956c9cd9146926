//! # Vox Common Library
//!
//! Shared code for the Vox voice-cloning services:
//! - Common error type
//! - Configuration file and root folder resolution
//! - Training job event types and the EventBus
//! - Identifier generation

pub mod config;
pub mod error;
pub mod events;
pub mod ids;

pub use error::{Error, Result};

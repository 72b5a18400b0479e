//! # contex-core
//!
//! Core types, traits, and abstractions for the Contex routing engine.
//!
//! This crate provides the foundational data structures, repository traits,
//! payload normalization, and configuration that other Contex crates depend
//! on.

pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod memory;
pub mod models;
pub mod node;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{ContexConfig, DeliveryConfig, EmbeddingConfig, MatchingConfig, RetentionConfig};
pub use error::{Error, Result};
pub use models::*;
pub use node::{decompose, describe, normalize, text_content, DataFormat, NodeDraft};
pub use traits::*;

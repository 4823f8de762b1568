//! Cleans, scores and links pre/post assessment exports, then merges them
//! with the registrar roster.

pub mod config;
pub mod consent;
pub mod dedup;
pub mod error;
pub mod identity;
pub mod matcher;
pub mod merge;
pub mod models;
pub mod pipeline;
pub mod reader;
pub mod report;
pub mod roster;
pub mod scoring;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineSummary};

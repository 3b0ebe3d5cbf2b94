//! Configuration Module
//!
//! Configuration loading for the bar pipeline.

mod settings;

pub use settings::{
    ConfigError, DataFeed, FeedSettings, Mode, PipelineConfig, ReplayEndpoint, ServerSettings,
};

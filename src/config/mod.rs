// src/config/mod.rs
//! File- and env-backed configuration.

pub mod graph;
pub mod recommender;

pub use graph::GraphSettings;
pub use recommender::{LimitsConfig, PathsConfig, RecommenderConfig, RemoteConfig};

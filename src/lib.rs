pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod inference;
pub mod logging;
pub mod model;
pub mod prompts;
pub mod service;

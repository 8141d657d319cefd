//! Core data model, config, and errors for the Quill agent engine.

pub mod adapter;
pub mod config;
pub mod error;
pub mod thread;
pub mod types;

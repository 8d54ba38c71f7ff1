//! Adapter configuration module

pub mod adapter_config;
pub mod null_handling;

pub use adapter_config::*;
pub use null_handling::*;

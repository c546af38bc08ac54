//! # Core Engine Module
//!
//! Shared configuration types used by every subsystem.

pub mod config;

pub use config::{EngineConfig, PhysicsConfig, RendererConfig, WindowConfig};

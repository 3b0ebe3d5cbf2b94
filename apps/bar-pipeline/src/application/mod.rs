//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and the port interfaces
//! through which they reach the staging buffer, the durable store and the
//! market clock.

/// Port interfaces for external systems.
pub mod ports;

/// Application services for symbol resolution and flushing.
pub mod services;

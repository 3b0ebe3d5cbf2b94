//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Alpaca adapters: bar stream client, wire codec, market clock.
pub mod alpaca;

/// Redis staging buffer.
pub mod staging;

/// PostgreSQL connectivity and bar repository.
pub mod store;

/// WebSocket replay server.
pub mod replay;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

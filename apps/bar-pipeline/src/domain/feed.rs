//! Feed Lifecycle
//!
//! States of one live feed run. `Closed` is terminal: a run never
//! reconnects, a new process is started instead.

use serde::Serialize;

/// Live feed connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedConnectionState {
    /// No socket open.
    #[default]
    Disconnected,
    /// Socket open, auth sent, waiting for the ack.
    Authenticating,
    /// Authenticated and subscribe frame sent.
    Subscribed,
    /// Inside the streaming loop.
    Streaming,
    /// Run finished (market close, socket close or shutdown).
    Closed,
}

impl FeedConnectionState {
    /// Lowercase name for logs and health output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Authenticating => "authenticating",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        }
    }

    /// Whether bars can currently arrive.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Subscribed | Self::Streaming)
    }
}

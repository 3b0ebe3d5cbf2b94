//! Feed Authentication
//!
//! The bar stream accepts exactly one auth frame per connection and answers
//! it with an ack. The server's `connected` welcome may arrive before or
//! after the client has sent its credentials, so it is skipped.
//!
//! ```text
//! client                        server
//!   | ---- connect ---------------> |
//!   | <--- [{"T":"success","msg":"connected"}]
//!   | ---- {"action":"auth",...} -> |
//!   | <--- [{"T":"success","msg":"authenticated"}]   or   [{"T":"error",...}]
//! ```
//!
//! Anything other than a success ack ends the feed run.

use std::time::Duration;

use thiserror::Error;

use super::messages::{AuthRequest, ErrorMessage, FeedMessage, SuccessKind};

/// Default wait for the auth ack.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Errors
// =============================================================================

/// Ways the handshake can fail. All are fatal for the run.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Key or secret is empty.
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    /// Server rejected the key/secret pair (code 402).
    #[error("credentials rejected by feed")]
    InvalidCredentials,

    /// Server refused another connection for this account (code 406).
    #[error("feed connection limit reached")]
    ConnectionLimit,

    /// Any other error frame.
    #[error("feed rejected auth ({code}): {message}")]
    Rejected {
        /// Server error code.
        code: i32,
        /// Server error text.
        message: String,
    },

    /// No ack within the allowed window.
    #[error("no auth ack within {0:?}")]
    Timeout(Duration),

    /// A frame other than an ack arrived first.
    #[error("unexpected frame while authenticating: {0}")]
    UnexpectedFrame(String),

    /// Socket closed before the ack.
    #[error("feed closed the connection during auth")]
    ConnectionClosed,
}

impl From<&ErrorMessage> for AuthError {
    fn from(err: &ErrorMessage) -> Self {
        match err.code {
            402 => Self::InvalidCredentials,
            404 => Self::Timeout(AUTH_TIMEOUT),
            406 => Self::ConnectionLimit,
            code => Self::Rejected {
                code,
                message: err.msg.clone(),
            },
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// API key pair for the feed and the trading clock. `Debug` hides the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    key: String,
    secret: String,
}

impl Credentials {
    /// Build a key pair.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingCredential`] if either part is empty.
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Result<Self, AuthError> {
        let key = key.into();
        let secret = secret.into();
        if key.is_empty() {
            return Err(AuthError::MissingCredential("key"));
        }
        if secret.is_empty() {
            return Err(AuthError::MissingCredential("secret"));
        }
        Ok(Self { key, secret })
    }

    /// API key id.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// API secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// Where one connection's handshake stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakePhase {
    /// Credentials not sent yet.
    #[default]
    Idle,
    /// Credentials sent, waiting for the ack.
    AwaitingAck,
    /// Ack received.
    Authenticated,
    /// Rejected or interrupted.
    Failed,
}

/// Drives the auth exchange for one connection.
#[derive(Debug)]
pub struct AuthHandshake {
    credentials: Credentials,
    phase: HandshakePhase,
}

impl AuthHandshake {
    /// Start a handshake that will present `credentials`.
    #[must_use]
    pub const fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            phase: HandshakePhase::Idle,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Build the auth frame and start waiting for the ack.
    #[must_use]
    pub fn request(&mut self) -> AuthRequest {
        self.phase = HandshakePhase::AwaitingAck;
        AuthRequest::new(self.credentials.key.clone(), self.credentials.secret.clone())
    }

    /// Feed one decoded message. `Ok(true)` once authenticated.
    ///
    /// # Errors
    ///
    /// Returns an error for an error frame or any frame that is not a
    /// success message.
    pub fn observe(&mut self, msg: &FeedMessage) -> Result<bool, AuthError> {
        match msg {
            FeedMessage::Success(success) => match success.msg {
                SuccessKind::Connected => Ok(false),
                SuccessKind::Authenticated => {
                    self.phase = HandshakePhase::Authenticated;
                    Ok(true)
                }
            },
            FeedMessage::Error(error) => {
                self.phase = HandshakePhase::Failed;
                Err(AuthError::from(error))
            }
            FeedMessage::Subscription(_) => Err(self.reject("subscription ack")),
            FeedMessage::Bar(bar) => Err(self.reject(&format!("bar for {}", bar.symbol))),
        }
    }

    /// Fail the handshake on a frame that cannot be an ack.
    pub fn reject(&mut self, what: &str) -> AuthError {
        self.phase = HandshakePhase::Failed;
        AuthError::UnexpectedFrame(what.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::alpaca::messages::{SubscriptionMessage, SuccessMessage};
    use test_case::test_case;

    fn handshake() -> AuthHandshake {
        AuthHandshake::new(Credentials::new("key", "secret").unwrap())
    }

    #[test]
    fn empty_parts_are_rejected() {
        assert!(matches!(
            Credentials::new("", "secret"),
            Err(AuthError::MissingCredential("key"))
        ));
        assert!(matches!(
            Credentials::new("key", ""),
            Err(AuthError::MissingCredential("secret"))
        ));
    }

    #[test]
    fn debug_hides_secret() {
        let debug = format!("{:?}", Credentials::new("my_key", "super_secret").unwrap());
        assert!(debug.contains("my_key"));
        assert!(!debug.contains("super_secret"));
    }

    #[test]
    fn welcome_is_skipped_until_ack() {
        let mut auth = handshake();
        let request = auth.request();
        assert_eq!(request.action, "auth");
        assert_eq!(request.key, "key");
        assert_eq!(auth.phase(), HandshakePhase::AwaitingAck);

        let welcome = FeedMessage::Success(SuccessMessage::new(SuccessKind::Connected));
        assert!(!auth.observe(&welcome).unwrap());
        assert_eq!(auth.phase(), HandshakePhase::AwaitingAck);

        let ack = FeedMessage::Success(SuccessMessage::new(SuccessKind::Authenticated));
        assert!(auth.observe(&ack).unwrap());
        assert_eq!(auth.phase(), HandshakePhase::Authenticated);
    }

    #[test]
    fn error_frame_fails() {
        let mut auth = handshake();
        let _ = auth.request();

        let err = auth
            .observe(&FeedMessage::Error(ErrorMessage::new(402, "auth failed")))
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(auth.phase(), HandshakePhase::Failed);
    }

    #[test]
    fn subscription_before_ack_fails() {
        let mut auth = handshake();
        let _ = auth.request();

        let err = auth
            .observe(&FeedMessage::Subscription(SubscriptionMessage::default()))
            .unwrap_err();

        assert!(matches!(err, AuthError::UnexpectedFrame(_)));
        assert_eq!(auth.phase(), HandshakePhase::Failed);
    }

    #[test_case(402 ; "bad credentials")]
    #[test_case(404 ; "server side timeout")]
    #[test_case(406 ; "connection limit")]
    #[test_case(500 ; "other")]
    fn error_codes_map(code: i32) {
        let err = AuthError::from(&ErrorMessage::new(code, "boom"));
        match code {
            402 => assert!(matches!(err, AuthError::InvalidCredentials)),
            404 => assert!(matches!(err, AuthError::Timeout(_))),
            406 => assert!(matches!(err, AuthError::ConnectionLimit)),
            _ => assert!(matches!(err, AuthError::Rejected { code: 500, .. })),
        }
    }
}

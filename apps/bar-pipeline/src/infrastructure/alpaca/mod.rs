//! Alpaca Market Data Integration
//!
//! - `messages`: wire types for the bar stream
//! - `codec`: JSON frame decoding and encoding
//! - `auth`: credentials and the auth handshake
//! - `feed`: the live bar feed client
//! - `clock`: the trading API market clock

pub mod auth;
pub mod clock;
pub mod codec;
pub mod feed;
pub mod messages;

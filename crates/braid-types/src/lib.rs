//! Core shared types for braid.
//!
//! This crate is the bottom of the braid workspace: every other crate
//! depends on it, and it depends on nothing but serde. It provides:
//!
//! - [`ErrorCode`] - unified error code interface implemented by every
//!   braid error type
//! - [`Payload`] - the tagged union of decoded event payload shapes
//!
//! # Related Crates
//!
//! - `braid-event` - Message and Event envelopes built on [`Payload`]
//! - `braid-expression` - expression engine navigating [`Payload`] trees

mod error;
mod payload;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use payload::Payload;

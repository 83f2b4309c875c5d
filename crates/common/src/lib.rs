//! Common types shared by the TTS gateway crates
//!
//! `Secret` keeps upstream API keys out of logs and status output; the
//! configuration `Error` is shared by everything that loads settings.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, key_preview};

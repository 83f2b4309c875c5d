//! Secret wrapper for upstream API keys

use std::fmt;
use zeroize::Zeroize;

/// Number of trailing characters shown in a key preview.
const PREVIEW_CHARS: usize = 4;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Redacted preview of the key: `...` plus its last four characters.
    pub fn preview(&self) -> String {
        key_preview(&self.0)
    }
}

/// Build the `...abcd` preview used wherever a key must be identified in
/// logs or status output. The preview never contains the whole key: keys of
/// four characters or fewer show only the last half of their characters.
pub fn key_preview(key: &str) -> String {
    let count = key.chars().count();
    let shown = if count > PREVIEW_CHARS {
        PREVIEW_CHARS
    } else {
        count / 2
    };
    let tail: String = key.chars().skip(count - shown).collect();
    format!("...{tail}")
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Zeroize + PartialEq> PartialEq for Secret<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

//! Formatting of panic payloads caught in worker tasks.

use std::{any::Any, fmt};

/// Displays a caught panic payload.
///
/// String payloads print as-is; anything else falls back to `Debug`.
///
/// ```
/// use fragcast::panic::PanicMessage;
///
/// assert_eq!(PanicMessage::new(Box::new("boom")).to_string(), "boom");
/// assert_eq!(
///     PanicMessage::new(Box::new(String::from("bang"))).to_string(),
///     "bang"
/// );
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl PanicMessage {
    /// Wrap a payload returned by `catch_unwind`.
    pub fn new(payload: Box<dyn Any + Send>) -> Self { Self(payload) }
}

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (
            self.0.downcast_ref::<String>(),
            self.0.downcast_ref::<&'static str>(),
        ) {
            (Some(message), _) => f.write_str(message),
            (None, Some(message)) => f.write_str(message),
            (None, None) => write!(f, "{:?}", self.0),
        }
    }
}

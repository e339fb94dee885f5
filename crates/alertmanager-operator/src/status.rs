//! The operator-facing status of the unit, and how errors are turned into one.
use std::{
    error::Error,
    fmt::{self, Write},
};

use strum::{Display, EnumDiscriminants, IntoStaticStr};

/// Status messages longer than this are cut off.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// What the unit reports to the operator. Always one of a small closed set, with a short
/// human-readable message.
#[derive(Clone, Debug, EnumDiscriminants, Eq, PartialEq)]
#[strum_discriminants(derive(Display, IntoStaticStr))]
#[strum_discriminants(strum(serialize_all = "lowercase"))]
pub enum Status {
    Active,

    /// Work is in progress and will finish without intervention.
    Maintenance(String),

    /// Waiting for something outside of this unit, e.g. the workload container.
    Waiting(String),

    /// Needs operator intervention. Nothing is retried until the next event.
    Blocked(String),
}

impl Status {
    pub fn kind(&self) -> StatusDiscriminants {
        self.into()
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Active => "",
            Self::Maintenance(message) | Self::Waiting(message) | Self::Blocked(message) => {
                message
            }
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "{}", self.kind()),
            _ => write!(f, "{}: {}", self.kind(), self.message()),
        }
    }
}

/// An error that can be turned into a [`Status`].
pub trait StatusError: Error {
    /// A short, static name of the error kind, used as a log field.
    fn category(&self) -> &'static str;

    fn status(&self) -> Status;
}

/// The message of `err` and all of its sources, joined by `": "` and truncated to
/// [`MAX_MESSAGE_LEN`] bytes.
pub fn error_message(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        // Writing into a String cannot fail.
        let _ = write!(message, ": {err}");
        source = err.source();
    }
    truncate_with_ellipsis(&mut message, MAX_MESSAGE_LEN);
    message
}

/// Ensures that `msg` is at most `max_len` _bytes_ long.
///
/// If `msg` is longer than `max_len` then the extra text is replaced with an ellipsis.
pub fn truncate_with_ellipsis(msg: &mut String, max_len: usize) {
    const ELLIPSIS: char = '…';
    const ELLIPSIS_LEN: usize = ELLIPSIS.len_utf8();

    if msg.len() > max_len {
        let mut end = max_len.saturating_sub(ELLIPSIS_LEN);
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        msg.truncate(end);
        if ELLIPSIS_LEN <= max_len {
            msg.push(ELLIPSIS);
        }
    }
    debug_assert!(msg.len() <= max_len);
}

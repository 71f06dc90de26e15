//! Failure taxonomy shared by every component.

use std::fmt;

/// What a failure means for the pipeline that hit it.
///
/// Component errors are converted into one of these before they reach the
/// scheduler or the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network blip or server error; retry with backoff.
    Transient,
    /// The remote API asked us to slow down; back off, keep position.
    Throttled,
    /// Retrying cannot help (bad credentials, broken contract); stop.
    Fatal,
    /// The recipient cannot be reached anymore; deactivate them.
    UserUnreachable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transient => "transient",
            Self::Throttled => "throttled",
            Self::Fatal => "fatal",
            Self::UserUnreachable => "user unreachable",
        };
        f.write_str(name)
    }
}

/// Shared error type used across all agentorch crates.
///
/// Variant names are a stable contract: the Controller maps them to the
/// `error.kind` field clients see on the wire, so renaming one is a
/// breaking change for callers, not just an internal refactor.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not permitted: {0}")]
    NotPermitted(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("transport: {0}")]
    TransportError(String),

    #[error("upstream {provider}: {message}")]
    Upstream { provider: String, message: String },

    #[error("tool loop exceeded bound of {bound} rounds")]
    ToolLoopExceeded { bound: u32 },

    #[error("phase {phase} failed: {message}")]
    PhaseFailed { phase: String, message: String },

    #[error("session interrupted")]
    SessionInterrupted,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("no such session: {0}")]
    NoSuchSession(String),

    #[error("config: {0}")]
    Config(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown: {0}")]
    Unknown(String),
}

impl Error {
    /// The stable `error.kind` string sent to clients over the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotPermitted(_) => "not_permitted",
            Error::InvalidArgs(_) => "invalid_args",
            Error::Timeout(_) => "timeout",
            Error::TransportError(_) => "transport_error",
            Error::Upstream { .. } => "upstream",
            Error::ToolLoopExceeded { .. } => "tool_loop_exceeded",
            Error::PhaseFailed { .. } => "phase_failed",
            Error::SessionInterrupted => "session_interrupted",
            Error::BadRequest(_) => "bad_request",
            Error::NoSuchSession(_) => "no_such_session",
            Error::Config(_) => "config",
            Error::Io(_) | Error::Json(_) | Error::Unknown(_) => "unknown",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_for_each_variant() {
        assert_eq!(Error::NotPermitted("x".into()).kind(), "not_permitted");
        assert_eq!(Error::SessionInterrupted.kind(), "session_interrupted");
        assert_eq!(
            Error::ToolLoopExceeded { bound: 8 }.kind(),
            "tool_loop_exceeded"
        );
        assert_eq!(
            Error::Upstream {
                provider: "p".into(),
                message: "m".into()
            }
            .kind(),
            "upstream"
        );
    }
}

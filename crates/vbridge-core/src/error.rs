/// Call-scoped failure kinds. Upstream non-200 responses are not errors:
/// they travel back to the caller verbatim as ordinary replies.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No upstream credential could be produced for this call.
    #[error("no valid token available")]
    NoValidToken,
    /// The credential backend rejected or failed a refresh attempt.
    #[error("credential refresh failed: {0}")]
    Credential(String),
    /// A capability was invoked on an auth variant that cannot perform it.
    #[error("{0}")]
    Unsupported(&'static str),
    /// The process configuration rules out the requested construction.
    #[error("invalid configuration: {0}")]
    Config(&'static str),
    /// Transport-level failure talking to the upstream.
    #[error("upstream transport error: {0}")]
    Transport(String),
    /// The upstream answered 200 with a body this gateway cannot decode.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
    #[error("{0}")]
    Internal(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

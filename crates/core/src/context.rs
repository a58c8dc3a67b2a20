//! Per-request context threaded through every pipeline stage.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identity and cancellation scope of one request.
///
/// Cloning is cheap; clones share the same cancellation token so a cancel
/// issued by the caller reaches every stage and every in-flight call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Session the request belongs to.
    pub session_id: String,
    /// User who issued the request.
    pub user_id: String,
    /// Raw user text, when known. Feeds the context-size complexity signal.
    pub user_input: Option<String>,
    /// Cancellation scope.
    pub cancel: CancellationToken,
}

impl RequestContext {
    /// Create a context with a fresh cancellation token.
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            user_input: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Anonymous context with a generated session id.
    pub fn anonymous() -> Self {
        Self::new(Uuid::new_v4().to_string(), "anonymous")
    }

    /// Attach the raw user text.
    pub fn with_user_input(mut self, input: impl Into<String>) -> Self {
        self.user_input = Some(input.into());
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Whether the caller has cancelled this request.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::anonymous()
    }
}

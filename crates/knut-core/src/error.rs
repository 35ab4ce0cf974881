// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Failures of a chat turn, split by recovery policy.
///
/// Auth and provider failures terminate the turn (`error` chunk then
/// `complete`); tool failures never appear here — they travel in-band as
/// error-shaped tool results so the model can react.  Persistence failures
/// are logged and do not affect the turn's visible output.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown mode: {0}")]
    UnknownMode(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// No credential and no environment fallback; raised before the provider
    /// call is attempted.
    #[error("authentication required for {0}")]
    AuthMissing(String),

    /// Network failure, non-2xx response, or a malformed stream.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("cancelled")]
    Cancelled,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(ChatError::Cancelled.to_string(), "cancelled");
        assert_eq!(
            ChatError::UnknownMode("zen".into()).to_string(),
            "unknown mode: zen"
        );
        assert_eq!(
            ChatError::Provider("boom".into()).to_string(),
            "provider error: boom"
        );
    }
}

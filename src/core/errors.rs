/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use crate::core::data_structures::InlineString;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Synchronization errors with serialization support
///
/// Every variant is returned to the immediate caller; a failed acquisition or
/// append leaves the primitive's invariants intact for all other participants.
/// Nothing in this crate retries automatically - retry policy belongs to the
/// caller.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SyncError {
    #[error("Lock '{0}' acquisition timed out")]
    #[diagnostic(
        code(sync::lock_timeout),
        help("The acquisition deadline elapsed while waiting. Retry, extend the timeout, or fail the enclosing operation.")
    )]
    LockTimeout(InlineString),

    #[error("Lock '{0}' wait was cancelled")]
    #[diagnostic(
        code(sync::lock_cancelled),
        help("The waiting request was revoked before being granted. The lock was closed by its owner.")
    )]
    LockCancelled(InlineString),

    #[error("Ring buffer full (capacity {0})")]
    #[diagnostic(
        code(sync::buffer_full),
        help("Reject-mode append hit capacity. Drain via recent()/read_from() before retrying, or switch to overwrite-oldest.")
    )]
    BufferFull(usize),

    #[error("Invalid capacity: {0}")]
    #[diagnostic(
        code(sync::invalid_capacity),
        help("Ring buffer capacity must be a positive integer.")
    )]
    InvalidCapacity(usize),

    #[error("Invalid resource key: {0}")]
    #[diagnostic(
        code(sync::resource_key_invalid),
        help("Registry keys must be non-empty and free of control characters.")
    )]
    ResourceKeyInvalid(InlineString),
}

/// Result type for synchronization operations
///
/// # Must Use
/// Acquisition and append failures must be handled; silently dropping them
/// loses records or starves waiters
pub type Result<T> = std::result::Result<T, SyncError>;

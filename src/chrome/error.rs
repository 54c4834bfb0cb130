//! Browser lifecycle error types.

use thiserror::Error;

use crate::cdp::CdpError;

/// Errors from instance and pool management.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Chrome could not be started.
    #[error("failed to launch chrome: {0}")]
    LaunchFailed(String),

    /// Waiting for the browser process exceeded the deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The idle timer already fired and the instance is being torn down.
    #[error("instance already timed out")]
    InstanceGone,

    /// An operation needed the DevTools connection before it was attached.
    #[error("not connected to devtools")]
    NotConnected,

    /// Lookup of an unknown pool entry.
    #[error("no instance with id {0}")]
    InstanceNotFound(u64),

    /// Lookup of a URL for an unknown pool entry.
    #[error("no url recorded for instance {0}")]
    UrlNotFound(u64),

    /// The pool producer stopped; no instances will become ready.
    #[error("instance pool is closed")]
    PoolClosed,

    /// A DevTools reply was missing a required field.
    #[error("malformed devtools response: {0}")]
    MalformedResponse(String),

    /// Connection-level failure.
    #[error(transparent)]
    Cdp(#[from] CdpError),

    /// Filesystem or process I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//! Typed errors and result alias for kernel operations.

use thiserror::Error;

/// Result alias for kernel operations.
pub type KernelResult<T> = std::result::Result<T, KernelError>;

/// Errors that can surface from the simulation kernel.
///
/// The registry aggregates per-target outcomes and never propagates these
/// out of `call_service`; the store and scheduler raise only
/// [`KernelError::InvalidArgument`] and [`KernelError::Fatal`] from their
/// public operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// A caller-supplied value was rejected before any state mutation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced entity does not exist.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// No behavior engine is registered for the domain.
    #[error("no engine registered for domain: {0}")]
    UnknownDomain(String),

    /// The domain's engine does not advertise the service.
    #[error("unknown service: {domain}.{service}")]
    UnknownService { domain: String, service: String },

    /// An engine service handler failed; surfaced per-target, the batch
    /// continues.
    #[error("service handler failed for {entity_id}: {reason}")]
    HandlerFailure { entity_id: String, reason: String },

    /// A state listener panicked during fan-out; the write still commits.
    #[error("state listener failed: {0}")]
    SubscriberFailure(String),

    /// A scheduler or clock invariant was violated; aborts the simulator.
    #[error("fatal kernel error: {0}")]
    Fatal(String),
}

impl KernelError {
    /// Shorthand for an [`KernelError::InvalidArgument`] with a formatted
    /// message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        KernelError::InvalidArgument(msg.into())
    }
}

//! Error types

use std::io;

use thiserror::Error;

use crate::tier::PriorityTier;

/// A priority request the platform could not honour. Never fatal.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("worker {worker} has no registered thread yet")]
    Unregistered { worker: String },

    #[error("failed to apply {tier} tier to {worker}: {source}")]
    SetSchedParam {
        worker: String,
        tier: PriorityTier,
        #[source]
        source: io::Error,
    },

    #[error("priority request for {worker} rejected: {reason}")]
    Rejected { worker: String, reason: String },
}

/// Release attempted by someone who does not hold the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReleaseError {
    #[error("resource is not held")]
    NotHeld,

    #[error("resource is held by another worker")]
    NotOwner,
}

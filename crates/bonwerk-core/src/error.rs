// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Bonwerk.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::TransportKind;

/// Top-level error type for all Bonwerk operations.
#[derive(Debug, Error)]
pub enum BonwerkError {
    // -- Transport errors --
    #[error("{target} is unreachable: {detail}")]
    Unreachable { target: String, detail: String },

    #[error("no {transport} device matches {identifier}")]
    NotFound {
        transport: TransportKind,
        identifier: String,
    },

    #[error("access to {0} transport has not been granted")]
    PermissionDenied(TransportKind),

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("unexpected response from {target}: {detail}")]
    ProtocolMismatch { target: String, detail: String },

    #[error("print operation {operation} failed: {detail}")]
    OperationFailed { operation: String, detail: String },

    // -- Configuration / model --
    #[error("invalid printer configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid job state transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("job {0} not found")]
    JobNotFound(String),

    // -- Discovery --
    #[error("printer discovery failed: {0}")]
    Discovery(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Platform bridge --
    #[error("platform bridge error: {0}")]
    Bridge(String),

    #[error("feature not available on this platform")]
    PlatformUnavailable,
}

/// Serialisable classification of a [`BonwerkError`], stored with job
/// records so observers can branch on the cause without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Unreachable,
    NotFound,
    PermissionDenied,
    Timeout,
    ProtocolMismatch,
    OperationFailed,
    InvalidConfig,
    Internal,
}

impl BonwerkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unreachable { .. } => ErrorKind::Unreachable,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ProtocolMismatch { .. } => ErrorKind::ProtocolMismatch,
            Self::OperationFailed { .. } => ErrorKind::OperationFailed,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::InvalidTransition { .. }
            | Self::JobNotFound(_)
            | Self::Discovery(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Bridge(_)
            | Self::PlatformUnavailable => ErrorKind::Internal,
        }
    }

    pub fn unreachable(target: impl Into<String>, detail: impl ToString) -> Self {
        Self::Unreachable {
            target: target.into(),
            detail: detail.to_string(),
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BonwerkError>;

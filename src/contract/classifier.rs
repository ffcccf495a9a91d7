//! Revert classification
//!
//! Decoding order: the direct target's ABI first; a forwarded-call sentinel
//! is unwrapped once and its payload tried against every registered ABI; a
//! payload the target cannot decode at all is also tried against the
//! registry. Whatever is recovered maps to an HTTP status.

use super::{AbiRegistry, ContractAbi, DecodedError};
use crate::error::{ChainError, ClassifiedError, ErrorKind};

use axum::http::StatusCode;
use std::sync::Arc;
use tracing::debug;

/// Outcome of decoding a revert payload
#[derive(Debug, Clone, PartialEq)]
pub enum RevertDecoding {
    Decoded(DecodedError),
    Unrecognized,
}

impl From<Option<DecodedError>> for RevertDecoding {
    fn from(decoded: Option<DecodedError>) -> Self {
        decoded.map_or(RevertDecoding::Unrecognized, RevertDecoding::Decoded)
    }
}

/// HTTP status for a decoded custom error name
pub fn status_for_error(name: &str) -> StatusCode {
    match name {
        "MISSING_ROLE" | "NotOwner" | "NotCreator" => StatusCode::FORBIDDEN,
        "PAYMENT_TOKEN_NOT_ACCEPTED" => StatusCode::NOT_ACCEPTABLE,
        "TokenUriAlreadyFrozen" => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

pub struct ErrorClassifier {
    registry: Arc<AbiRegistry>,
    /// Custom error name wrapping a forwarded call's revert
    meta_call_error: String,
}

impl ErrorClassifier {
    pub fn new(registry: Arc<AbiRegistry>, meta_call_error: impl Into<String>) -> Self {
        Self {
            registry,
            meta_call_error: meta_call_error.into(),
        }
    }

    /// Decode a raw revert payload returned for a call to `target`
    pub fn decode(&self, data: &[u8], target: &ContractAbi) -> RevertDecoding {
        match target.decode_error(data) {
            Some(wrapper) if wrapper.name == self.meta_call_error => {
                match wrapper.nested_payload() {
                    Some(inner) => {
                        debug!("Unwrapping forwarded call error from {}", target.name);
                        self.registry.decode_error_any(inner).into()
                    }
                    None => RevertDecoding::Decoded(wrapper),
                }
            }
            Some(decoded) => RevertDecoding::Decoded(decoded),
            None => self.registry.decode_error_any(data).into(),
        }
    }

    /// Turn a failed simulation or broadcast into the caller-facing error
    pub fn classify(&self, kind: ErrorKind, cause: ChainError, target: &ContractAbi) -> ClassifiedError {
        let decoding = match cause.revert_data() {
            Some(data) => self.decode(data, target),
            None => RevertDecoding::Unrecognized,
        };

        match decoding {
            RevertDecoding::Decoded(error) => ClassifiedError::new(
                kind,
                status_for_error(&error.name),
                error.message(),
                Some(error.name),
                Some(cause.into()),
            ),
            RevertDecoding::Unrecognized => ClassifiedError::opaque(
                format!("Call to {} failed without a recognizable error", target.name),
                Some(cause.into()),
            ),
        }
    }
}

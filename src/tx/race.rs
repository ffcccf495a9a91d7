//! Detection of broadcasts that lost the race for their nonce

use crate::error::ChainError;

use serde_json::Value;

const RACE_MESSAGES: [&str; 3] = [
    "nonce too low",
    "already known",
    "replacement transaction underpriced",
];

/// Decides whether a broadcast failure means another transaction already took the nonce
pub trait NonceRacePredicate: Send + Sync {
    fn is_nonce_race(&self, err: &ChainError) -> bool;
}

/// Matches the node messages geth-style clients use for used nonces, either
/// on the error itself or on a nested error object carrying one of the
/// configured JSON-RPC codes.
///
/// A code alone is not enough: `-32000` also covers insufficient funds and
/// intrinsic gas failures, which must not be retried.
#[derive(Debug, Clone)]
pub struct CodeAndMessagePredicate {
    codes: Vec<i64>,
}

impl CodeAndMessagePredicate {
    pub fn new(codes: Vec<i64>) -> Self {
        Self { codes }
    }

    fn nested_race(&self, value: &Value) -> bool {
        match value {
            Value::Object(map) => {
                let coded = map
                    .get("code")
                    .and_then(Value::as_i64)
                    .map_or(false, |code| self.codes.contains(&code));
                let here = coded
                    && map
                        .get("message")
                        .and_then(Value::as_str)
                        .map_or(false, is_race_message);
                here || map.values().any(|v| self.nested_race(v))
            }
            Value::Array(items) => items.iter().any(|v| self.nested_race(v)),
            _ => false,
        }
    }
}

fn is_race_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    RACE_MESSAGES.iter().any(|m| lowered.contains(m))
}

impl NonceRacePredicate for CodeAndMessagePredicate {
    fn is_nonce_race(&self, err: &ChainError) -> bool {
        let ChainError::Rpc { message, data, .. } = err else {
            return false;
        };

        is_race_message(message) || data.as_ref().map_or(false, |d| self.nested_race(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;
    use serde_json::json;

    fn rpc(code: i64, message: &str, data: Option<Value>) -> ChainError {
        ChainError::Rpc {
            code,
            message: message.to_string(),
            data,
        }
    }

    #[test]
    fn test_generic_code_alone_is_not_a_race() {
        let predicate = CodeAndMessagePredicate::new(vec![-32000]);
        assert!(!predicate.is_nonce_race(&rpc(
            -32000,
            "insufficient funds for gas * price + value",
            None
        )));
        assert!(!predicate.is_nonce_race(&rpc(-32000, "intrinsic gas too low", None)));
        assert!(predicate.is_nonce_race(&rpc(-32000, "nonce too low", None)));
    }

    #[test]
    fn test_coded_race_nested_in_data() {
        let predicate = CodeAndMessagePredicate::new(vec![-32000]);
        let data = json!({ "error": { "body": { "error": { "code": -32000, "message": "already known" } } } });
        assert!(predicate.is_nonce_race(&rpc(-32603, "relay failed", Some(data))));
    }

    #[test]
    fn test_nested_code_without_race_message() {
        let predicate = CodeAndMessagePredicate::new(vec![-32000]);
        let data = json!({ "error": { "code": -32000, "message": "insufficient funds" } });
        assert!(!predicate.is_nonce_race(&rpc(-32603, "relay failed", Some(data))));
    }

    #[test]
    fn test_nested_race_message_needs_configured_code() {
        let predicate = CodeAndMessagePredicate::new(vec![-32000]);
        let data = json!({ "error": { "code": -32099, "message": "nonce too low" } });
        assert!(!predicate.is_nonce_race(&rpc(-32603, "relay failed", Some(data))));
    }

    #[test]
    fn test_message_without_code() {
        let predicate = CodeAndMessagePredicate::new(vec![]);
        assert!(predicate.is_nonce_race(&rpc(-32010, "Nonce too low: next nonce 12", None)));
        assert!(predicate.is_nonce_race(&rpc(-32010, "already known", None)));
        assert!(predicate.is_nonce_race(&rpc(
            -32010,
            "replacement transaction underpriced",
            None
        )));
    }

    #[test]
    fn test_reverts_and_transport_never_race() {
        let predicate = CodeAndMessagePredicate::new(vec![-32000]);
        assert!(!predicate.is_nonce_race(&ChainError::Reverted {
            message: "execution reverted".to_string(),
            data: Bytes::new(),
        }));
        assert!(!predicate.is_nonce_race(&ChainError::Transport("nonce too low".to_string())));
    }
}

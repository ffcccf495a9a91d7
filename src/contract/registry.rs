//! Ordered registry of every contract ABI the operator talks to

use super::{ContractAbi, DecodedError};
use crate::config::ContractAbiConfig;
use crate::error::{OperatorError, OperatorResult};

use ethers::abi::Abi;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// ABIs in configuration order; decoding tries them first to last
#[derive(Debug, Clone, Default)]
pub struct AbiRegistry {
    contracts: Vec<Arc<ContractAbi>>,
}

impl AbiRegistry {
    pub fn new(contracts: Vec<ContractAbi>) -> Self {
        Self {
            contracts: contracts.into_iter().map(Arc::new).collect(),
        }
    }

    /// Load every configured ABI file
    pub fn load(configs: &[ContractAbiConfig]) -> OperatorResult<Self> {
        let mut contracts = Vec::with_capacity(configs.len());
        for config in configs {
            let abi = load_abi_file(&config.abi_path)?;
            info!(
                "Registered ABI {} ({} errors, {} functions)",
                config.name,
                abi.errors.len(),
                abi.functions.len()
            );
            contracts.push(ContractAbi::new(config.name.clone(), abi));
        }
        Ok(Self::new(contracts))
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// First ABI that declares an error matching `data`
    pub fn decode_error_any(&self, data: &[u8]) -> Option<DecodedError> {
        self.contracts.iter().find_map(|c| c.decode_error(data))
    }
}

/// Accepts a bare ABI array or a build artifact with an `abi` field
fn load_abi_file(path: &Path) -> OperatorResult<Abi> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| OperatorError::Abi(format!("Failed to read {:?}: {}", path, e)))?;
    parse_abi(&raw).map_err(|e| OperatorError::Abi(format!("{:?}: {}", path, e)))
}

fn parse_abi(raw: &str) -> Result<Abi, serde_json::Error> {
    let value: Value = serde_json::from_str(raw)?;
    let abi = match value {
        Value::Object(mut artifact) if artifact.contains_key("abi") => {
            artifact.remove("abi").unwrap_or(Value::Array(Vec::new()))
        }
        other => other,
    };
    serde_json::from_value(abi)
}

//! Contract ABIs known to the operator
//!
//! Provides decoding of outgoing call data, receipt logs and custom error
//! payloads, and the classifier that turns revert data into caller-facing
//! errors.

pub mod classifier;
pub mod registry;

pub use classifier::{status_for_error, ErrorClassifier, RevertDecoding};
pub use registry::AbiRegistry;

use crate::model::CallDescriptor;

use ethers::abi::ethabi::AbiError;
use ethers::abi::{Abi, ParamType, RawLog, Token};
use ethers::types::{Address, Log, I256};

/// A named contract ABI
#[derive(Debug, Clone)]
pub struct ContractAbi {
    pub name: String,
    pub abi: Abi,
}

/// A custom error recovered from revert data
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedError {
    pub name: String,
    pub args: Vec<Token>,
}

impl DecodedError {
    /// `Name: [arg, arg]`
    pub fn message(&self) -> String {
        let args: Vec<String> = self.args.iter().map(render_token).collect();
        format!("{}: [{}]", self.name, args.join(", "))
    }

    /// First `bytes` argument, the wrapped payload of a forwarded-call error
    pub fn nested_payload(&self) -> Option<&[u8]> {
        self.args.iter().find_map(|token| match token {
            Token::Bytes(bytes) => Some(bytes.as_slice()),
            _ => None,
        })
    }
}

/// A receipt log decoded against an event of the ABI
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub name: String,
    pub args: Vec<String>,
}

impl std::fmt::Display for DecodedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.args.join(","))
    }
}

impl ContractAbi {
    pub fn new(name: impl Into<String>, abi: Abi) -> Self {
        Self {
            name: name.into(),
            abi,
        }
    }

    /// Decode a custom error declared in this ABI; `None` if the selector is unknown
    /// or the arguments do not fit the declaration
    pub fn decode_error(&self, data: &[u8]) -> Option<DecodedError> {
        if data.len() < 4 {
            return None;
        }
        let (selector, payload) = data.split_at(4);

        self.abi
            .errors
            .values()
            .flatten()
            .filter(|error| error_selector(*error)[..] == *selector)
            .find_map(|error| {
                let types: Vec<ParamType> = error.inputs.iter().map(|p| p.kind.clone()).collect();
                ethers::abi::decode(&types, payload)
                    .ok()
                    .map(|args| DecodedError {
                        name: error.name.clone(),
                        args,
                    })
            })
    }

    /// Describe an outgoing call; unknown selectors are reported as `unknown`
    pub fn describe_call(&self, from: Address, to: Address, data: &[u8]) -> CallDescriptor {
        let decoded = (data.len() >= 4)
            .then(|| {
                let (selector, payload) = data.split_at(4);
                self.abi
                    .functions
                    .values()
                    .flatten()
                    .find(|f| f.short_signature()[..] == *selector)
                    .and_then(|f| {
                        f.decode_input(payload)
                            .ok()
                            .map(|tokens| (f.name.clone(), tokens))
                    })
            })
            .flatten();

        let (function_name, arguments) = match decoded {
            Some((name, tokens)) => (name, tokens.iter().map(render_token).collect()),
            None => ("unknown".to_string(), Vec::new()),
        };

        CallDescriptor {
            from,
            to,
            function_name,
            arguments,
        }
    }

    /// Decode a receipt log against this ABI's events
    pub fn decode_log(&self, log: &Log) -> Option<DecodedLog> {
        let topic = log.topics.first()?;
        let event = self
            .abi
            .events
            .values()
            .flatten()
            .find(|e| !e.anonymous && e.signature() == *topic)?;

        let parsed = event
            .parse_log(RawLog {
                topics: log.topics.clone(),
                data: log.data.to_vec(),
            })
            .ok()?;

        Some(DecodedLog {
            name: event.name.clone(),
            args: parsed.params.iter().map(|p| render_token(&p.value)).collect(),
        })
    }
}

/// Four-byte selector of a custom error
pub fn error_selector(error: &AbiError) -> [u8; 4] {
    let types: Vec<String> = error.inputs.iter().map(|p| p.kind.to_string()).collect();
    ethers::utils::id(format!("{}({})", error.name, types.join(",")))
}

/// Render a token the way operators read it in logs: decimal numbers, 0x-prefixed bytes
pub fn render_token(token: &Token) -> String {
    match token {
        Token::Address(address) => format!("{:?}", address),
        Token::Uint(value) => value.to_string(),
        Token::Int(value) => I256::from_raw(*value).to_string(),
        Token::Bool(value) => value.to_string(),
        Token::String(value) => value.clone(),
        Token::Bytes(bytes) | Token::FixedBytes(bytes) => format!("0x{}", hex::encode(bytes)),
        Token::Array(items) | Token::FixedArray(items) | Token::Tuple(items) => {
            let rendered: Vec<String> = items.iter().map(render_token).collect();
            format!("[{}]", rendered.join(","))
        }
    }
}

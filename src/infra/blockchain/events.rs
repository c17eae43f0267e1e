//! Event log reconstruction for chains without EVM-style receipt logs.
//!
//! The Tron event API reports decoded events (`event_name`, `result`) for every
//! contract a transaction touched. The decoder keeps only allow-listed
//! contracts, looks up the contract's event ABI, and re-encodes each event into
//! the topics/data layout an EVM node would have returned, so downstream
//! routing and handlers stay chain-agnostic.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::{Address, B256, I256, U256, keccak256};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::address;
use crate::domain::{AppError, ContractAddressMap, DecodeError, Log};

/// One event as reported by the Tron event query endpoint
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawTronEvent {
    pub contract_address: String,
    pub event_name: String,
    #[serde(default)]
    pub event_index: u32,
    #[serde(default)]
    pub block_number: u64,
    /// Milliseconds
    #[serde(default)]
    pub block_timestamp: i64,
    #[serde(default)]
    pub result: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub result_type: HashMap<String, String>,
}

/// Event ABIs keyed by contract name
#[derive(Debug, Clone, Default)]
pub struct EventSchemaRegistry {
    schemas: HashMap<String, JsonAbi>,
}

impl EventSchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract's ABI from its JSON text
    pub fn insert_json(&mut self, contract_name: &str, abi_json: &str) -> Result<(), AppError> {
        let abi: JsonAbi = serde_json::from_str(abi_json).map_err(|e| {
            DecodeError::InvalidAbi(format!("{}: {}", contract_name, e))
        })?;
        self.schemas.insert(contract_name.to_string(), abi);
        Ok(())
    }

    /// Load every `<ContractName>.json` file in a directory
    pub fn from_dir(dir: &Path) -> Result<Self, AppError> {
        let mut registry = Self::new();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            DecodeError::InvalidAbi(format!("cannot read {}: {}", dir.display(), e))
        })?;

        for entry in entries {
            let path = entry
                .map_err(|e| DecodeError::InvalidAbi(e.to_string()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = std::fs::read_to_string(&path).map_err(|e| {
                DecodeError::InvalidAbi(format!("cannot read {}: {}", path.display(), e))
            })?;
            registry.insert_json(name, &text)?;
        }

        info!(count = registry.len(), dir = %dir.display(), "Loaded event schemas");
        Ok(registry)
    }

    #[must_use]
    pub fn get(&self, contract_name: &str) -> Option<&JsonAbi> {
        self.schemas.get(contract_name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Rebuilds EVM-shaped logs from Tron events
#[derive(Debug, Clone)]
pub struct EventLogDecoder {
    contracts: ContractAddressMap,
    schemas: EventSchemaRegistry,
}

impl EventLogDecoder {
    #[must_use]
    pub fn new(contracts: ContractAddressMap, schemas: EventSchemaRegistry) -> Self {
        Self { contracts, schemas }
    }

    /// Allow-listed contracts with no event ABI loaded.
    ///
    /// Their events could never be decoded, so a non-empty result is a
    /// startup error rather than a stream of stuck Pending transactions.
    #[must_use]
    pub fn missing_schemas(&self) -> Vec<String> {
        self.contracts
            .names()
            .into_iter()
            .filter(|name| self.schemas.get(name).is_none())
            .map(str::to_string)
            .collect()
    }

    /// Decode the allow-listed events of one transaction, in emission order
    pub fn decode(&self, events: &[RawTronEvent]) -> Result<Vec<Log>, AppError> {
        let mut ordered: Vec<&RawTronEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.event_index);

        let mut logs = Vec::new();
        for event in ordered {
            let Ok(contract) = address::to_base58(&event.contract_address) else {
                warn!(address = %event.contract_address, "Skipping event with malformed contract address");
                continue;
            };
            let Some(contract_name) = self.contracts.name_of(&contract) else {
                debug!(address = %contract, event = %event.event_name, "Event from unlisted contract ignored");
                continue;
            };
            logs.push(self.encode_event(contract_name, &contract, event)?);
        }
        Ok(logs)
    }

    fn encode_event(
        &self,
        contract_name: &str,
        contract: &str,
        raw: &RawTronEvent,
    ) -> Result<Log, AppError> {
        let abi = self
            .schemas
            .get(contract_name)
            .ok_or_else(|| DecodeError::SchemaNotFound(contract_name.to_string()))?;
        let event = select_event(abi, raw).ok_or_else(|| DecodeError::EventNotFound {
            contract: contract_name.to_string(),
            event: raw.event_name.clone(),
        })?;

        let mut topics = Vec::new();
        if !event.anonymous {
            topics.push(event.selector().to_string());
        }
        let mut data_values = Vec::new();

        for (position, param) in event.inputs.iter().enumerate() {
            let ty = param.resolve().map_err(|e| DecodeError::InvalidField {
                field: param.name.clone(),
                message: e.to_string(),
            })?;
            let raw_value = raw
                .result
                .get(&param.name)
                .or_else(|| raw.result.get(&position.to_string()))
                .ok_or_else(|| DecodeError::InvalidField {
                    field: param.name.clone(),
                    message: "missing from event result".to_string(),
                })?;

            if param.indexed {
                topics.push(indexed_topic(&param.name, &ty, raw_value)?.to_string());
            } else {
                data_values.push(to_dyn_value(&param.name, &ty, raw_value)?);
            }
        }

        let data = if data_values.is_empty() {
            "0x".to_string()
        } else {
            format!(
                "0x{}",
                hex::encode(DynSolValue::Tuple(data_values).abi_encode_params())
            )
        };

        Ok(Log {
            address: contract.to_string(),
            topics,
            data,
        })
    }
}

fn select_event<'a>(abi: &'a JsonAbi, raw: &RawTronEvent) -> Option<&'a Event> {
    let candidates = abi.events.get(&raw.event_name)?;
    if candidates.len() == 1 || raw.result_type.is_empty() {
        return candidates.first();
    }
    candidates
        .iter()
        .find(|e| e.inputs.len() == raw.result_type.len())
        .or_else(|| candidates.first())
}

fn field_error(field: &str, message: impl Into<String>) -> AppError {
    AppError::Decode(DecodeError::InvalidField {
        field: field.to_string(),
        message: message.into(),
    })
}

fn as_text(field: &str, value: &serde_json::Value) -> Result<String, AppError> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(field_error(field, format!("unsupported value {}", other))),
    }
}

fn decode_hex(field: &str, text: &str) -> Result<Vec<u8>, AppError> {
    hex::decode(text.strip_prefix("0x").unwrap_or(text))
        .map_err(|e| field_error(field, format!("bad hex: {}", e)))
}

/// Convert one event field into its ABI value
pub(crate) fn to_dyn_value(
    field: &str,
    ty: &DynSolType,
    value: &serde_json::Value,
) -> Result<DynSolValue, AppError> {
    let text = as_text(field, value)?;
    match ty {
        DynSolType::Address => {
            let body = address::tron_to_evm_bytes(&text)
                .map_err(|_| field_error(field, format!("bad address {}", text)))?;
            Ok(DynSolValue::Address(Address::from(body)))
        }
        DynSolType::Uint(bits) => {
            let n = U256::from_str(&text).map_err(|e| field_error(field, e.to_string()))?;
            Ok(DynSolValue::Uint(n, *bits))
        }
        DynSolType::Int(bits) => {
            let n = I256::from_str(&text).map_err(|e| field_error(field, e.to_string()))?;
            Ok(DynSolValue::Int(n, *bits))
        }
        DynSolType::Bool => match text.as_str() {
            "true" | "1" => Ok(DynSolValue::Bool(true)),
            "false" | "0" => Ok(DynSolValue::Bool(false)),
            other => Err(field_error(field, format!("bad bool {}", other))),
        },
        DynSolType::Bytes => Ok(DynSolValue::Bytes(decode_hex(field, &text)?)),
        DynSolType::FixedBytes(size) => {
            let bytes = decode_hex(field, &text)?;
            if bytes.len() > *size {
                return Err(field_error(field, format!("expected {} bytes", size)));
            }
            let mut word = [0u8; 32];
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(DynSolValue::FixedBytes(B256::from(word), *size))
        }
        DynSolType::String => Ok(DynSolValue::String(text)),
        other => Err(field_error(
            field,
            format!("unsupported type {}", other.sol_type_name()),
        )),
    }
}

/// Topic word for an indexed field.
///
/// Value types are their 32-byte encoding; dynamic types are hashed, and the
/// event API already reports them as the hash.
fn indexed_topic(
    field: &str,
    ty: &DynSolType,
    value: &serde_json::Value,
) -> Result<B256, AppError> {
    match ty {
        DynSolType::Bytes | DynSolType::String => {
            let text = as_text(field, value)?;
            let digits = text.strip_prefix("0x").unwrap_or(&text);
            if digits.len() == 64 && hex::decode(digits).is_ok() {
                return B256::from_str(digits).map_err(|e| field_error(field, e.to_string()));
            }
            let packed = to_dyn_value(field, ty, value)?.abi_encode_packed();
            Ok(keccak256(packed))
        }
        _ => {
            let word = to_dyn_value(field, ty, value)?.abi_encode();
            if word.len() != 32 {
                return Err(field_error(field, "indexed field is not a single word"));
            }
            Ok(B256::from_slice(&word))
        }
    }
}

//! Blockchain client implementations.
//!
//! EVM chains share one JSON-RPC adapter. Tron goes through its HTTP API and
//! has its event records re-encoded into EVM-shaped logs.

pub mod address;
pub mod events;
pub mod evm;
pub mod tron;

pub use events::{EventLogDecoder, EventSchemaRegistry, RawTronEvent};
pub use evm::{EvmChainAdapter, HttpJsonRpcProvider, JsonRpcProvider, RpcClientConfig};
pub use tron::{HttpTronApi, TronApi, TronChainAdapter};

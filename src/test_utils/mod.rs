//! Test doubles shared by unit and integration tests.

pub mod mocks;

pub use mocks::{
    FailingHandler, MockChainAdapter, MockConfig, MockDatabaseClient, RecordingHandler,
    sample_log, sample_payload, sample_receipt,
};

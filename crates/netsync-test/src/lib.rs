//! Integration test infrastructure for netsync
//!
//! Provides:
//! - A scripted command collaborator with per-host canned outputs and
//!   injected failures
//! - Device fact fixtures rendered as command outputs for a test platform
//! - A test bed wiring the scripted devices to an in-memory datastore
//! - Datastore verification helpers

mod executor;
pub mod fixtures;
mod verification;

pub use executor::ScriptedExecutor;
pub use fixtures::{DeviceFacts, TestBed, FIXTURE_PLATFORM};
pub use verification::{DatastoreVerifier, VerificationError, VerifyResult};

// crates/fee-gate-config/src/lib.rs
// ============================================================================
// Module: Fee Gate Config Library
// Description: Canonical fee-gate.toml model and validation.
// Purpose: Single source of truth for operator configuration.
// Dependencies: fee-gate-core, serde, toml
// ============================================================================

//! ## Overview
//! `fee-gate-config` defines the configuration model for the fee gate: which
//! storage backend to open, how the access gate treats routes and trials, and
//! where audit events go. Validation fails closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;

// crates/fee-gate-core/src/runtime/mod.rs
// ============================================================================
// Module: Fee Gate Runtime
// Description: Resolver, access gate, scoped queries, lifecycle and pipeline.
// Purpose: Enforce tenant isolation and entitlement for every request.
// Dependencies: crate::{audit, core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules implement the per-request flow (resolve, gate, activate,
//! scoped access) and the operator-facing lifecycle manager. Every entry
//! point takes the tenant context and `now` as explicit parameters.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod gate;
pub mod lifecycle;
pub mod pipeline;
pub mod resolver;
pub mod scoped;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use gate::AccessGate;
pub use gate::AccessGrant;
pub use gate::DEFAULT_EXEMPT_ROUTES;
pub use gate::Denial;
pub use gate::DenialReason;
pub use gate::ExemptRoutes;
pub use gate::GateDecision;
pub use lifecycle::LifecycleError;
pub use lifecycle::SubscriptionManager;
pub use lifecycle::SweepReport;
pub use lifecycle::TenantOverview;
pub use pipeline::ActiveRequest;
pub use pipeline::Admission;
pub use pipeline::RequestPipeline;
pub use resolver::resolve;
pub use scoped::QueryScope;
pub use scoped::ScopedError;
pub use scoped::ScopedQuery;
pub use scoped::scoped;
pub use store::InMemoryBackend;

// crates/fee-gate-cli/src/main.rs
// ============================================================================
// Module: Fee Gate CLI Entry Point
// Description: Operator commands for school tenants and the access gate.
// Purpose: Provision, renew, block and inspect schools against the configured store.
// Dependencies: clap, fee-gate-config, fee-gate-core, fee-gate-store-*, serde_json, thiserror
// ============================================================================

//! ## Overview
//! `fee-gate` is the operator surface of the platform. It loads
//! `fee-gate.toml`, opens the configured backend and runs one lifecycle
//! action per invocation. Mutating commands print the resulting record as one
//! JSON line. `check` runs a synthetic session through the full request
//! pipeline and exits non-zero when the request would be denied.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use fee_gate_config::FeeGateConfig;
use fee_gate_config::StorageBackend;
use fee_gate_core::AccessGate;
use fee_gate_core::Admission;
use fee_gate_core::AuditSink;
use fee_gate_core::NamespaceRouter;
use fee_gate_core::RenewalRequest;
use fee_gate_core::RequestPipeline;
use fee_gate_core::Session;
use fee_gate_core::SubscriptionLedger;
use fee_gate_core::SubscriptionManager;
use fee_gate_core::SubscriptionPlan;
use fee_gate_core::TenantDirectory;
use fee_gate_core::TenantId;
use fee_gate_core::Timestamp;
use fee_gate_core::Username;
use fee_gate_store_postgres::PostgresStore;
use fee_gate_store_sqlite::SqliteStore;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "fee-gate", version, disable_help_subcommand = true)]
struct Cli {
    /// Config file path (defaults to `FEE_GATE_CONFIG`, then ./fee-gate.toml).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Operator recorded as the actor of lifecycle actions.
    #[arg(long, value_name = "USERNAME", default_value = "operator", global = true)]
    actor: String,
    /// Evaluate as of this unix time in milliseconds instead of the clock.
    #[arg(long, value_name = "MILLIS", global = true)]
    now_ms: Option<i64>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a trial school with its first administrator.
    Provision(ProvisionCommand),
    /// List every school with its remaining entitlement.
    List(ListCommand),
    /// Show one school with its subscription, admin and recent notices.
    Show(TenantArg),
    /// Block a school.
    Block(TenantArg),
    /// Unblock a school and mark it active.
    Unblock(TenantArg),
    /// Record a paid renewal.
    Renew(RenewCommand),
    /// Record an expiry notice or reminder for one school.
    Notify(TenantArg),
    /// Record bulk reminders for every school inside the reminder window.
    NotifyAll,
    /// Lock lapsed schools and warn schools about to lapse.
    Sweep,
    /// Delete a school and everything it owns.
    Delete(DeleteCommand),
    /// Run a synthetic session through the access gate.
    Check(CheckCommand),
}

/// Arguments for `provision`.
#[derive(Args, Debug)]
struct ProvisionCommand {
    /// School display name.
    #[arg(long)]
    name: String,
    /// Username of the first school administrator.
    #[arg(long, value_name = "USERNAME")]
    admin: String,
}

/// Arguments for `list`.
#[derive(Args, Debug)]
struct ListCommand {
    /// Print a JSON array instead of a table.
    #[arg(long)]
    json: bool,
}

/// Single tenant argument.
#[derive(Args, Debug)]
struct TenantArg {
    /// Tenant id.
    #[arg(value_parser = parse_tenant_id)]
    tenant: TenantId,
}

/// Arguments for `renew`.
#[derive(Args, Debug)]
struct RenewCommand {
    /// Tenant id.
    #[arg(value_parser = parse_tenant_id)]
    tenant: TenantId,
    /// Plan sold: trial, 90days, 12months, 24months or absolute.
    #[arg(long, value_parser = parse_plan)]
    plan: SubscriptionPlan,
    /// Amount paid in minor currency units.
    #[arg(long, default_value_t = 0)]
    amount: i64,
    /// External payment reference.
    #[arg(long)]
    reference: Option<String>,
    /// Free-form notes.
    #[arg(long)]
    notes: Option<String>,
}

/// Arguments for `delete`.
#[derive(Args, Debug)]
struct DeleteCommand {
    /// Tenant id.
    #[arg(value_parser = parse_tenant_id)]
    tenant: TenantId,
    /// Confirm the irreversible delete.
    #[arg(long)]
    yes: bool,
}

/// Arguments for `check`.
#[derive(Args, Debug)]
struct CheckCommand {
    /// Route or endpoint being requested.
    route: String,
    /// Session username; omit for an anonymous session.
    #[arg(long)]
    username: Option<String>,
    /// Session role label.
    #[arg(long, default_value = "school_admin")]
    role: String,
    /// Raw session tenant id.
    #[arg(long, allow_hyphen_values = true)]
    tenant: Option<i64>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Loads configuration, opens the backend and dispatches the command.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let config = FeeGateConfig::load(cli.config.as_deref())
        .map_err(|err| CliError::new(err.to_string()))?;
    let audit = config.audit.open_sink().map_err(|err| CliError::new(err.to_string()))?;
    let now = cli.now_ms.map_or_else(Timestamp::now, Timestamp::from_unix_millis);
    let operator = Operator {
        config: &config,
        audit,
        actor: Username::new(cli.actor.trim()),
        now,
    };
    match config.storage.backend {
        StorageBackend::Sqlite => {
            let store = SqliteStore::new(&config.storage.sqlite_config())
                .map_err(|err| CliError::new(err.to_string()))?;
            operator.dispatch(store, cli.command)
        }
        StorageBackend::Postgres => {
            let settings = config.storage.postgres.clone().unwrap_or_default();
            let store =
                PostgresStore::new(&settings).map_err(|err| CliError::new(err.to_string()))?;
            operator.dispatch(store, cli.command)
        }
    }
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Shared state for one invocation.
struct Operator<'a> {
    /// Loaded configuration.
    config: &'a FeeGateConfig,
    /// Audit sink shared by the manager and the gate.
    audit: Arc<dyn AuditSink>,
    /// Actor recorded on lifecycle actions.
    actor: Username,
    /// Evaluation time.
    now: Timestamp,
}

impl Operator<'_> {
    /// Runs one command against an opened backend.
    fn dispatch<B>(&self, backend: B, command: Commands) -> CliResult<ExitCode>
    where
        B: TenantDirectory + SubscriptionLedger + NamespaceRouter + Clone,
    {
        let manager = SubscriptionManager::new(
            backend.clone(),
            self.config.gate.lifecycle_policy(),
            Arc::clone(&self.audit),
        );
        let (actor, now) = (&self.actor, self.now);
        match command {
            Commands::Provision(args) => {
                let tenant = manager
                    .provision(&args.name, &Username::new(args.admin.trim()), actor, now)
                    .map_err(lifecycle_error)?;
                write_json_line(&tenant)?;
            }
            Commands::List(args) => {
                let overview = manager.overview(now).map_err(lifecycle_error)?;
                if args.json {
                    write_json_line(&overview)?;
                } else {
                    for entry in &overview {
                        write_stdout_line(&format!(
                            "{}\t{}\t{}\t{}\t{}",
                            entry.tenant.id,
                            entry.tenant.name,
                            entry.tenant.subscription_status,
                            entry.tenant.subscription_plan,
                            entry.days_remaining
                        ))?;
                    }
                }
            }
            Commands::Show(args) => {
                let overview = manager.show(args.tenant, now).map_err(lifecycle_error)?;
                let text = serde_json::to_string_pretty(&overview)
                    .map_err(|err| CliError::new(format!("failed to encode output: {err}")))?;
                write_stdout_line(&text)?;
            }
            Commands::Block(args) => {
                write_json_line(&manager.block(args.tenant, actor, now).map_err(lifecycle_error)?)?;
            }
            Commands::Unblock(args) => {
                write_json_line(
                    &manager.unblock(args.tenant, actor, now).map_err(lifecycle_error)?,
                )?;
            }
            Commands::Renew(args) => {
                let request = RenewalRequest {
                    tenant_id: args.tenant,
                    plan: args.plan,
                    amount_paid_minor: args.amount,
                    payment_reference: args.reference,
                    notes: args.notes,
                };
                let (tenant, _) = manager.renew(request, actor, now).map_err(lifecycle_error)?;
                write_json_line(&tenant)?;
            }
            Commands::Notify(args) => {
                write_json_line(&manager.notify(args.tenant, now).map_err(lifecycle_error)?)?;
            }
            Commands::NotifyAll => {
                write_json_line(&manager.notify_all(now).map_err(lifecycle_error)?)?;
            }
            Commands::Sweep => {
                write_json_line(&manager.sweep(actor, now).map_err(lifecycle_error)?)?;
            }
            Commands::Delete(args) => {
                if !args.yes {
                    return Err(CliError::new(format!(
                        "refusing to delete tenant {} without --yes",
                        args.tenant
                    )));
                }
                manager.delete(args.tenant, actor, now).map_err(lifecycle_error)?;
                write_stdout_line(&format!("deleted tenant {}", args.tenant))?;
            }
            Commands::Check(args) => return self.check(backend, &args),
        }
        Ok(ExitCode::SUCCESS)
    }

    /// Runs a synthetic session through resolve, gate and namespace activation.
    fn check<B>(&self, backend: B, args: &CheckCommand) -> CliResult<ExitCode>
    where
        B: TenantDirectory + NamespaceRouter + Clone,
    {
        let gate = AccessGate::new(
            backend.clone(),
            self.config.gate.lifecycle_policy(),
            Arc::clone(&self.audit),
        );
        let pipeline = RequestPipeline::new(
            gate,
            backend,
            self.config.gate.exempt_routes(),
            Arc::clone(&self.audit),
        );
        let session = Session {
            logged_in: args.username.is_some(),
            username: args.username.clone(),
            role: Some(args.role.clone()),
            tenant_id: args.tenant,
        };
        match pipeline.admit(&session, &args.route, self.now) {
            Admission::Exempt => {
                write_stdout_line(&format!("exempt: {}", args.route))?;
                Ok(ExitCode::SUCCESS)
            }
            Admission::Admitted(request) => {
                let school = request.tenant().map_or_else(
                    || "all schools".to_string(),
                    |tenant| format!("tenant {} ({})", tenant.id, tenant.name),
                );
                write_stdout_line(&format!("allowed: {school}"))?;
                Ok(ExitCode::SUCCESS)
            }
            Admission::Denied(denial) => {
                write_stdout_line(&format!(
                    "denied: {} ({})",
                    denial.reason.as_str(),
                    denial.message
                ))?;
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses a positive tenant id argument.
fn parse_tenant_id(value: &str) -> Result<TenantId, String> {
    value
        .parse::<u64>()
        .ok()
        .and_then(TenantId::from_raw)
        .ok_or_else(|| format!("invalid tenant id: {value}"))
}

/// Parses a subscription plan label.
fn parse_plan(value: &str) -> Result<SubscriptionPlan, String> {
    value.parse::<SubscriptionPlan>().map_err(|err| err.to_string())
}

/// Maps a lifecycle failure into a CLI error.
fn lifecycle_error(err: impl std::fmt::Display) -> CliError {
    CliError::new(err.to_string())
}

/// Writes a value as one JSON line to stdout.
fn write_json_line<T: Serialize>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string(value)
        .map_err(|err| CliError::new(format!("failed to encode output: {err}")))?;
    write_stdout_line(&text)
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}

//! Groundwork CLI entrypoint.
//!
//! This is the main entrypoint for the groundwork command-line tool.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use groundwork_infra::cli::{Cli, Commands, OutputFormatter, StateCommands};
use groundwork_infra::descriptor::{
    find_descriptor_file, Descriptor, DescriptorParser, DescriptorValidator, StateBackend,
};
use groundwork_infra::engine::Engine;
use groundwork_infra::error::{ApplyError, GroundworkError, Result};
use groundwork_infra::provider::{Provider, SimulationProvider};
use groundwork_infra::state::{LocalStateStore, S3StateStore, StateStore};

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => {
            cmd_validate(cli.descriptor.as_ref(), warnings, &formatter)
        }
        Commands::Plan { detailed } => {
            cmd_plan(cli.descriptor.as_ref(), detailed, &formatter).await
        }
        Commands::Apply { yes, parallelism } => {
            cmd_apply(cli.descriptor.as_ref(), yes, parallelism, &formatter).await
        }
        Commands::Destroy { yes } => cmd_destroy(cli.descriptor.as_ref(), yes).await,
        Commands::Outputs => cmd_outputs(cli.descriptor.as_ref(), &formatter).await,
        Commands::Drift => cmd_drift(cli.descriptor.as_ref(), &formatter).await,
        Commands::State { command } => cmd_state(cli.descriptor.as_ref(), command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &PathBuf, force: bool) -> Result<()> {
    info!("Initializing new Groundwork project in: {}", path.display());

    let descriptor_path = path.join("groundwork.infra.yaml");
    let adopt_path = path.join("groundwork.adopt.example.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    // Check if files exist
    if !force && descriptor_path.exists() {
        eprintln!("Descriptor file already exists: {}", descriptor_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    // Create directory if needed
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    // Write descriptor template (fresh stand-up)
    let descriptor_template = include_str!("../templates/groundwork.infra.yaml");
    std::fs::write(&descriptor_path, descriptor_template)?;
    eprintln!("Created: {}", descriptor_path.display());

    // Write the adopt-existing variant for reference
    let adopt_template = include_str!("../templates/groundwork.adopt.example.yaml");
    std::fs::write(&adopt_path, adopt_template)?;
    eprintln!("Created: {}", adopt_path.display());

    // Write .env.example
    let env_template = include_str!("../templates/.env.example");
    std::fs::write(&env_path, env_template)?;
    eprintln!("Created: {}", env_path.display());

    // Write/update .gitignore
    let gitignore_content = ".env\n.groundwork/\n";
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".env") || !existing.contains(".groundwork") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Groundwork")?;
            if !existing.contains(".env") {
                writeln!(file, ".env")?;
            }
            if !existing.contains(".groundwork") {
                writeln!(file, ".groundwork/")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, gitignore_content)?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit groundwork.infra.yaml with your resources");
    eprintln!("     (or start from groundwork.adopt.example.yaml to adopt a running environment)");
    eprintln!("  2. Run 'groundwork validate' to check the descriptor");
    eprintln!("  3. Run 'groundwork plan' to see what would change");
    eprintln!("  4. Run 'groundwork apply' to reconcile");

    Ok(())
}

/// Validate the descriptor.
fn cmd_validate(
    descriptor_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let descriptor_file = resolve_descriptor_path(descriptor_path)?;
    info!("Validating descriptor: {}", descriptor_file.display());

    let parser = DescriptorParser::new().with_base_path(
        descriptor_file
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    );
    parser.load_dotenv()?;

    let descriptor = parser.load_file(&descriptor_file)?;

    let validator = DescriptorValidator::new();
    let result = validator.validate(&descriptor)?;

    if result.is_valid() {
        eprintln!("Descriptor is valid!");
        if show_warnings && !result.warnings.is_empty() {
            eprintln!("\nWarnings:");
            for warning in &result.warnings {
                eprintln!("  - {warning}");
            }
        }
    }

    // Show summary
    eprintln!("\nDescriptor summary:");
    eprintln!("  Project: {}", descriptor.project.name);
    eprintln!("  Environment: {}", descriptor.project.environment);
    eprintln!("  Resources: {}", descriptor.resources.len());
    eprintln!("  Protected: {}", descriptor.protected_names().len());
    eprintln!("  Adopted: {}", descriptor.adopted_count());
    eprintln!("  Exports: {}", descriptor.exports.len());

    let _ = formatter;
    Ok(())
}

/// Show the plan.
async fn cmd_plan(
    descriptor_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (descriptor, state_store) = load_descriptor_and_store(descriptor_path).await?;
    let provider = create_provider()?;

    let engine = Engine::new(&descriptor, &state_store, provider);
    let plan = engine.plan().await?;

    let output = formatter.format_plan(&plan);
    eprintln!("{output}");

    if detailed {
        eprintln!("\nDetailed changes:");
        for step in &plan.steps {
            for detail in &step.details {
                eprintln!(
                    "  {} {}.{}: {} -> {}{}",
                    step.action,
                    step.name,
                    detail.field,
                    detail.old_value.as_deref().unwrap_or("(none)"),
                    detail.new_value.as_deref().unwrap_or("(none)"),
                    if detail.forces_replacement {
                        " [forces replacement]"
                    } else {
                        ""
                    }
                );
            }
        }
    }

    Ok(())
}

/// Apply the plan.
async fn cmd_apply(
    descriptor_path: Option<&PathBuf>,
    auto_approve: bool,
    parallelism: usize,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (descriptor, state_store) = load_descriptor_and_store(descriptor_path).await?;
    let provider = create_provider()?;

    let cancel = Arc::new(AtomicBool::new(false));
    let engine = Engine::new(&descriptor, &state_store, provider)
        .with_parallelism(parallelism)
        .with_cancel_flag(Arc::clone(&cancel));

    let plan = engine.plan().await?;

    if plan.is_converged() {
        eprintln!("No changes to apply.");
        return Ok(());
    }

    // Show plan
    let output = formatter.format_plan(&plan);
    eprintln!("{output}");

    // Confirm
    if !auto_approve {
        eprint!("Do you want to apply this plan? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    // Serialize concurrent runs through the store's advisory lock.
    let lock = state_store.acquire_lock("").await?;

    // Ctrl-C stops scheduling new steps; in-flight calls finish and are
    // recorded before the run reports cancelled.
    let cancel_on_signal = Arc::clone(&cancel);
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested; finishing in-flight steps");
            cancel_on_signal.store(true, Ordering::SeqCst);
        }
    });

    let outcome = engine.apply(&plan).await;
    signal_task.abort();
    state_store.release_lock(&lock.lock_id).await?;
    let report = outcome?;

    eprintln!("{}", formatter.format_report(&report));

    if report.apply.cancelled {
        return Err(GroundworkError::Apply(ApplyError::Cancelled {
            completed: report.apply.succeeded + report.apply.noop,
        }));
    }
    if !report.apply.success {
        return Err(GroundworkError::Apply(ApplyError::Incomplete {
            failed: report.apply.failed,
            blocked: report.apply.blocked,
        }));
    }

    Ok(())
}

/// Destroy managed resources.
async fn cmd_destroy(descriptor_path: Option<&PathBuf>, auto_approve: bool) -> Result<()> {
    let (descriptor, state_store) = load_descriptor_and_store(descriptor_path).await?;
    let provider = create_provider()?;

    let Some(state) = state_store.load().await? else {
        eprintln!("No state found; nothing to destroy.");
        return Ok(());
    };

    if state.records.is_empty() {
        eprintln!("No managed resources to destroy.");
        return Ok(());
    }

    eprintln!("The following resources will be destroyed:");
    for name in state.record_names() {
        if let Some(record) = state.get_record(name) {
            if record.protect {
                eprintln!("  - {name} ({}) [protected - will be kept]", record.physical_id);
            } else {
                eprintln!("  - {name} ({})", record.physical_id);
            }
        }
    }

    // Confirm
    if !auto_approve {
        eprint!("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if input.trim() != "destroy" {
            eprintln!("Destruction cancelled.");
            return Ok(());
        }
    }

    let lock = state_store.acquire_lock("").await?;
    let engine = Engine::new(&descriptor, &state_store, provider);
    let outcome = engine.destroy().await;
    state_store.release_lock(&lock.lock_id).await?;
    let report = outcome?;

    eprintln!("\nDestroyed {} resource(s).", report.deleted.len());
    if !report.skipped_protected.is_empty() {
        eprintln!(
            "Kept {} protected resource(s): {}",
            report.skipped_protected.len(),
            report.skipped_protected.join(", ")
        );
    }
    if !report.failed.is_empty() {
        for (name, err) in &report.failed {
            error!("Failed to destroy {name}: {err}");
        }
        return Err(GroundworkError::internal(format!(
            "{} resource(s) could not be destroyed",
            report.failed.len()
        )));
    }

    Ok(())
}

/// Show recorded run outputs.
async fn cmd_outputs(
    descriptor_path: Option<&PathBuf>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_descriptor, state_store) = load_descriptor_and_store(descriptor_path).await?;

    let exports = state_store
        .load()
        .await?
        .map(|state| state.exports)
        .unwrap_or_default();

    eprint!("{}", formatter.format_outputs(&exports));
    Ok(())
}

/// Check for drift.
async fn cmd_drift(descriptor_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (descriptor, state_store) = load_descriptor_and_store(descriptor_path).await?;
    let provider = create_provider()?;

    let engine = Engine::new(&descriptor, &state_store, provider);
    let report = engine.check_drift().await?;

    let output = formatter.format_drift(&report);
    eprintln!("{output}");

    Ok(())
}

/// State management commands.
async fn cmd_state(
    descriptor_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_descriptor, state_store) = load_descriptor_and_store(descriptor_path).await?;

    match command {
        StateCommands::Show => {
            if let Some(state) = state_store.load().await? {
                let output = formatter.format_state(&state);
                eprintln!("{output}");
            } else {
                eprintln!("No state found.");
            }
        }
        StateCommands::Lock { holder } => {
            let holder_str = holder.as_deref().unwrap_or("");
            let lock = state_store.acquire_lock(holder_str).await?;
            eprintln!("State locked: {}", lock.lock_id);
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                // Force unlock by deleting whatever lock is held
                if let Some(lock_info) = state_store.get_lock_info().await? {
                    state_store.release_lock(&lock_info.lock_id).await?;
                    eprintln!("State forcefully unlocked.");
                }
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the descriptor file path.
fn resolve_descriptor_path(descriptor_path: Option<&PathBuf>) -> Result<PathBuf> {
    descriptor_path.map_or_else(|| find_descriptor_file("."), |path| Ok(path.clone()))
}

/// Loads the descriptor and creates the appropriate state store.
async fn load_descriptor_and_store(
    descriptor_path: Option<&PathBuf>,
) -> Result<(Descriptor, Box<dyn StateStore>)> {
    let descriptor_file = resolve_descriptor_path(descriptor_path)?;
    debug!("Loading descriptor from: {}", descriptor_file.display());

    let parser = DescriptorParser::new().with_base_path(
        descriptor_file
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    );
    parser.load_dotenv()?;

    let descriptor = parser.load_with_env(&descriptor_file)?;

    // Validate
    let validator = DescriptorValidator::new();
    validator.validate(&descriptor)?;

    // Create state store based on descriptor
    let state_store: Box<dyn StateStore> = match descriptor.state.backend {
        StateBackend::Local => {
            let path = descriptor.state.path.as_ref().map_or_else(
                || {
                    descriptor_file
                        .parent()
                        .unwrap_or_else(|| std::path::Path::new("."))
                        .join(".groundwork")
                },
                PathBuf::from,
            );
            Box::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = descriptor
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| GroundworkError::internal("S3 bucket not configured"))?;
            let prefix = descriptor.state.prefix.as_deref();
            let region = descriptor.state.region.as_deref();
            Box::new(S3StateStore::new(bucket, prefix, region).await?)
        }
    };

    Ok((descriptor, state_store))
}

/// Creates the provider for this run.
///
/// The only provider built into this binary is the in-memory simulation;
/// real environments are driven by linking a [`Provider`] implementation
/// through the library API.
fn create_provider() -> Result<Arc<dyn Provider>> {
    let selected =
        std::env::var("GROUNDWORK_PROVIDER").unwrap_or_else(|_| String::from("simulation"));

    match selected.as_str() {
        "simulation" => {
            info!("Using simulation provider (set GROUNDWORK_PROVIDER to change)");
            Ok(Arc::new(SimulationProvider::new()))
        }
        other => Err(GroundworkError::internal(format!(
            "Unknown provider '{other}'. This binary ships only the 'simulation' \
             provider; link a Provider implementation via the library API."
        ))),
    }
}

//! Fleetops CLI
//!
//! The `fleetops` command applies connection configurations, compares build
//! manifests and drives CI workflow runs across every repository of a
//! service fleet.
//!
//! ## Commands
//!
//! - `groups`: list service groups and their repositories
//! - `init-folders`: create one local folder per group
//! - `branch create`: create a work branch on every repository
//! - `config apply`: push a connection template to a group or the fleet
//! - `manifest compare`: diff `pom.xml` between two branches
//! - `workflow dispatch`: trigger, await and collect CI runs
//! - `automate`: all of the above in one go

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fleetops_core::telemetry::level_for;
use fleetops_core::{
    AutomationPipeline, AutomationReport, AutomationRequest, BranchManager, BranchOutcome,
    ConfigReplacer, FanOutReport, FleetComparison, FleetRegistry, ManifestComparator,
    RepoGateway, ServiceComparison, TemplateKey, TemplateStore, WorkflowOrchestrator,
    DEFAULT_CONFIG_PATH,
};
use fleetops_github::GitHubGateway;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fleetops")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fleet-wide configuration and CI orchestration", long_about = None)]
struct Cli {
    /// Fleet configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "FLEETOPS_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List service groups and their repositories
    Groups,

    /// Create one local folder per service group
    InitFolders {
        /// Directory receiving the group folders
        #[arg(default_value = ".")]
        base_dir: PathBuf,
    },

    /// Show the GitHub account behind GITHUB_TOKEN
    Whoami,

    /// Manage work branches
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Connection configuration templates
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Build manifest comparison
    Manifest {
        #[command(subcommand)]
        action: ManifestAction,
    },

    /// CI workflow runs
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Branch, configure, compare, dispatch, await and collect logs
    Automate {
        /// Connection template to apply
        #[arg(short, long)]
        template: TemplateKey,

        /// Work branch (default: branch prefix + template)
        #[arg(short, long)]
        branch: Option<String>,

        /// Wait for dispatched runs to finish
        #[arg(long)]
        wait: bool,

        /// Completion timeout in seconds (default: from config)
        #[arg(long)]
        timeout: Option<u64>,

        /// Write run logs after dispatch
        #[arg(long)]
        extract_logs: bool,

        /// Write the full report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum BranchAction {
    /// Create a branch from the base branch on every repository
    Create {
        name: String,

        /// Treat an existing branch as success
        #[arg(long)]
        ensure: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Apply a connection template
    Apply {
        #[arg(short, long)]
        template: TemplateKey,

        /// Service group to target
        #[arg(short, long, conflicts_with = "all", required_unless_present = "all")]
        group: Option<String>,

        /// Target every repository of the fleet
        #[arg(long)]
        all: bool,

        /// Branch to commit on (default: branch prefix + template)
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// List templates found in the templates directory
    Templates,
}

#[derive(Subcommand)]
enum ManifestAction {
    /// Compare manifests between two branches
    Compare {
        /// Single repository (short or full name); whole fleet if omitted
        #[arg(long)]
        repo: Option<String>,

        /// Left-hand branch (default: base branch)
        #[arg(long)]
        from: Option<String>,

        /// Right-hand branch (default: compare branch)
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Dispatch the workflow on every repository
    Dispatch {
        /// Branch to run on (default: compare branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Wait for runs to finish
        #[arg(long)]
        wait: bool,

        /// Completion timeout in seconds (default: from config)
        #[arg(long)]
        timeout: Option<u64>,

        /// Write run logs after dispatch
        #[arg(long)]
        extract_logs: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    fleetops_core::init_tracing(cli.json, level_for(cli.verbose));

    let registry = FleetRegistry::load(&cli.config)
        .with_context(|| format!("Failed to load fleet config {}", cli.config.display()))?;
    let json = cli.json;

    match cli.command {
        Commands::Groups => cmd_groups(&registry, json),
        Commands::InitFolders { base_dir } => cmd_init_folders(&registry, &base_dir, json),
        Commands::Whoami => cmd_whoami().await,
        Commands::Branch { action } => match action {
            BranchAction::Create { name, ensure } => {
                cmd_branch_create(github()?, &registry, &name, ensure, json)
                    .await
                    .map(drop)
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Apply {
                template,
                group,
                all: _,
                branch,
            } => cmd_config_apply(
                github()?,
                &registry,
                template,
                group.as_deref(),
                branch.as_deref(),
                json,
            )
            .await
            .map(drop),
            ConfigAction::Templates => cmd_config_templates(&registry, json),
        },
        Commands::Manifest { action } => match action {
            ManifestAction::Compare { repo, from, to } => cmd_manifest_compare(
                github()?,
                &registry,
                repo.as_deref(),
                from.as_deref(),
                to.as_deref(),
                json,
            )
            .await
            .map(drop),
        },
        Commands::Workflow { action } => match action {
            WorkflowAction::Dispatch {
                branch,
                wait,
                timeout,
                extract_logs,
            } => {
                let timeout = wait.then(|| completion_timeout(&registry, timeout));
                cmd_workflow_dispatch(
                    github()?,
                    &registry,
                    branch.as_deref(),
                    timeout,
                    extract_logs,
                    json,
                )
                .await
            }
        },
        Commands::Automate {
            template,
            branch,
            wait,
            timeout,
            extract_logs,
            report,
        } => {
            let request = AutomationRequest {
                branch: branch.unwrap_or_else(|| registry.config().branch_name(template.as_str())),
                template,
                await_timeout: wait.then(|| completion_timeout(&registry, timeout)),
                extract_logs,
            };
            cmd_automate(github()?, &registry, &request, report.as_deref(), json)
                .await
                .map(drop)
        }
    }
}

/// GitHub gateway from the environment; a missing token is fatal.
fn github() -> Result<Arc<dyn RepoGateway>> {
    let gateway = GitHubGateway::from_env().context("Failed to set up the GitHub gateway")?;
    Ok(Arc::new(gateway))
}

fn completion_timeout(registry: &FleetRegistry, secs: Option<u64>) -> Duration {
    secs.map(Duration::from_secs)
        .unwrap_or_else(|| registry.config().workflow.completion_timeout())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report<T>(report: &FanOutReport<T>) {
    println!("{}", report.summary());
    for line in report.status_lines() {
        println!("{line}");
    }
}

fn print_comparison(fleet: &FleetComparison) {
    for entry in &fleet.entries {
        let c = &entry.comparison;
        let marker = if c.has_differences { "DIFF" } else { "same" };
        println!(
            "  {marker:<5} {} ({} -> {} dependencies)",
            entry.repository, c.branch1_deps_count, c.branch2_deps_count
        );
        for dep in &c.diff.dependencies_added {
            println!("          + {}:{}:{}", dep.group_id, dep.artifact_id, dep.version);
        }
        for dep in &c.diff.dependencies_removed {
            println!("          - {}:{}:{}", dep.group_id, dep.artifact_id, dep.version);
        }
        for (name, change) in &c.diff.properties_changed {
            println!("          ~ {name}: {} -> {}", change.from, change.to);
        }
    }
    for repo in &fleet.unavailable {
        println!("  n/a   {repo}");
    }
    println!("{}", fleet.summary());
}

fn cmd_groups(registry: &FleetRegistry, json: bool) -> Result<()> {
    if json {
        return print_json(registry.groups());
    }
    for group in registry.groups() {
        println!("{} ({})", group.name, group.folder);
        for service in registry.services_in_group(&group.name) {
            println!("  {}", service.repository);
        }
    }
    Ok(())
}

fn cmd_init_folders(registry: &FleetRegistry, base_dir: &Path, json: bool) -> Result<()> {
    let folders = registry
        .prepare_workspace(base_dir)
        .with_context(|| format!("Failed to prepare folders under {}", base_dir.display()))?;
    if json {
        return print_json(&folders);
    }
    for folder in folders {
        println!("{}", folder.display());
    }
    Ok(())
}

async fn cmd_whoami() -> Result<()> {
    let gateway = GitHubGateway::from_env().context("Failed to set up the GitHub gateway")?;
    let login = gateway
        .authenticated_user()
        .await
        .context("Failed to query the authenticated user")?;
    println!("Authenticated as {login} on {}", gateway.config().api_url);
    Ok(())
}

async fn cmd_branch_create(
    gateway: Arc<dyn RepoGateway>,
    registry: &FleetRegistry,
    name: &str,
    ensure: bool,
    json: bool,
) -> Result<FanOutReport<BranchOutcome>> {
    let manager = BranchManager::new(gateway, registry.clone());
    let report = if ensure {
        manager.ensure_branches(name).await
    } else {
        manager.create_branches(name).await
    };
    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(report)
}

async fn cmd_config_apply(
    gateway: Arc<dyn RepoGateway>,
    registry: &FleetRegistry,
    template: TemplateKey,
    group: Option<&str>,
    branch: Option<&str>,
    json: bool,
) -> Result<FanOutReport<()>> {
    let branch = branch
        .map(str::to_string)
        .unwrap_or_else(|| registry.config().branch_name(template.as_str()));
    let replacer = ConfigReplacer::from_registry(gateway, registry.clone());

    let report = match group {
        Some(group) => {
            if !registry.group_names().contains(&group) {
                warn!(group = %group, known = ?registry.group_names(), "unknown service group");
            }
            replacer.apply_to_group(group, &branch, template).await
        }
        None => replacer.apply_to_fleet(&branch, template).await,
    };
    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(report)
}

fn cmd_config_templates(registry: &FleetRegistry, json: bool) -> Result<()> {
    let store = TemplateStore::new(registry.config().templates_dir.clone());
    let available = store.available();
    if json {
        return print_json(&available);
    }
    for key in TemplateKey::ALL {
        let state = if available.contains(&key) { "ok" } else { "missing" };
        println!("  {:<10} {:<8} {}", key.as_str(), state, store.path_for(key).display());
    }
    Ok(())
}

async fn cmd_manifest_compare(
    gateway: Arc<dyn RepoGateway>,
    registry: &FleetRegistry,
    repo: Option<&str>,
    from: Option<&str>,
    to: Option<&str>,
    json: bool,
) -> Result<FleetComparison> {
    let branches = &registry.config().branches;
    let from = from.unwrap_or(&branches.base_branch);
    let to = to.unwrap_or(&branches.compare_branch);
    let comparator = ManifestComparator::new(gateway, registry.clone());

    let fleet = match repo {
        Some(name) => {
            let Some(service) = registry.find_service(name) else {
                bail!("Repository '{name}' is not part of the fleet");
            };
            let comparison = comparator.compare(&service.repository, from, to).await;
            let mut fleet = FleetComparison {
                branch1: from.to_string(),
                branch2: to.to_string(),
                entries: Vec::new(),
                unavailable: Vec::new(),
            };
            match comparison {
                Some(comparison) => fleet.entries.push(ServiceComparison {
                    service: service.name,
                    repository: service.repository,
                    comparison,
                }),
                None => fleet.unavailable.push(service.repository),
            }
            fleet
        }
        None => comparator.compare_fleet(from, to).await,
    };

    if json {
        print_json(&fleet)?;
    } else {
        print_comparison(&fleet);
    }
    Ok(fleet)
}

async fn cmd_workflow_dispatch(
    gateway: Arc<dyn RepoGateway>,
    registry: &FleetRegistry,
    branch: Option<&str>,
    await_timeout: Option<Duration>,
    extract_logs: bool,
    json: bool,
) -> Result<()> {
    let branch = branch.unwrap_or(&registry.config().branches.compare_branch);
    let orchestrator = WorkflowOrchestrator::new(gateway, registry.clone());

    let session = orchestrator.dispatch_fleet(branch).await;
    if !json {
        print_report(&session.report());
    }

    let completions = match await_timeout {
        Some(timeout) => {
            let report = orchestrator.await_fleet(&session, timeout).await;
            if !json {
                print_report(&report);
            }
            Some(report)
        }
        None => None,
    };

    let logs = if extract_logs {
        let logs = orchestrator.extract_fleet_logs(&session).await;
        if !json {
            for log in &logs {
                println!("  log   {} -> {}", log.service, log.path.display());
            }
        }
        logs
    } else {
        Vec::new()
    };

    if json {
        print_json(&json!({
            "session": session,
            "completions": completions,
            "logs": logs,
        }))?;
    }
    Ok(())
}

async fn cmd_automate(
    gateway: Arc<dyn RepoGateway>,
    registry: &FleetRegistry,
    request: &AutomationRequest,
    report_path: Option<&Path>,
    json: bool,
) -> Result<AutomationReport> {
    let pipeline = AutomationPipeline::new(gateway, registry.clone());
    let mut report = AutomationReport::default();

    let interrupted = tokio::select! {
        _ = pipeline.run(request, &mut report) => false,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, reporting completed stages only");
            true
        }
    };

    if let Some(path) = report_path {
        let body = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, body)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), "wrote automation report");
    }

    if json {
        print_json(&report)?;
    } else {
        if interrupted {
            println!("Interrupted after: {:?}", report.completed);
        }
        for line in report.summary_lines() {
            println!("{line}");
        }
    }
    Ok(report)
}

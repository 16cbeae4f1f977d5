// SPDX-License-Identifier: Apache-2.0

//! `vulntor` CLI: drives a plugin-driven scan against one or more
//! targets, and manages the installed plugin catalog.

use std::net::IpAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use semver::Version;
use url::Url;

use vulntor::app::AppManager;
use vulntor::cache::PluginCache;
use vulntor::config::Workspace;
use vulntor::data::{AssetProfile, PortProfile, ScanResult};
use vulntor::error::{Error, Result};
use vulntor::loader::{self, LoadContext};
use vulntor::manifest::ManifestRegistry;
use vulntor::orchestrator::{self, DataContext, ProgressSender};
use vulntor::parser::Dispatch;
use vulntor::plugin::PluginId;
use vulntor::probe;
use vulntor::service::PluginService;
use vulntor::shell::verbosity::Verbosity;
use vulntor::shell::{ellipsis, Shell};
use vulntor::store::{FsScanStore, ScanStore};
use vulntor::vt_error;

#[derive(Parser)]
#[command(name = "vulntor", version, about = "A plugin-driven network vulnerability scanner")]
struct Cli {
    /// Increase logging verbosity; repeat for more (-v, -vv).
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all non-error output.
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scan against one or more targets.
    Scan(ScanArgs),
    /// Manage the installed plugin catalog.
    Plugin {
        #[command(subcommand)]
        action: PluginAction,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Target IP addresses to scan.
    targets: Vec<IpAddr>,

    /// Ports to probe on each target.
    #[arg(long, value_delimiter = ',', default_value = "21,22,23,25,53,80,110,143,443,3306,5432,6379,8080,8443")]
    ports: Vec<u16>,

    /// Restrict the loaded plugin catalog to these categories, in
    /// addition to whatever is inferred from open ports and services.
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,

    /// Allow probing loopback targets (disabled by default).
    #[arg(long)]
    allow_loopback: bool,

    /// How plugins are run: unordered or dependency-ordered, each
    /// sequential or concurrent.
    #[arg(long, value_enum, default_value = "dag-layered")]
    mode: ScanMode,

    /// Per-probe timeout, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ScanMode {
    AllSequential,
    AllParallel,
    DagSequential,
    DagLayered,
}

#[derive(Subcommand)]
enum PluginAction {
    /// Install a plugin (and its transitive dependencies) from the
    /// configured source index.
    Install {
        id: String,
        #[arg(long)]
        version: String,
    },
    /// Install several plugins in one batch call, `<id>@<version>` each,
    /// aggregating per-plugin outcomes rather than stopping at the first
    /// failure.
    InstallMany { specs: Vec<String> },
    /// Update a plugin to the newest version in the source index.
    Update { id: String },
    /// Remove an installed plugin.
    Uninstall {
        id: String,
        #[arg(long)]
        version: String,
    },
    /// List installed plugins.
    List,
    /// Recompute every installed plugin's digest and compare it against
    /// the manifest registry.
    Verify,
    /// Remove cached plugins no longer present in the manifest registry
    /// and older than `--min-age-days`.
    Clean {
        #[arg(long, default_value_t = 30)]
        min_age_days: i64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else {
        Verbosity::from_flag_count(cli.verbose)
    };
    Shell::init(verbosity);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            Shell::print_error(&Error::BareIo(e));
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            Shell::print_error(&e);
            exit_code_for(&e)
        }
    }
}

/// `0` success, `1` invocation (bad flag or target), `2` total failure,
/// `3` partial failure, `4` cancelled.
fn exit_code_for(err: &Error) -> ExitCode {
    let code = match err {
        Error::Invocation(_) => 1,
        Error::PartialFailure { .. } => 3,
        Error::Cancelled { .. } => 4,
        _ => 2,
    };
    ExitCode::from(code)
}

async fn run(cli: Cli) -> Result<()> {
    let app = AppManager::init(Workspace::resolve());

    match cli.command {
        Command::Scan(args) => run_scan(&app, args).await,
        Command::Plugin { action } => run_plugin_action(&app, action).await,
    }
}

async fn run_scan(app: &Arc<AppManager>, args: ScanArgs) -> Result<()> {
    if args.targets.is_empty() {
        return Err(vt_error!("at least one target is required"));
    }

    let timeout = Duration::from_millis(args.timeout_ms);
    let dispatch = Dispatch::with_builtin_matchers();
    let mut assets = Vec::with_capacity(args.targets.len());

    for ip in &args.targets {
        Shell::print_status("scan", format!("probing {ip}"));
        let mut ports = Vec::with_capacity(args.ports.len());
        for &port in &args.ports {
            let connect = probe::tcp_connect(*ip, port, timeout, args.allow_loopback)?;
            let (banner, service) = if connect.open {
                let banner = probe::grab_banner(*ip, port, timeout, args.allow_loopback).unwrap_or_default();
                let service = dispatch.dispatch(&banner);
                (if banner.is_empty() { None } else { Some(banner) }, service)
            } else {
                (None, None)
            };
            ports.push(PortProfile {
                port,
                open: connect.open,
                banner,
                service_name: service.as_ref().map(|s| s.name.clone()),
                service_version: service.and_then(|s| s.version),
            });
        }
        let echo = probe::icmp_echo(*ip, 1, timeout, args.allow_loopback)?;
        assets.push(AssetProfile {
            ip: *ip,
            alive: echo.alive || ports.iter().any(|p| p.open),
            ports,
        });
    }

    let cache = PluginCache::new(app.workspace().cache_root());
    let mut catalog = Vec::new();
    for entry in cache.list()? {
        catalog.push(cache.get(&entry.id)?);
    }

    let ctx = LoadContext {
        ports: assets.iter().flat_map(|a| a.open_ports()).collect(),
        services: assets.iter().flat_map(|a| a.service_names()).collect(),
        explicit_categories: args.categories,
    };
    let selected: Vec<_> = loader::load_for_context(&catalog, &ctx).into_iter().cloned().collect();
    Shell::print_status("scan", format!("{} of {} installed plugins selected", selected.len(), catalog.len()));

    let data = Arc::new(DataContext::new());
    for asset in &assets {
        for port in &asset.ports {
            if let Some(name) = &port.service_name {
                data.seed(format!("{name}/banner"), port.banner.clone().unwrap_or_default());
                if let Some(version) = &port.service_version {
                    data.seed(format!("{name}/version"), version.clone());
                }
            }
        }
    }

    let (progress, _rx) = ProgressSender::new(256);
    let cancel = app.cancellation_token();
    let target_desc = Some(args.targets.iter().map(|ip| ip.to_string()).collect::<Vec<_>>().join(","));

    let findings = match args.mode {
        ScanMode::AllSequential => {
            orchestrator::run_all_sequential(&selected, Arc::clone(&data), &progress, &cancel, Arc::clone(app), target_desc)?
        }
        ScanMode::AllParallel => {
            orchestrator::run_all_parallel(selected, data, progress, cancel, Arc::clone(app), target_desc).await?
        }
        ScanMode::DagSequential => {
            orchestrator::run_dag_sequential(&selected, Arc::clone(&data), &progress, &cancel, Arc::clone(app), target_desc)?
        }
        ScanMode::DagLayered => {
            orchestrator::run_dag_layered(selected, data, progress, cancel, Arc::clone(app), target_desc).await?
        }
    };

    Shell::println(format!("{} finding(s)", findings.len()));
    for finding in &findings {
        Shell::println(format!("  [{}] {}", finding.plugin_id, ellipsis(&finding.message, 160)));
    }

    let store = FsScanStore::new(app.workspace().scans_root());
    let scan_id = format!("scan-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f"));
    store.save(&ScanResult {
        scan_id,
        assets,
        findings,
    })?;

    Ok(())
}

async fn run_plugin_action(app: &Arc<AppManager>, action: PluginAction) -> Result<()> {
    let workspace = app.workspace();
    let cache = PluginCache::new(workspace.cache_root());
    let registry = ManifestRegistry::load(workspace.registry_path())?;
    let source_urls = vulntor::config::plugin_source_urls_from_env();
    let source_url = source_urls
        .first()
        .cloned()
        .unwrap_or_else(|| Url::parse("https://plugins.vulntor.invalid/index.yaml").expect("static URL parses"));
    let service = PluginService::new(cache, registry, source_url, Duration::from_secs(30));
    let cancel = app.cancellation_token();

    match action {
        PluginAction::Install { id, version } => {
            let version = Version::parse(&version).map_err(|e| Error::Invocation(e.to_string()))?;
            let entry = service.install(&id, &version, &cancel)?;
            Shell::println(format!("installed {}", entry.id));
        }
        PluginAction::InstallMany { specs } => {
            let mut requests = Vec::with_capacity(specs.len());
            for spec in &specs {
                let id: PluginId = spec.parse()?;
                requests.push((id.id, id.version));
            }
            let outcome = service.install_many(&requests, &cancel)?;
            Shell::println(format!("{} installed, {} failed", outcome.installed_count, outcome.failed_count));
        }
        PluginAction::Update { id } => {
            let entry = service.update(&id, &cancel)?;
            Shell::println(format!("updated to {}", entry.id));
        }
        PluginAction::Uninstall { id, version } => {
            let version = Version::parse(&version).map_err(|e| Error::Invocation(e.to_string()))?;
            service.uninstall(&PluginId::new(id, version))?;
            Shell::println("uninstalled");
        }
        PluginAction::List => {
            for entry in service.list() {
                Shell::println(format!("{}  installed {}", entry.id, entry.installed_at));
            }
        }
        PluginAction::Verify => {
            let outcome = service.verify()?;
            Shell::println(format!(
                "{} ok, {} failed, {} skipped (no checksum recorded)",
                outcome.success_count, outcome.failed_count, outcome.skipped_count
            ));
            for failure in &outcome.failures {
                Shell::println(format!("  {failure}"));
            }
            if outcome.failed_count > 0 {
                return Err(vt_error!("one or more installed plugins failed verification"));
            }
        }
        PluginAction::Clean { min_age_days } => {
            let removed = service.clean(chrono::Duration::days(min_age_days))?;
            Shell::println(format!("removed {removed} stale cache entr{}", if removed == 1 { "y" } else { "ies" }));
        }
    }

    Ok(())
}

use emigraph::cli::{Args, Command};
use emigraph::paths::{self, PathConfig};
use emigraph::{
    BusinessId, CreateEdgeOutcome, DomainProduct, DomainProcess, EmissionApi, EngineSettings,
    FileSnapshotStore, GraphSync, HttpEmissionApi, InstallationId, NodeId, SnapshotStore,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info, warn};
use std::sync::Arc;

fn main() -> Result<()> {
    // Parse command-line arguments first (needed for log setup)
    let args = Args::parse();

    // Create path configuration from CLI args and environment
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());

    // Ensure directories exist
    if let Err(e) = paths::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {:#}", e);
    }

    init_logging(&args, &path_config)?;
    info!("emigraph {} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let settings_path = paths::config_file("emigraph.json", &path_config);
    info!("Config path: {}", settings_path.display());
    let mut settings = EngineSettings::load_or_default(&settings_path);
    if let Some(api) = &args.api {
        settings.api_base_url = api.clone();
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run(args, settings, &path_config))
}

/// 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        // File logging with specified verbosity level
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| paths::data_file("emigraph.log", path_config));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .filter_module("reqwest", log::LevelFilter::Info) // Suppress connection-pool chatter
            .filter_module("hyper_util", log::LevelFilter::Info)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging with specified verbosity level (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .filter_module("reqwest", log::LevelFilter::Info)
            .filter_module("hyper_util", log::LevelFilter::Info)
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

async fn run(args: Args, settings: EngineSettings, path_config: &PathConfig) -> Result<()> {
    let api: Arc<dyn EmissionApi> = Arc::new(
        HttpEmissionApi::from_settings(&settings).context("Failed to build HTTP client")?,
    );
    let snapshot_dir = settings
        .snapshot_dir
        .clone()
        .unwrap_or_else(|| paths::canvas_dir(path_config));
    info!("Canvas snapshots: {}", snapshot_dir.display());
    let snapshots: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(snapshot_dir));

    let sync = GraphSync::new(api, snapshots, settings);

    let installation = args.installation.map(InstallationId);
    match installation {
        Some(id) => {
            sync.switch_installation(id);
        }
        None if args.command.needs_canvas() => {
            bail!("--installation is required for this command");
        }
        None => {}
    }

    let result = execute(&sync, args.command, installation).await;

    for notice in sync.drain_notices() {
        eprintln!("[{:?}] {}", notice.category, notice.message);
    }
    if let Err(e) = sync.shutdown() {
        warn!("Final canvas flush failed: {}", e);
    }
    result
}

async fn execute(sync: &GraphSync, command: Command, installation: Option<InstallationId>) -> Result<()> {
    match command {
        Command::Show => {
            let report = sync.refresh_stale_nodes().await;
            debug!("{:?}", report);
            print_canvas(sync);
        }
        Command::ProcessEmission { id } => match sync.get_process_emission(BusinessId(id)).await? {
            Some(snapshot) => println!(
                "process {}: attributed {:.3}, cumulative {:.3} (material {:.3}, fuel {:.3})",
                id,
                snapshot.attributed_emission,
                snapshot.cumulative_emission,
                snapshot.total_material_direct_emission,
                snapshot.total_fuel_direct_emission
            ),
            None => println!("process {}: fetch already in progress", id),
        },
        Command::ProductEmission { id } => match sync.get_product_emission(BusinessId(id)).await? {
            Some(view) => {
                println!(
                    "product {}: attributed {:.3}, produced by a process: {} ({:?})",
                    id, view.attributed_emission, view.has_produce_edge, view.source
                );
                if let Some(q) = view.quantities {
                    println!(
                        "  produced {:.3}, sold {:.3}, sold in EU {:.3}",
                        q.produced_quantity, q.sold_quantity, q.eu_sold_quantity
                    );
                }
            }
            None => println!("product {}: fetch already in progress", id),
        },
        Command::Recalc { process: Some(id) } => {
            sync.recalculate_from_process(BusinessId(id)).await?;
            println!("process {} recalculated", id);
        }
        Command::Recalc { process: None } => {
            sync.recalculate_whole_graph(None).await?;
            println!("graph recalculated");
        }
        Command::AddProcess { id, name } => {
            let process = DomainProcess {
                id: BusinessId(id),
                name,
                installation_id: require(installation)?,
            };
            let view = sync.add_process_node(&process, &[]).await?;
            println!("{}", view.node.id);
        }
        Command::AddProduct { id, name, hs_code } => {
            let product = DomainProduct {
                id: BusinessId(id),
                name,
                installation_id: require(installation)?,
                hs_code,
            };
            let view = sync.add_product_node(&product).await?;
            println!("{}", view.node.id);
        }
        Command::Link { source, target, source_handle, target_handle } => {
            let outcome = sync
                .create_edge(
                    &NodeId::from(source),
                    &NodeId::from(target),
                    source_handle.as_deref(),
                    target_handle.as_deref(),
                )
                .await?;
            match outcome {
                CreateEdgeOutcome::Confirmed(edge) => println!("{}", edge.id),
                CreateEdgeOutcome::Duplicate => println!("edge already exists"),
                CreateEdgeOutcome::Discarded => println!("edge created on the server but not kept locally"),
            }
        }
        Command::Unlink { edges } => {
            let report = sync.delete_edges(&edges).await;
            println!(
                "removed {} edge(s), {} server deletion(s) failed, graph recalculated: {}",
                report.removed, report.remote_failed, report.recalculated
            );
        }
    }
    Ok(())
}

fn require(installation: Option<InstallationId>) -> Result<InstallationId> {
    installation.context("--installation is required for this command")
}

fn print_canvas(sync: &GraphSync) {
    let views = sync.render_nodes();
    println!("installation {:?}: {} node(s)", sync.active_installation(), views.len());
    for view in &views {
        let node = &view.node;
        println!(
            "  {:<44} {:<8} {:<24} {:>12.3}{}{}",
            node.id,
            node.kind,
            node.display.label,
            node.emission.attributed_emission,
            if view.read_only { "  [read-only]" } else { "" },
            if node.needs_refresh { "  [stale]" } else { "" },
        );
    }
    let edges = sync.store().edges();
    println!("{} edge(s)", edges.len());
    for edge in &edges {
        println!("  {:<12} {} -> {} ({}, {:?})", edge.id, edge.source, edge.target, edge.kind, edge.style());
    }
}

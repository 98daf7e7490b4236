use anyhow::Context;
use std::path::Path;
use std::process::ExitCode;
use taskchain::cli::{Args, ConfigDiscovery, ExecutionMode, FileChain, RunConfig};
use taskchain::{
    ChainSummary, Engine, EngineConfig, ExecutionContext, ProgressMonitor, TaskDescriptor, env,
    format_duration, init_logging,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match mode {
        ExecutionMode::Run(config) => run_chain(config).await,
        ExecutionMode::List(path) => list_chain(&path),
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(run: &RunConfig) -> anyhow::Result<EngineConfig> {
    let mut config = match &run.config_override {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("Cannot load configuration {:?}", path))?,
        None => ConfigDiscovery::discover_config()?,
    };

    // remembered durations live next to the chain file unless configured
    if config.estimation.store_path.is_none() {
        let root = run
            .chain_file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        config.estimation.store_path = Some(env::estimates_file_path(root));
    }
    Ok(config)
}

async fn run_chain(run: RunConfig) -> anyhow::Result<ExitCode> {
    let config = load_config(&run)?;
    init_logging(&config.log);
    info!("Starting taskchain {}", env!("CARGO_PKG_VERSION"));

    let chain = FileChain::load(&run.chain_file)?;
    let engine = Engine::new(config)?;
    let mut ctx = engine.create_context(chain.into_arc())?;

    if run.dry_run {
        println!("Dry run: '{}' would execute", ctx.chain_name());
        print_tasks(&ctx);
        return Ok(ExitCode::SUCCESS);
    }

    let monitor = ProgressMonitor::new(ctx.chain_name());
    let interrupt = monitor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling chain");
            interrupt.cancel();
        }
    });

    let status = engine.run_task_chain(&mut ctx, &monitor).await?;

    if run.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", status.to_tree_string());
    }

    if run.verbose
        && let Some(summary) = ctx.scope().get_local::<ChainSummary>()
    {
        println!();
        println!(
            "{} finished in {}",
            summary.chain,
            format_duration(summary.duration)
        );
        for record in &summary.tasks {
            println!(
                "  {:>3}. {} ({}) - {}",
                record.index + 1,
                record.task,
                format_duration(record.duration),
                record.status.severity()
            );
        }
    }

    Ok(if status.is_halting() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn list_chain(path: &Path) -> anyhow::Result<ExitCode> {
    init_logging(&EngineConfig::default().log);
    let chain = FileChain::load(path)?;
    let engine = Engine::builder(EngineConfig::default())
        .without_estimation()
        .build()?;
    let ctx = engine.create_context(chain.into_arc())?;
    println!("{}", ctx.chain_name());
    print_tasks(&ctx);
    Ok(ExitCode::SUCCESS)
}

fn print_tasks(ctx: &ExecutionContext) {
    for (i, descriptor) in ctx.tasks().iter().enumerate() {
        let kind = match descriptor {
            TaskDescriptor::Background(_) => " [background]",
            TaskDescriptor::LazyChain(_) => " [lazy]",
            _ => "",
        };
        println!("  {:>3}. {}{}", i + 1, descriptor.name(), kind);
    }
}

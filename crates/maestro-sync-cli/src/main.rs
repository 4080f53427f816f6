mod commands;
mod logging;
mod progress;
mod resolver;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use indicatif::MultiProgress;
use maestro_sync_core::config::{load_configuration, save_configuration};
use maestro_sync_core::{
    AppConfig, AudioFileIdentifier, Database, DeferringResolver, Identify, SourceConfig,
    SourceManager, SyncContext,
};
use progress::CliReporter;
use resolver::{prompt_confirm, TerminalResolver};
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    let config = match load_configuration(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            std::process::exit(1);
        }
    };
    let config_path = PathBuf::from(format!("{}.toml", args.config));

    match args.command {
        Some(Commands::Scan { source, defer }) => run_scan(&config, source.as_deref(), defer)?,
        Some(Commands::Sources) => print_sources(&config),
        Some(Commands::AddSource {
            name,
            path,
            domain,
            extensions,
        }) => {
            let mut source = SourceConfig::new(&name, path);
            source.domain = domain;
            if !extensions.is_empty() {
                source.extensions = extensions;
            }
            edit_sources(config, &config_path, |manager| {
                manager.add_source(source)?;
                Ok(())
            })?;
        }
        Some(Commands::RemoveSource { name }) => {
            let prompt = format!("Remove source {} from the configuration?", name);
            if prompt_confirm(&prompt, Some(false))? {
                edit_sources(config, &config_path, |manager| {
                    manager.remove_source(&name)?;
                    Ok(())
                })?;
            }
        }
        Some(Commands::Fingerprint { path }) => {
            let identifier = AudioFileIdentifier::new(config.identifier.clone());
            match identifier.identify(&path) {
                Some(hash) => println!("{}", hash),
                None => bail!("could not fingerprint {}", path.display()),
            }
        }
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn open_context(config: &AppConfig) -> anyhow::Result<SyncContext> {
    let db = Database::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path))?;
    Ok(SyncContext::new(db, config))
}

fn run_scan(config: &AppConfig, only: Option<&str>, defer: bool) -> anyhow::Result<()> {
    let multi = MultiProgress::new();
    let reporter = Arc::new(CliReporter::new(multi.clone()));
    let mut ctx = open_context(config)?.with_reporter(reporter.clone());
    ctx = if defer {
        ctx.with_resolver(Arc::new(DeferringResolver))
    } else {
        ctx.with_resolver(Arc::new(TerminalResolver::new(multi)))
    };

    let mut manager = SourceManager::new(Arc::new(ctx));
    manager.load(config)?;

    match only {
        Some(name) => match manager.source_mut(name) {
            Some(source) if source.is_enabled() => source.scan()?,
            Some(_) => bail!("source {} is disabled", name),
            None => bail!("no source named {}", name),
        },
        None => manager.scan_all()?,
    }

    let interval = Duration::from_millis(config.poll_interval_ms.max(10));
    while !manager.is_idle() {
        manager.tick_all()?;
        for source in manager.sources() {
            reporter.set_phase(source.name(), source.state());
        }
        thread::sleep(interval);
    }

    info!("All sources are in sync");
    Ok(())
}

fn print_sources(config: &AppConfig) {
    if config.sources.is_empty() {
        println!("No sources configured");
        return;
    }
    for source in &config.sources {
        let status = if source.enabled {
            "enabled".green()
        } else {
            "disabled".dimmed()
        };
        println!(
            "{} [{}] {} ({}) {}",
            source.name.bold(),
            source.domain,
            source.path.display(),
            source.extensions.join(", "),
            status
        );
    }
}

/// Load the sources, apply `edit`, and write the result back.
fn edit_sources<F>(mut config: AppConfig, path: &Path, edit: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut SourceManager) -> anyhow::Result<()>,
{
    let ctx = open_context(&config)?.with_reporter(Arc::new(CliReporter::new(MultiProgress::new())));
    let mut manager = SourceManager::new(Arc::new(ctx));
    manager.load(&config)?;
    edit(&mut manager)?;

    config.sources = manager.to_configs();
    save_configuration(&config, path)?;
    println!("Saved {}", path.display().to_string().green());
    Ok(())
}

mod cli;

use clap::Parser;
use env_logger::Builder;
use log::{error, info};
use tokio::task;

use clouddns_sync::{
    cancel::CancelToken,
    config::Config,
    controller::{Controller, ControllerConfig},
    endpoint::Targets,
    provider::{DomainFilter, InMemoryProvider},
    registry::{Registry, TxtRegistry},
    source::{FileSource, FileSourceConfig, MultiSource, Source, SourceError},
};

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    Builder::new().filter_level(cli.loglevel.into()).init();

    let config = cli.to_config();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(2);
    }
    if config.dry_run {
        info!("Running in dry-run mode, no changes to the DNS provider will be made");
    }

    let token = CancelToken::new();
    let mut controller = match build_controller(&cli, &config, &token) {
        Ok(c) => c,
        Err(e) => {
            error!("Unable to start: {}", e);
            std::process::exit(2);
        }
    };

    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_token.cancel();
        }
    });

    let run_once = cli.run_once;
    let worker = task::spawn_blocking(move || {
        if run_once {
            if let Err(e) = controller.run_once(&token) {
                error!("Reconciliation failed: {}", e);
                return Err(());
            }
            Ok(())
        } else {
            controller.run(&token);
            Ok(())
        }
    });

    match worker.await {
        Ok(Ok(())) => info!("Completed"),
        Ok(Err(())) => std::process::exit(1),
        Err(_) => {
            error!("Worker panicked, aborting...");
            std::process::exit(1);
        }
    }
}

fn build_controller(cli: &Cli, config: &Config, token: &CancelToken) -> Result<Controller, String> {
    let provider = get_provider(cli, config);
    let registry =
        TxtRegistry::from_config(Box::new(provider), &config.registry_config())
            .map_err(|e| e.to_string())?;
    info!("Initialized registry for owner {}", config.owner_id);

    let source = get_source(cli).map_err(|e| e.to_string())?;
    info!("Created endpoint source");

    let controller_config = ControllerConfig {
        policy: config.policy,
        managed_record_types: config.managed_record_types.clone(),
        interval: config.interval,
        min_event_interval: config.min_event_interval,
        ..Default::default()
    };
    Ok(Controller::new(
        Box::new(source),
        Box::new(registry) as Box<dyn Registry>,
        controller_config,
        token,
    ))
}

fn get_provider(cli: &Cli, config: &Config) -> InMemoryProvider {
    match cli.provider {
        cli::Provider::Inmemory => {
            let mut provider = InMemoryProvider::new()
                .with_domain_filter(DomainFilter::new(&cli.inmemory_zones))
                .with_dry_run(config.dry_run);
            for zone in &cli.inmemory_zones {
                provider = provider.with_zone(zone);
            }
            provider
        }
    }
}

fn get_source(cli: &Cli) -> Result<MultiSource, SourceError> {
    let file = FileSource::from_config(&FileSourceConfig {
        path: cli.source_file.clone(),
    })?;
    let sources: Vec<Box<dyn Source>> = vec![file];
    Ok(MultiSource::new(sources).with_default_targets(
        Targets::from(cli.default_targets.clone()),
        cli.force_default_targets,
    ))
}

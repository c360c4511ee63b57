use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use freshet::app::AppContext;
use freshet::cli::{commands, Cli, Commands};
use freshet::config::Config;
use freshet::store::NullStore;

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    match cli.command {
        Commands::Run { no_cache, no_update } => {
            if no_cache || no_update {
                config.update_cache = false;
            }
            let mut builder = AppContext::builder(config);
            if no_cache {
                builder = builder.store(Box::new(NullStore));
            }
            commands::run_feeds(&builder.build()?)?;
        }
        Commands::Feeds => {
            commands::list_feeds(&AppContext::new(config)?)?;
        }
        Commands::Cache { feed } => {
            commands::show_cache(&AppContext::new(config)?, feed.as_deref())?;
        }
    }

    Ok(())
}

#[macro_use]
extern crate log;

use std::sync::Arc;

use tally::{
    config::{self, Configuration},
    store::DirectoryBackend,
    PollStore, RouteSettings, SubscriptionBroadcaster, VoteAggregator,
};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match config::load_configuration() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(config: Configuration) -> Result<(), Box<dyn std::error::Error>> {
    let address = config.socket_address()?;

    let store = match &config.data_directory {
        Some(directory) => {
            info!("Persisting polls to {}", directory.display());
            PollStore::open(Arc::new(DirectoryBackend::new(directory)?))?
        }
        None => {
            warn!("No data_directory configured, polls will not survive a restart");
            PollStore::in_memory()
        }
    };

    // One registry for the whole process, shared by every socket
    let broadcaster = SubscriptionBroadcaster::new();
    let aggregator = VoteAggregator::new(store, broadcaster);

    let routes = tally::routes(
        aggregator,
        RouteSettings {
            trust_forwarded_for: config.trust_forwarded_for,
            max_message_size: config.max_message_size,
        },
    );

    info!("Serving on {address}");
    warp::serve(routes).run(address).await;
    Ok(())
}

use std::{path::PathBuf, process, sync::Arc};

use rayon::ThreadPoolBuilder;
use structopt::StructOpt;
use tokio::signal;
use tracing::info;
use tracing_subscriber::fmt;

use petnet_server::{
    services::{fetchers::Fetchers, messages::PetMessageService},
    settings::Settings,
    state_machine::initializer::StateMachineInitializer,
    storage::redis::Client,
};

#[derive(Debug, StructOpt)]
#[structopt(name = "coordinator", about = "The PET protocol coordinator")]
struct Opt {
    /// Path to the configuration file.
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();
    let settings = Settings::new(&opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        pet: pet_settings,
        mask: mask_settings,
        model: model_settings,
        log: log_settings,
        redis: redis_settings,
        restore: restore_settings,
        ..
    } = settings;

    fmt().with_env_filter(log_settings.filter).init();

    // one Redis instance backs both the round state and the global models
    let store = Client::new(redis_settings.url).await.unwrap_or_else(|err| {
        eprintln!("failed to connect to the store: {}", err);
        process::exit(1);
    });

    let (state_machine, request_tx, event_subscriber) = StateMachineInitializer::new(
        pet_settings,
        mask_settings,
        model_settings,
        restore_settings,
        store,
    )
    .init()
    .await
    .unwrap_or_else(|err| {
        eprintln!("failed to initialize the state machine: {}", err);
        process::exit(1);
    });

    // The transport is plugged in externally: it consumes the fetchers for
    // the read-only endpoints and drives the message service for the
    // per-phase message endpoints.
    let thread_pool = Arc::new(ThreadPoolBuilder::new().build().unwrap());
    let _fetchers = Fetchers::new(&event_subscriber);
    let _message_service =
        PetMessageService::new(&event_subscriber, thread_pool, request_tx.clone());

    info!("starting the state machine");
    tokio::select! {
        _ = state_machine.run() => {
            info!("state machine terminated");
        }
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("shutting down: received SIGINT"),
                Err(err) => info!("shutting down: cannot listen for SIGINT: {}", err),
            }
        }
    }
}

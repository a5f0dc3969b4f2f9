#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Single-node devnet runner for the Quill sequencer.

use clap::Parser;
use tracing::info;

use quill_config::Opts;
use quill_primitives::shutdown::{ShutdownSignal, run_until_shutdown};
use quill_sequencer::Sequencer;

mod allocator;
use allocator::{Allocator, new_allocator};

mod devnet;

#[global_allocator]
static ALLOC: Allocator = new_allocator();

#[tokio::main]
async fn main() -> eyre::Result<()> {
    if let Ok(custom_env_file) = std::env::var("ENV_FILE") {
        // Try from custom env file, and abort if it fails
        dotenvy::from_filename(custom_env_file)?;
    } else {
        // Try from default .env file, and ignore if it fails. It might
        // be that the user isn't using it.
        dotenvy::dotenv().ok();
    }

    let opts = Opts::parse();
    opts.telemetry.setup(&opts.instance_name)?;

    info!("🪶 Quill devnet starting...");

    let shutdown_signal = ShutdownSignal::new();
    let on_shutdown = || {
        info!("👋 Quill devnet shutting down...");
    };

    let run_sequencer = async {
        let (collaborators, tx_pool) = devnet::compose();
        devnet::spawn_tx_feeder(tx_pool);

        let sequencer = Sequencer::new(&opts.sequencer, collaborators).await?;
        sequencer.start();

        // The sequencer loop runs in the background until shutdown.
        std::future::pending::<()>().await;
        unreachable!()
    };

    run_until_shutdown(run_sequencer, shutdown_signal, on_shutdown)
        .await
        .map_err(|err: quill_sequencer::SequencerError| err.into())
}

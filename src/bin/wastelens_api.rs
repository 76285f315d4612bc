//! wastelens_api - HTTP service for point-query waste detection
//!
//! This daemon:
//! 1. Loads configuration (file + `WASTELENS_*` env)
//! 2. Loads the category table and the configured detector backend
//! 3. Serves `/health` and `/predict` until Ctrl-C

use anyhow::Result;
use std::sync::mpsc;

use wastelens::{
    api::{ApiConfig, ApiServer},
    config::ServiceConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::load()?;
    let pipeline = config.build_pipeline()?;
    log::info!(
        "detector backend '{}' ready (confidence >= {:.2})",
        pipeline.adapter().backend_name(),
        pipeline.adapter().confidence_threshold()
    );

    let api_handle = ApiServer::new(ApiConfig::from_service(&config), pipeline).spawn()?;
    log::info!("wastelens api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("wastelens_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}

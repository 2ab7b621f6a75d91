use anyhow::Context;
use tracing::{info, warn};

use tomorin::{logging, PathConfig, Service, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize application directories
    let paths = PathConfig::from_env();
    paths
        .ensure_directories_exist()
        .with_context(|| format!("cannot create data directory {}", paths.data_dir.display()))?;

    // Read settings before the logger exists; report the outcome after.
    let loaded = Settings::read(&paths.settings_file);
    let settings = match &loaded {
        Ok(Some(settings)) => settings.clone(),
        _ => Settings::default(),
    };
    logging::init(&paths.logs, &settings.log_level)?;
    match loaded {
        Ok(Some(_)) => info!(path = %paths.settings_file.display(), "loaded settings"),
        Ok(None) => {
            info!("settings file not found, writing defaults");
            if let Err(e) = settings.save(&paths.settings_file) {
                warn!(error = %e, "could not write default settings");
            }
        }
        Err(e) => warn!(
            path = %paths.settings_file.display(),
            error = %e,
            "failed to read settings file, using defaults"
        ),
    }

    let service = Service::new(&settings, paths)
        .await
        .context("failed to initialise playback core")?;

    let status = service
        .start_proxy()
        .await
        .with_context(|| format!("failed to bind local proxy on port {}", settings.proxy_port))?;
    info!(
        base_url = %status.base_url,
        logged_in = service.is_logged_in(),
        "playback core ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    service.stop_proxy().await;
    Ok(())
}

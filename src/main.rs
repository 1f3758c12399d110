use native_bridge::config::BridgeConfig;
use native_bridge::core::init_logging;
use native_bridge::host::run_simulation;

fn load_config() -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    let (mut config, source) = match std::env::args_os().nth(1) {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            (BridgeConfig::from_file(&path)?, Some(path))
        }
        None => BridgeConfig::load_or_default()?,
    };
    config.apply_env_overrides();
    init_logging(&config.logging);

    match source {
        Some(path) => tracing::info!(target: "native_bridge", "Loaded config from {}", path.display()),
        None => tracing::info!(target: "native_bridge", "No config file found, using defaults"),
    }
    config.validate()?;
    Ok(config)
}

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    match run_simulation(&config) {
        Ok(report) => tracing::info!(
            target: "native_bridge",
            "Simulation finished: {} tick(s), {} behavior(s), {} inert, {} failed call(s)",
            report.ticks,
            report.behaviors,
            report.inert,
            report.failed_ticks
        ),
        Err(e) => {
            eprintln!("Bridge failed: {}", e);
            std::process::exit(1);
        }
    }
}

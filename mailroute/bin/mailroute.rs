#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use mailroute::{Config, Mailroute};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The dependency graph enables more than one rustls provider, so the
    // Redis client cannot pick a default on its own
    tokio_rustls::rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("A TLS crypto provider was already installed"))?;

    let config_path = find_config_file()?;
    let config = Config::load(&config_path)?;

    Mailroute::new(config).run().await
}

/// Find the configuration file using the following precedence:
/// 1. `MAILROUTE_CONFIG` environment variable
/// 2. ./mailroute.config.ron (current working directory)
/// 3. /etc/mailroute/mailroute.config.ron (system-wide config)
fn find_config_file() -> anyhow::Result<std::path::PathBuf> {
    if let Ok(env_path) = std::env::var("MAILROUTE_CONFIG") {
        let path = std::path::PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "MAILROUTE_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        std::path::PathBuf::from("./mailroute.config.ron"),
        std::path::PathBuf::from("/etc/mailroute/mailroute.config.ron"),
    ];

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  \
         - MAILROUTE_CONFIG environment variable\n{paths_tried}"
    )
}

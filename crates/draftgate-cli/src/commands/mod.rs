//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses
//! the draftgate-core domain logic through `AppState`.

pub mod run;
pub mod server;

use draftgate_core::config::{GeneratorConfig, GeneratorKind};
use draftgate_core::state::AppState;
use draftgate_server::ServerConfig;

use crate::GlobalOpts;

/// Translate the global flags into a server configuration.
pub fn server_config(opts: &GlobalOpts) -> Result<ServerConfig, String> {
    let defaults = GeneratorConfig::default();
    let kind = GeneratorKind::parse(&opts.generator).map_err(|e| e.to_string())?;

    Ok(ServerConfig {
        db_path: opts.db.clone(),
        session_ttl_secs: opts.session_ttl,
        generator: GeneratorConfig {
            kind,
            model: opts.model.clone().unwrap_or(defaults.model.clone()),
            base_url: opts.base_url.clone().unwrap_or(defaults.base_url.clone()),
            api_key: opts.api_key.clone().unwrap_or(defaults.api_key.clone()),
            ..defaults
        },
        ..ServerConfig::default()
    })
}

/// Initialize a shared `AppState` from the global flags.
///
/// This mirrors `draftgate_server::start_server` without binding a port.
pub async fn init_state(opts: &GlobalOpts) -> AppState {
    let config = server_config(opts).unwrap_or_else(|e| {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    });

    draftgate_server::create_app_state(&config)
        .await
        .unwrap_or_else(|e| {
            eprintln!("{}", e);
            std::process::exit(1);
        })
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

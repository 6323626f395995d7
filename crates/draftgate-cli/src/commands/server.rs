//! `draftgate server`: start the HTTP server.

use draftgate_server::ServerConfig;

pub async fn run(
    config: ServerConfig,
    host: String,
    port: u16,
    cors_origins: Vec<String>,
) -> Result<(), String> {
    let config = ServerConfig {
        host: host.clone(),
        port,
        cors_origins,
        ..config
    };

    println!("Starting draftgate server on {}:{}...", host, port);

    let addr = draftgate_server::start_server(config).await?;
    println!("draftgate server listening on http://{}", addr);
    tracing::info!("[Cli] server listening on {}", addr);

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    tracing::info!("[Cli] interrupt received, shutting down");
    println!("\nShutting down...");
    Ok(())
}

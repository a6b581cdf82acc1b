//! `taskgate server`: Start the taskgate HTTP server.

pub async fn run(
    host: String,
    port: u16,
    config_path: Option<String>,
    tools_url: Option<String>,
) -> Result<(), String> {
    let config = taskgate_server::ServerConfig {
        host: host.clone(),
        port,
        config_path,
        tools_url,
    };

    println!("Starting taskgate server on {}:{}...", host, port);

    let addr = taskgate_server::start_server(config).await?;
    println!("taskgate server listening on http://{}", addr);

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    println!("\nShutting down...");
    Ok(())
}

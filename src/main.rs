use std::sync::Arc;

use wiki_md::config::Config;
use wiki_md::routes::router;
use wiki_md::wiki::WikiClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        image_dir = %config.image_dir.display(),
        direct_hosts = ?config.direct_hosts,
        username_configured = config.username.is_some(),
        password_configured = config.password.is_some(),
        "configuration loaded"
    );

    let bind_addr = config.bind_addr;
    let client = Arc::new(WikiClient::new(config)?);
    let app = router(client);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

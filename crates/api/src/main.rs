use anyhow::Context;

use partledger_api::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    partledger_observability::init();

    let settings = Settings::from_env().context("invalid configuration")?;
    let app = partledger_api::app::build_app(&settings).await?;

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        persistent = settings.use_persistent_stores,
        "listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

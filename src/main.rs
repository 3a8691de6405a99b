use echoinwhispr::{auth, config::Config, db, scheduler, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("echoinwhispr=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    let db_pool = db::connect(&config.database_url, 16).await?;

    let clients = match &config.oauth_clients {
        Some(path) => auth::Clients::from_file(path, &config.public_url)?,
        None => {
            warn!("OAUTH_CLIENTS not set, sign-in is disabled");
            auth::Clients::default()
        }
    };
    if config.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET not set, identity webhooks will be rejected");
    }

    let bind_addr = config.bind_addr;
    let state = AppState::new(db_pool.clone(), clients, config);
    state.files.ensure_dir().await?;

    scheduler::spawn(db_pool);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("listening on {bind_addr}");
    axum::serve(listener, echoinwhispr::app(state)).await?;
    Ok(())
}

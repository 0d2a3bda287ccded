use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use helpdesk_server::auth::jwt;
use helpdesk_server::chat::store::{MemoryMessageStore, MessageStore, SqliteMessageStore};
use helpdesk_server::config::{generate_config_template, Config};
use helpdesk_server::ws::hub::{self, Hub};
use helpdesk_server::{db, routes, state};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("helpdesk_server=info"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter())
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter())
            .init();
    }

    let chat = config.chat();
    chat.validate()?;

    // Shared secret from config, or a 256-bit key kept in data_dir
    let jwt_secret =
        jwt::load_or_generate_jwt_secret(config.jwt_secret.as_deref(), &config.data_dir)?;

    // Handle --issue-token: print a token for local testing and exit
    if let Some(user_id) = config.issue_token {
        let token = jwt::issue_access_token(
            &jwt_secret,
            user_id,
            &config.issue_token_role,
            jwt::OPERATOR_TOKEN_TTL_SECS,
        )?;
        println!("{}", token);
        return Ok(());
    }

    tracing::info!(
        "Helpdesk server v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let store: Arc<dyn MessageStore> = if config.ephemeral {
        tracing::warn!("Ephemeral mode: chat history is kept in memory only");
        Arc::new(MemoryMessageStore::new())
    } else {
        Arc::new(SqliteMessageStore::new(db::init_db(&config.data_dir)?))
    };

    // Start the session router on its own thread
    let hub = hub::spawn(
        Hub::new(store.clone(), chat.history_limit),
        chat.event_queue_capacity,
    )?;

    let app_state = state::AppState {
        hub,
        store,
        jwt_secret,
        chat,
        http: reqwest::Client::new(),
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

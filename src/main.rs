//! Chathub server binary: config, wiring, serve.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use chathub::adapters::ai::{AnthropicConfig, AnthropicProvider, MockAiProvider};
use chathub::adapters::auth::{MockIdentityVerifier, OidcConfig, OidcIdentityVerifier};
use chathub::adapters::memory::MemoryChatStore;
use chathub::adapters::postgres::PgChatStore;
use chathub::adapters::rate_limiter::InMemoryRateLimiter;
use chathub::adapters::websocket;
use chathub::application::App;
use chathub::config::{AiProviderKind, AppConfig, AuthMode, StoreEngine};
use chathub::ports::{AiProvider, ChatStore, IdentityVerifier, RateLimiter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;

    init_tracing(config.is_production());
    config.validate()?;

    let store: Arc<dyn ChatStore> = match config.database.engine {
        StoreEngine::Postgres => {
            let url = config.database.url.as_deref().expect("validated above");
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(url)
                .await?;
            tracing::info!("connected to postgres");
            Arc::new(PgChatStore::new(pool))
        }
        StoreEngine::Memory => {
            tracing::warn!("using the in-memory store; state is lost on restart");
            Arc::new(MemoryChatStore::new())
        }
    };

    let verifier: Arc<dyn IdentityVerifier> = match config.auth.mode {
        AuthMode::Oidc => {
            let oidc = OidcConfig::new(
                config.auth.issuer_url.clone().expect("validated above"),
                config.auth.audience.clone().expect("validated above"),
            );
            Arc::new(OidcIdentityVerifier::new(oidc))
        }
        AuthMode::Mock => {
            tracing::warn!("using the mock identity verifier");
            Arc::new(MockIdentityVerifier::new())
        }
    };

    let ai: Arc<dyn AiProvider> = match config.ai.provider {
        AiProviderKind::Anthropic => {
            let mut anthropic =
                AnthropicConfig::new(config.ai.api_key.clone().expect("validated above"));
            if let Some(model) = &config.ai.model {
                anthropic = anthropic.with_model(model.clone());
            }
            if let Some(base_url) = &config.ai.base_url {
                anthropic = anthropic.with_base_url(base_url.clone());
            }
            Arc::new(AnthropicProvider::new(anthropic))
        }
        AiProviderKind::Mock => {
            tracing::warn!("using the mock AI provider");
            Arc::new(MockAiProvider::new())
        }
    };

    let limiter: Arc<dyn RateLimiter> = Arc::new(InMemoryRateLimiter::default());

    let app = App::new(
        store,
        verifier,
        ai,
        limiter,
        config.timeouts.to_timeouts(),
        config.server.outbound_queue_capacity,
    );

    let cors = if config.server.allowed_origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<http::HeaderValue> = config
            .server
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    let router = websocket::router(app)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = config.server.socket_addr()?;
    tracing::info!(%addr, "chathub listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

fn init_tracing(production: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chathub=info,tower_http=info"));
    if production {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

//! PaperTrader backend server.

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use dotenv::dotenv;
use papertrader_backend::{
    api::{self, AppState},
    auth::{api as auth_api, middleware::auth_middleware, middleware::optional_auth_middleware,
        AuthState, JwtHandler, UserStore},
    market::{BinanceClient, MarketCache, DEFAULT_BINANCE_API_URL},
    middleware::{rate_limit_middleware, request_logging, RateLimitConfig, RateLimiter},
    portfolio::PortfolioStore,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::{env, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("PaperTrader backend starting");

    let jwt_secret = env::var("JWT_SECRET")
        .unwrap_or_else(|_| "dev-secret-change-in-production-minimum-32-characters".to_string());

    let auth_db_path = resolve_data_path(env::var("AUTH_DB_PATH").ok(), "papertrader_auth.db");
    let portfolio_db_path =
        resolve_data_path(env::var("PORTFOLIO_DB_PATH").ok(), "papertrader_portfolios.db");

    let user_store = Arc::new(UserStore::new(&auth_db_path)?);
    let jwt_handler = Arc::new(JwtHandler::new(jwt_secret));
    let auth_state = AuthState::new(user_store.clone(), jwt_handler.clone());
    info!("auth database: {}", auth_db_path);

    let portfolio_store = Arc::new(PortfolioStore::new(&portfolio_db_path)?);
    info!("portfolio database: {}", portfolio_db_path);

    let binance_base =
        env::var("BINANCE_API_URL").unwrap_or_else(|_| DEFAULT_BINANCE_API_URL.to_string());
    let market = Arc::new(BinanceClient::new(&binance_base)?);
    let cache = Arc::new(MarketCache::new());

    let app_state = AppState {
        portfolios: portfolio_store,
        users: user_store,
        market,
        cache: cache.clone(),
    };

    let rate_limiter = RateLimiter::new(RateLimitConfig::default());

    // Periodic in-memory housekeeping.
    {
        let cache = cache.clone();
        let limiter = rate_limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(600));
            loop {
                ticker.tick().await;
                cache.evict_older_than(Duration::from_secs(24 * 3600));
                limiter.cleanup();
            }
        });
    }

    let auth_router = Router::new()
        .route("/api/auth/register", post(auth_api::register))
        .route("/api/auth/login", post(auth_api::login))
        .with_state(auth_state.clone());

    let me_router = Router::new()
        .route("/api/auth/me", get(auth_api::get_current_user))
        .route_layer(middleware::from_fn_with_state(
            jwt_handler.clone(),
            auth_middleware,
        ))
        .with_state(auth_state);

    let protected_routes = api::trading_router()
        // Rate limiting keys off the Claims the auth layer injects, so it
        // must run after auth. route_layer applies bottom-up: the auth
        // layer added last wraps the rate limiter.
        .route_layer(middleware::from_fn_with_state(
            rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            jwt_handler.clone(),
            auth_middleware,
        ))
        .with_state(app_state.clone());

    // Leaderboard is public but personalizes its response for valid tokens.
    let leaderboard_router = Router::new()
        .route("/api/leaderboard", get(api::market::get_leaderboard))
        .route_layer(middleware::from_fn_with_state(
            rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            jwt_handler,
            optional_auth_middleware,
        ))
        .with_state(app_state.clone());

    let public_routes = api::market_router()
        .route_layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .with_state(app_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(leaderboard_router)
        .merge(me_router)
        .merge(auth_router)
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive());

    let port = env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(5000);
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "papertrader_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn default_data_path(filename: &str) -> String {
    // Anchor defaults to the crate directory so running from elsewhere
    // doesn't create a fresh empty DB in a different working directory.
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    base.join(filename).to_string_lossy().to_string()
}

fn resolve_data_path(env_value: Option<String>, default_filename: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) else {
        return default_data_path(default_filename);
    };

    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }

    base.join(p).to_string_lossy().to_string()
}

fn load_env() {
    let _ = dotenv();

    // Also try the crate-root .env when launched via --manifest-path.
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}

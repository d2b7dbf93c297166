//! storelink API server.
//!
//! Serves the storefront SSO endpoints:
//! - `GET /login` starts a login against the store's identity provider
//! - `GET|POST /oidc/:provider_type/callback` and `POST /saml/:provider_type/callback`
//! - `GET /credentials` hands the one-time storefront credentials to the login page
//! - `GET /health`

mod config;
mod logging;
mod state;

use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use storelink_sso::sso_router;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::state::AppState;

/// How often expired redirect state and hand-offs are swept.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_addr = %config.bind_addr,
        env = %config.app_env,
        state_backend = ?config.state_backend,
        password_update_policy = config.password_update_policy.as_str(),
        login_codes = config.login_code_webhook.is_some(),
        "Starting storelink API"
    );

    match config.validate_security_config() {
        Ok(warnings) => {
            for warning in &warnings {
                tracing::warn!(target: "security", "{}", warning);
            }
            if !warnings.is_empty() {
                tracing::warn!(
                    target: "security",
                    count = warnings.len(),
                    "Insecure default values detected (allowed in {} mode)",
                    config.app_env
                );
            }
        }
        Err(errors) => {
            for error in &errors {
                tracing::error!(target: "security", "{}", error);
            }
            eprintln!(
                "FATAL: {} insecure setting(s) detected in production mode. \
                 Set real secrets or use APP_ENV=development.",
                errors.len()
            );
            std::process::exit(1);
        }
    }

    let app_state = match AppState::build(&config).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize services");
            std::process::exit(1);
        }
    };

    {
        let ephemeral = app_state.ephemeral.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                interval.tick().await;
                match ephemeral.purge_expired().await {
                    Ok(count) if count > 0 => {
                        tracing::debug!(deleted = count, "Purged expired ephemeral state");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to purge expired ephemeral state");
                    }
                }
            }
        });
    }

    let app = Router::new()
        .merge(sso_router())
        .with_state(app_state.sso.clone())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = match config.bind_addr.parse() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("Invalid bind address '{}': {e}", config.bind_addr);
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to address {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!(%addr, "Server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }

    if let Some(pool) = app_state.db {
        pool.close().await;
    }
    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

//! Weather API HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server exposing Open-Meteo weather
//! data behind x402 payment gating.
//!
//! Endpoints:
//! - `GET /health` – Health check (free, no payment)
//! - `GET /weather/current` – Current weather for a city or coordinates (paid)
//! - `GET /weather/forecast` – Daily forecast, 1-7 days (paid)
//!
//! This server includes:
//! - x402 payment middleware backed by a remote facilitator
//! - OpenTelemetry tracing via `TraceLayer`
//! - CORS support for cross-origin clients
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `EVM_ADDRESS`, `NETWORK`, `FACILITATOR_URL`, `PRICE` configure payments
//! - `CDP_API_KEY_ID` + `CDP_API_KEY_SECRET` select the Coinbase-managed
//!   facilitator instead of `FACILITATOR_URL`
//! - `HOST`, `PORT`, `BASE_URL` control binding and advertised resource URLs
//! - `OTEL_*` variables enable tracing to systems like Honeycomb

use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors;

use x402_weather_api::config::{CDP_FACILITATOR_URL, Config};
use x402_weather_api::facilitator_client::FacilitatorClient;
use x402_weather_api::handlers::{self, AppState};
use x402_weather_api::layer::X402Middleware;
use x402_weather_api::pricing::RoutePricingTable;
use x402_weather_api::util::{SigDown, Telemetry};
use x402_weather_api::weather::OpenMeteo;

/// Deadline for facilitator verify and settle calls.
const FACILITATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Initializes the weather API server.
///
/// - Loads `.env` variables.
/// - Initializes OpenTelemetry tracing.
/// - Builds the route pricing table and facilitator client.
/// - Starts an Axum HTTP server with the payment gate wrapping the handlers.
///
/// Binds to the address specified by the `HOST` and `PORT` env vars.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;

    let pricing = RoutePricingTable::try_new(&config)?;
    let facilitator = match config.cdp_credentials() {
        Some(credentials) => FacilitatorClient::try_from(CDP_FACILITATOR_URL)?
            .with_headers(credentials.headers()?),
        None => FacilitatorClient::try_from(config.facilitator_url())?,
    };
    let facilitator = Arc::new(facilitator.with_timeout(FACILITATOR_TIMEOUT));
    let weather = OpenMeteo::new();
    let state = AppState {
        weather,
        network: config.network().to_string(),
    };

    let http_endpoints = handlers::routes()
        .with_state(state)
        .layer(X402Middleware::new(
            facilitator,
            pricing,
            config.base_url().clone(),
        ))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    Ok(())
}

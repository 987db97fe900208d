//! Global weather data API monetized with [x402](https://www.x402.org)
//! micropayments.
//!
//! This crate serves current weather conditions and daily forecasts for any
//! city worldwide, powered by the free Open-Meteo API. The two weather routes
//! are priced: every request must carry an `X-PAYMENT` header with an x402
//! payment, verified against a remote facilitator before the handler runs and
//! settled on-chain afterwards. `GET /health` stays free.
//!
//! # Request pipeline
//!
//! ```text
//! request → X402Middleware (pricing lookup, verify) → handler → Open-Meteo
//!         ↘ 402 challenge when payment is missing      ↘ settle (detached)
//! ```
//!
//! # Modules
//!
//! - [`config`] — Environment-backed server configuration.
//! - [`error`] — Request-facing error taxonomy for the weather endpoints.
//! - [`proto`] — x402 v1 wire types (payloads, requirements, verify/settle).
//! - [`facilitator`] — The [`Facilitator`](facilitator::Facilitator) trait,
//!   the verification and settlement seam.
//! - [`facilitator_client`] — HTTP client for a remote x402 facilitator.
//! - [`networks`] — Known USDC deployments per payment network.
//! - [`pricing`] — Route pricing registry consulted by the payment gate.
//! - [`paygate`] — Per-request payment decision and settlement dispatch.
//! - [`layer`] — Tower layer applying the paygate to the router.
//! - [`weather`] — Open-Meteo upstream client and the WMO code table.
//! - [`handlers`] — Axum handlers and response records.
//! - [`util`] — Base64 codec, money parsing, telemetry, signal handling.

pub mod config;
pub mod error;
pub mod facilitator;
pub mod facilitator_client;
pub mod handlers;
pub mod layer;
pub mod networks;
pub mod paygate;
pub mod pricing;
pub mod proto;
pub mod util;
pub mod weather;

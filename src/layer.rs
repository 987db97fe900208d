//! Axum middleware enforcing [x402](https://www.x402.org) payments on priced routes.
//!
//! The middleware wraps the whole router. For every request it consults the
//! [`RoutePricingTable`]: routes without a price pass through untouched, priced
//! routes are gated by [`Paygate`]. Incoming `X-PAYMENT` headers are verified
//! with the configured x402 facilitator before the handler runs, and verified
//! payments are settled in a detached task after the handler has answered.
//!
//! Returns a `402 Payment Required` JSON response if a priced request lacks a
//! valid payment.
//!
//! ## Example Usage
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use std::sync::Arc;
//! use url::Url;
//! use x402_weather_api::config::PayToAddress;
//! use x402_weather_api::facilitator_client::FacilitatorClient;
//! use x402_weather_api::layer::X402Middleware;
//! use x402_weather_api::pricing::RoutePricingTable;
//! use x402_weather_api::util::money_amount::MoneyAmount;
//!
//! let pay_to: PayToAddress = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
//!     .parse()
//!     .unwrap();
//! let price = MoneyAmount::parse("$0.001").unwrap();
//! let pricing = RoutePricingTable::for_network("base-sepolia", &pay_to, &price).unwrap();
//! let facilitator =
//!     Arc::new(FacilitatorClient::try_from("https://x402.org/facilitator").unwrap());
//! let base_url = Url::parse("https://weather.example.com/").unwrap();
//!
//! let app: Router = Router::new()
//!     .route("/weather/current", get(|| async { "paid content" }))
//!     .route("/health", get(|| async { "free content" }))
//!     .layer(X402Middleware::new(facilitator, pricing, base_url));
//! ```

use axum::extract::Request;
use axum::response::Response;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
use url::Url;

use crate::facilitator::Facilitator;
use crate::paygate::Paygate;
use crate::pricing::RoutePricingTable;

/// The x402 middleware instance gating priced routes behind payments.
///
/// Create a single instance per application and apply it to the router with
/// [`Router::layer`](axum::Router::layer).
#[derive(Clone, Debug)]
pub struct X402Middleware<TFacilitator> {
    facilitator: TFacilitator,
    pricing: Arc<RoutePricingTable>,
    base_url: Arc<Url>,
}

impl<TFacilitator> X402Middleware<TFacilitator> {
    /// Creates the middleware from a facilitator, a pricing table, and the
    /// public base URL that priced resource URLs are resolved against.
    pub fn new(facilitator: TFacilitator, pricing: RoutePricingTable, base_url: Url) -> Self {
        Self {
            facilitator,
            pricing: Arc::new(pricing),
            base_url: Arc::new(base_url),
        }
    }
}

impl<S, TFacilitator> Layer<S> for X402Middleware<TFacilitator>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    TFacilitator: Facilitator + Clone,
{
    type Service = X402MiddlewareService<TFacilitator>;

    fn layer(&self, inner: S) -> Self::Service {
        X402MiddlewareService {
            facilitator: self.facilitator.clone(),
            pricing: self.pricing.clone(),
            base_url: self.base_url.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// Axum service that enforces x402 payments on incoming requests.
#[derive(Clone)]
pub struct X402MiddlewareService<TFacilitator> {
    /// Payment facilitator used for verification and settlement
    facilitator: TFacilitator,
    /// Pricing for every paid route
    pricing: Arc<RoutePricingTable>,
    /// Base URL for constructing resource URLs
    base_url: Arc<Url>,
    /// The inner Axum service being wrapped
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<TFacilitator> Service<Request> for X402MiddlewareService<TFacilitator>
where
    TFacilitator: Facilitator + Clone + Send + Sync + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    /// Delegates readiness polling to the wrapped inner service.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    /// Intercepts the request, injects payment enforcement logic, and forwards to the wrapped service.
    fn call(&mut self, req: Request) -> Self::Future {
        let gate = Paygate {
            facilitator: self.facilitator.clone(),
            pricing: self.pricing.clone(),
            base_url: self.base_url.clone(),
        };
        Box::pin(gate.handle_request(self.inner.clone(), req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PayToAddress;
    use crate::facilitator_client::FacilitatorClient;
    use crate::proto::PaymentRequired;
    use crate::util::b64::Base64Bytes;
    use crate::util::money_amount::MoneyAmount;
    use axum::Router;
    use axum::body::Body;
    use axum::routing::get;
    use http::StatusCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAY_TO: &str = "0x1111111111111111111111111111111111111111";

    fn middleware(facilitator_url: &str) -> X402Middleware<Arc<FacilitatorClient>> {
        let pay_to: PayToAddress = PAY_TO.parse().unwrap();
        let price = MoneyAmount::parse("$0.001").unwrap();
        let pricing = RoutePricingTable::for_network("base-sepolia", &pay_to, &price).unwrap();
        let facilitator = Arc::new(FacilitatorClient::try_from(facilitator_url).unwrap());
        X402Middleware::new(
            facilitator,
            pricing,
            Url::parse("http://0.0.0.0:4022/").unwrap(),
        )
    }

    fn payment_header() -> String {
        let payload = r#"{"x402Version":1,"scheme":"exact","network":"base-sepolia","payload":{"signature":"0xsig"}}"#;
        Base64Bytes::encode(payload.as_bytes()).to_string()
    }

    async fn mount_verify(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_settle(server: &MockServer, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(template)
            .mount(server)
            .await;
    }

    /// Settlement runs detached, so poll the mock server instead of joining a task.
    async fn saw_settlement(server: &MockServer) -> bool {
        for _ in 0..50 {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests.iter().any(|r| r.url.path() == "/settle") {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unpriced_routes_pass_through() {
        let server = MockServer::start().await;
        let app = Router::new()
            .route("/health", get(|| async { "healthy" }))
            .layer(middleware(&server.uri()));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn priced_route_without_payment_is_402() {
        let server = MockServer::start().await;
        let app = Router::new()
            .route("/weather/current", get(|| async { "paid content" }))
            .layer(middleware(&server.uri()));

        let response = app
            .oneshot(
                Request::get("/weather/current?city=Tokyo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let challenge: PaymentRequired = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            challenge.error.as_deref(),
            Some("X-PAYMENT header is required")
        );
        assert_eq!(challenge.accepts.len(), 1);
        let terms = &challenge.accepts[0];
        assert_eq!(terms.scheme, "exact");
        assert_eq!(terms.network, "base-sepolia");
        assert_eq!(terms.max_amount_required, "1000");
        assert_eq!(terms.pay_to, PAY_TO);
        assert_eq!(
            terms.resource,
            "http://0.0.0.0:4022/weather/current?city=Tokyo"
        );
    }

    #[tokio::test]
    async fn paid_request_reaches_handler_and_settles() {
        let server = MockServer::start().await;
        mount_verify(&server, json!({ "isValid": true, "payer": "0xabc" })).await;
        mount_settle(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "payer": "0xabc",
                "transaction": "0xtxhash",
                "network": "base-sepolia",
            })),
        )
        .await;

        let app = Router::new()
            .route("/weather/current", get(|| async { "paid content" }))
            .layer(middleware(&server.uri()));

        let response = app
            .oneshot(
                Request::get("/weather/current")
                    .header("X-PAYMENT", payment_header())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"paid content");
        assert!(saw_settlement(&server).await, "settlement never reached the facilitator");
    }

    #[tokio::test]
    async fn rejected_payment_is_402_and_handler_never_runs() {
        let server = MockServer::start().await;
        mount_verify(
            &server,
            json!({ "isValid": false, "invalidReason": "insufficient_funds" }),
        )
        .await;

        let handler_ran = Arc::new(AtomicBool::new(false));
        let flag = handler_ran.clone();
        let app = Router::new()
            .route(
                "/weather/current",
                get(move || {
                    let flag = flag.clone();
                    async move {
                        flag.store(true, Ordering::SeqCst);
                        "paid content"
                    }
                }),
            )
            .layer(middleware(&server.uri()));

        let response = app
            .oneshot(
                Request::get("/weather/current")
                    .header("X-PAYMENT", payment_header())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Verification failed: insufficient_funds");
        assert!(!handler_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn handler_failure_skips_settlement() {
        let server = MockServer::start().await;
        mount_verify(&server, json!({ "isValid": true, "payer": "0xabc" })).await;
        mount_settle(&server, ResponseTemplate::new(200)).await;

        let app = Router::new()
            .route(
                "/weather/current",
                get(|| async { (StatusCode::NOT_FOUND, "City not found: Nowhere") }),
            )
            .layer(middleware(&server.uri()));

        let response = app
            .oneshot(
                Request::get("/weather/current")
                    .header("X-PAYMENT", payment_header())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        tokio::time::sleep(Duration::from_millis(150)).await;
        let requests = server.received_requests().await.unwrap_or_default();
        assert!(!requests.iter().any(|r| r.url.path() == "/settle"));
    }

    #[tokio::test]
    async fn settlement_failure_never_changes_the_response() {
        let server = MockServer::start().await;
        mount_verify(&server, json!({ "isValid": true, "payer": "0xabc" })).await;
        mount_settle(&server, ResponseTemplate::new(500).set_body_string("boom")).await;

        let app = Router::new()
            .route("/weather/current", get(|| async { "paid content" }))
            .layer(middleware(&server.uri()));

        let response = app
            .oneshot(
                Request::get("/weather/current")
                    .header("X-PAYMENT", payment_header())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("X-Payment-Response").is_none());
        assert!(saw_settlement(&server).await);
    }

    #[tokio::test]
    async fn forecast_route_is_priced_too() {
        let server = MockServer::start().await;
        let app = Router::new()
            .route("/weather/forecast", get(|| async { "paid content" }))
            .layer(middleware(&server.uri()));

        let response = app
            .oneshot(
                Request::get("/weather/forecast?city=Paris&days=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }
}

//! Per-request payment gate.
//!
//! The paygate inspects one request against the [`RoutePricingTable`] and
//! resolves it into a [`Decision`]:
//!
//! - routes absent from the table pass through untouched,
//! - priced routes without an acceptable payment are answered with
//!   `402 Payment Required` and the route's payment terms,
//! - priced routes with a facilitator-verified payment run the inner handler,
//!   and settlement is dispatched as a detached task once the handler has
//!   produced a success response.
//!
//! Verification is fail-closed: when the facilitator cannot be reached the
//! request is challenged, never waved through. Settlement is fail-open: its
//! outcome is logged and never changes the response already sent to the buyer.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, StatusCode, Uri};
use std::convert::Infallible;
use std::sync::Arc;
use tower::Service;
use tracing::{Instrument, instrument};
use url::Url;

use crate::facilitator::Facilitator;
use crate::pricing::RoutePricingTable;
use crate::proto::{
    PaymentPayload, PaymentRequired, PaymentRequirements, SettleRequest, SettleResponse,
    VerifyRequest, VerifyResponse, X402Version1,
};
use crate::util::b64::Base64Bytes;

/// HTTP header carrying the buyer's payment authorization.
pub const X_PAYMENT_HEADER: &str = "X-PAYMENT";

/// Why a priced request was not let through.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("{0} header is required")]
    PaymentHeaderRequired(&'static str),
    #[error("Invalid or malformed payment header")]
    InvalidPaymentHeader,
    #[error("Unable to find matching payment requirements")]
    NoPaymentMatching,
    #[error("Verification failed: {0}")]
    VerificationFailed(String),
}

/// Outcome of evaluating one request against the pricing table.
#[derive(Debug)]
pub enum Decision {
    /// The route is not priced; pass the request through untouched.
    Free,
    /// The route is priced and the payment is missing or rejected; answer
    /// with a 402 challenge carrying the route's terms.
    Challenge {
        requirements: PaymentRequirements,
        reason: VerificationError,
    },
    /// The payment verified; execute the route, then settle.
    Proceed {
        settle_request: SettleRequest,
        payer: String,
    },
}

/// Payment gate state for a single request.
pub struct Paygate<TFacilitator> {
    /// The facilitator used for verifying and settling payments.
    pub facilitator: TFacilitator,
    /// Pricing for every paid route.
    pub pricing: Arc<RoutePricingTable>,
    /// Public base URL that request paths are resolved against.
    pub base_url: Arc<Url>,
}

impl<TFacilitator> Paygate<TFacilitator> {
    /// Calls the inner service within a tracing span.
    async fn call_inner<
        ReqBody,
        ResBody,
        S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    >(
        mut inner: S,
        req: http::Request<ReqBody>,
    ) -> Result<http::Response<ResBody>, S::Error>
    where
        S::Future: Send,
    {
        inner
            .call(req)
            .instrument(tracing::info_span!("inner"))
            .await
    }
}

impl<TFacilitator> Paygate<TFacilitator>
where
    TFacilitator: Facilitator + Send + Sync + 'static,
{
    /// Handles an incoming request, gating it on payment if the route is
    /// priced.
    ///
    /// Returns a 402 response when payment is required and absent or invalid.
    /// Otherwise returns the response from the inner service.
    #[instrument(name = "x402.handle_request", skip_all)]
    pub async fn handle_request<
        ReqBody,
        ResBody,
        S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    >(
        self,
        inner: S,
        req: http::Request<ReqBody>,
    ) -> Result<Response, Infallible>
    where
        S::Response: IntoResponse,
        S::Error: IntoResponse,
        S::Future: Send,
    {
        // Evaluate the decision against a body-less view of the request so the
        // future stays `Send` even when `ReqBody` is not `Sync`.
        let (parts, body) = req.into_parts();
        let probe = http::Request::from_parts(parts, ());
        let decision = self.decide(&probe).await;
        let (parts, ()) = probe.into_parts();
        let req = http::Request::from_parts(parts, body);
        match decision {
            Decision::Free => {
                let response = match Self::call_inner(inner, req).await {
                    Ok(response) => response,
                    Err(err) => return Ok(err.into_response()),
                };
                Ok(response.into_response())
            }
            Decision::Challenge {
                requirements,
                reason,
            } => {
                tracing::debug!(error = %reason, resource = %requirements.resource, "Challenging request");
                Ok(error_into_response(reason, requirements))
            }
            Decision::Proceed {
                settle_request,
                payer,
            } => {
                let response = match Self::call_inner(inner, req).await {
                    Ok(response) => response,
                    Err(err) => return Ok(err.into_response()),
                };
                let response = response.into_response();
                if response.status().is_client_error() || response.status().is_server_error() {
                    tracing::debug!(
                        status = %response.status(),
                        payer = %payer,
                        "Skipping settlement for unsuccessful response"
                    );
                    return Ok(response);
                }
                self.spawn_settlement(settle_request, payer);
                Ok(response)
            }
        }
    }

    /// Resolves one request into a [`Decision`] against the pricing table.
    pub async fn decide<ReqBody>(&self, req: &http::Request<ReqBody>) -> Decision {
        let Some(offer) = self.pricing.lookup(req.method(), req.uri().path()) else {
            return Decision::Free;
        };
        let resource = resource_url(&self.base_url, req.uri());
        let requirements = offer.requirements(&resource);
        match self.verify_payment(req.headers(), &requirements).await {
            Ok((settle_request, payer)) => Decision::Proceed {
                settle_request,
                payer,
            },
            Err(reason) => Decision::Challenge {
                requirements,
                reason,
            },
        }
    }

    /// Extracts the payment from the request headers and verifies it with
    /// the facilitator.
    ///
    /// On success returns the request to later settle with, plus the payer
    /// address reported by the facilitator.
    async fn verify_payment(
        &self,
        headers: &HeaderMap,
        requirements: &PaymentRequirements,
    ) -> Result<(SettleRequest, String), VerificationError> {
        let header = extract_payment_header(headers)
            .ok_or(VerificationError::PaymentHeaderRequired(X_PAYMENT_HEADER))?;
        let payment_payload = extract_payment_payload::<PaymentPayload>(header)
            .ok_or(VerificationError::InvalidPaymentHeader)?;

        if payment_payload.scheme != requirements.scheme
            || payment_payload.network != requirements.network
        {
            return Err(VerificationError::NoPaymentMatching);
        }

        let verify_request = VerifyRequest {
            x402_version: X402Version1,
            payment_payload,
            payment_requirements: requirements.clone(),
        };

        let verify_response = self
            .facilitator
            .verify(&verify_request)
            .await
            .map_err(|e| VerificationError::VerificationFailed(format!("{e}")))?;

        match verify_response {
            VerifyResponse::Valid { payer } => {
                tracing::debug!(payer = %payer, "Payment verified");
                Ok((verify_request, payer))
            }
            VerifyResponse::Invalid { reason, .. } => {
                Err(VerificationError::VerificationFailed(reason))
            }
        }
    }

    /// Dispatches settlement as a detached task.
    ///
    /// The buyer's response has already been decided at this point, so the
    /// settlement outcome is only logged.
    fn spawn_settlement(self, settle_request: SettleRequest, payer: String) {
        let facilitator = self.facilitator;
        tokio::spawn(
            async move {
                match facilitator.settle(&settle_request).await {
                    Ok(SettleResponse::Success {
                        payer,
                        transaction,
                        network,
                    }) => {
                        tracing::info!(
                            payer = %payer,
                            transaction = %transaction,
                            network = %network,
                            "Payment settled"
                        );
                    }
                    Ok(SettleResponse::Error { reason, network }) => {
                        tracing::warn!(
                            payer = %payer,
                            reason = %reason,
                            network = %network,
                            "Settlement rejected"
                        );
                    }
                    Err(error) => {
                        tracing::warn!(payer = %payer, error = %error, "Settlement request failed");
                    }
                }
            }
            .instrument(tracing::info_span!("x402.settle_payment")),
        );
    }
}

/// Builds the 402 challenge response for a rejected request.
fn error_into_response(err: VerificationError, requirements: PaymentRequirements) -> Response {
    let payment_required = PaymentRequired {
        x402_version: X402Version1,
        accepts: vec![requirements],
        error: Some(err.to_string()),
    };
    let payment_required_bytes =
        serde_json::to_vec(&payment_required).expect("serialization failed");
    Response::builder()
        .status(StatusCode::PAYMENT_REQUIRED)
        .header("Content-Type", "application/json")
        .body(Body::from(payment_required_bytes))
        .expect("Fail to construct response")
}

/// Resolves the resource URL of the current request against the public base
/// URL, keeping any path prefix the base carries (e.g. a reverse proxy
/// mounting the service under `/api/`).
fn resource_url(base_url: &Url, request_uri: &Uri) -> Url {
    let mut url = base_url.clone();
    let base_path = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base_path}{}", request_uri.path()));
    url.set_query(request_uri.query());
    url
}

/// Extracts the payment header value from the header map.
fn extract_payment_header(header_map: &HeaderMap) -> Option<&[u8]> {
    header_map.get(X_PAYMENT_HEADER).map(|h| h.as_bytes())
}

/// Extracts and deserializes the payment payload from base64-encoded header bytes.
fn extract_payment_payload<T>(header_bytes: &[u8]) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    let decoded = Base64Bytes::from(header_bytes).decode().ok()?;
    let value = serde_json::from_slice(&decoded).ok()?;
    Some(value)
}

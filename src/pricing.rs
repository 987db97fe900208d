//! Pricing registry for paid routes.
//!
//! Every paid route is listed here with its payment terms and the resource
//! metadata advertised in 402 challenges. The payment gate consults the table
//! on every request: routes absent from the table are free.

use http::Method;
use serde_json::json;
use std::collections::HashMap;
use url::Url;

use crate::config::{Config, PayToAddress};
use crate::networks::UsdcDeployment;
use crate::proto::PaymentRequirements;
use crate::util::money_amount::{MoneyAmount, MoneyAmountParseError};

/// Payment validity window advertised in requirements.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 60;

/// Payment terms shared by all paid routes: scheme, recipient, asset, and
/// amount in atomic token units.
#[derive(Clone, Debug)]
pub struct PriceTag {
    pub scheme: String,
    pub pay_to: String,
    pub asset: String,
    pub network: String,
    pub amount: String,
    pub max_timeout_seconds: u64,
    pub extra: Option<serde_json::Value>,
}

/// Payment terms plus resource metadata for one paid route.
#[derive(Clone, Debug)]
pub struct RouteOffer {
    price_tag: PriceTag,
    description: String,
    mime_type: String,
    output_schema: Option<serde_json::Value>,
}

impl RouteOffer {
    /// Builds the wire-format payment requirements for this route, anchored
    /// at the resource URL of the current request.
    pub fn requirements(&self, resource: &Url) -> PaymentRequirements {
        PaymentRequirements {
            scheme: self.price_tag.scheme.clone(),
            network: self.price_tag.network.clone(),
            max_amount_required: self.price_tag.amount.clone(),
            resource: resource.to_string(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
            output_schema: self.output_schema.clone(),
            pay_to: self.price_tag.pay_to.clone(),
            max_timeout_seconds: self.price_tag.max_timeout_seconds,
            asset: self.price_tag.asset.clone(),
            extra: self.price_tag.extra.clone(),
        }
    }
}

/// Errors produced while assembling the pricing table.
#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),
    #[error("Invalid price: {0}")]
    InvalidPrice(#[from] MoneyAmountParseError),
}

/// Pricing for every paid route, keyed by `"METHOD /path"`.
#[derive(Clone, Debug)]
pub struct RoutePricingTable {
    routes: HashMap<String, RouteOffer>,
}

impl RoutePricingTable {
    /// Builds the pricing table from the server configuration.
    pub fn try_new(config: &Config) -> Result<Self, PricingError> {
        Self::for_network(config.network(), config.pay_to(), config.price())
    }

    /// Builds the pricing table for an explicit network, recipient, and price.
    pub fn for_network(
        network: &str,
        pay_to: &PayToAddress,
        price: &MoneyAmount,
    ) -> Result<Self, PricingError> {
        let usdc = UsdcDeployment::by_network(network)
            .ok_or_else(|| PricingError::UnsupportedNetwork(network.to_string()))?;
        let amount = price.as_token_amount(usdc.decimals)?.to_string();
        let price_tag = PriceTag {
            scheme: "exact".to_string(),
            pay_to: pay_to.to_string(),
            asset: usdc.asset.to_string(),
            network: network.to_string(),
            amount,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
            extra: Some(usdc.eip712_extra()),
        };

        let mut routes = HashMap::new();
        routes.insert(
            "GET /weather/current".to_string(),
            RouteOffer {
                price_tag: price_tag.clone(),
                description: "Get current weather conditions for any city worldwide. \
                              Returns temperature, humidity, wind, precipitation, and condition description. \
                              Specify city name (geocoded automatically) or latitude/longitude coordinates."
                    .to_string(),
                mime_type: "application/json".to_string(),
                output_schema: Some(json!({
                    "input": {
                        "type": "http",
                        "queryParams": { "city": "Tokyo" },
                    },
                    "output": {
                        "type": "json",
                        "example": {
                            "city": "Tokyo",
                            "country": "Japan",
                            "latitude": 35.6895,
                            "longitude": 139.6917,
                            "temperature_c": 12.5,
                            "feels_like_c": 10.2,
                            "humidity_pct": 65,
                            "wind_speed_kmh": 15.3,
                            "wind_direction_deg": 270,
                            "precipitation_mm": 0.0,
                            "condition": "Partly cloudy",
                            "weather_code": 2,
                            "observation_time": "2026-02-20T15:00",
                            "attribution": "Weather data by Open-Meteo.com",
                        },
                    },
                })),
            },
        );
        routes.insert(
            "GET /weather/forecast".to_string(),
            RouteOffer {
                price_tag,
                description: "Get daily weather forecast (1-7 days) for any city worldwide. \
                              Returns max/min temperature, precipitation probability, and wind speed per day. \
                              Specify city name or latitude/longitude coordinates."
                    .to_string(),
                mime_type: "application/json".to_string(),
                output_schema: Some(json!({
                    "input": {
                        "type": "http",
                        "queryParams": { "city": "Tokyo", "days": "3" },
                    },
                    "output": {
                        "type": "json",
                        "example": {
                            "city": "Tokyo",
                            "country": "Japan",
                            "latitude": 35.6895,
                            "longitude": 139.6917,
                            "days": [
                                {
                                    "date": "2026-02-21",
                                    "condition": "Slight rain",
                                    "weather_code": 61,
                                    "temp_max_c": 15.2,
                                    "temp_min_c": 8.1,
                                    "precipitation_mm": 12.5,
                                    "precipitation_probability_pct": 85,
                                    "wind_max_kmh": 22.0,
                                },
                            ],
                            "attribution": "Weather data by Open-Meteo.com",
                        },
                    },
                })),
            },
        );
        Ok(RoutePricingTable { routes })
    }

    /// Returns the offer for a route, or `None` when the route is free.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<&RouteOffer> {
        self.routes.get(&format!("{method} {path}"))
    }
}

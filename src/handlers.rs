//! HTTP endpoint handlers for the weather API.
//!
//! Three routes: `GET /health` (free), `GET /weather/current`, and
//! `GET /weather/forecast` (both priced; the payment gate wraps the router
//! in `main`, so the handlers themselves are payment-agnostic). Handlers
//! validate caller input, resolve the requested location, delegate to
//! [`OpenMeteo`], and assemble the typed response records.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::ApiError;
use crate::weather::{CurrentConditions, ForecastDay, Location, OpenMeteo};

/// Attribution string carried by every weather response, required by the
/// Open-Meteo CC BY 4.0 license.
pub const ATTRIBUTION: &str = "Weather data by Open-Meteo.com";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Shared Open-Meteo client (one connection pool for the process).
    pub weather: OpenMeteo,
    /// Payment network name reported by `/health`.
    pub network: String,
}

/// Response body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub network: String,
}

/// Response body of `GET /weather/current`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentWeatherResponse {
    pub city: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(flatten)]
    pub conditions: CurrentConditions,
    pub attribution: String,
}

/// Response body of `GET /weather/forecast`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub city: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub days: Vec<ForecastDay>,
    pub attribution: String,
}

/// Query parameters shared by both weather routes.
#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    /// City name (e.g., Tokyo, London, New York)
    pub city: Option<String>,
    /// Latitude (-90 to 90)
    pub lat: Option<f64>,
    /// Longitude (-180 to 180)
    pub lon: Option<f64>,
}

/// Query parameters of `GET /weather/forecast`.
///
/// Repeats the location fields instead of flattening [`LocationQuery`]:
/// `serde_urlencoded` cannot drive numeric fields through `flatten`.
#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Number of forecast days (1-7)
    pub days: Option<u8>,
}

impl ForecastQuery {
    fn location(&self) -> LocationQuery {
        LocationQuery {
            city: self.city.clone(),
            lat: self.lat,
            lon: self.lon,
        }
    }
}

/// Default forecast length when `days` is absent.
const DEFAULT_FORECAST_DAYS: u8 = 3;

/// Builds the router for the weather API endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/weather/current", get(weather_current))
        .route("/weather/forecast", get(weather_forecast))
}

#[instrument(skip_all)]
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "weather-api".to_string(),
        network: state.network.clone(),
    })
}

#[instrument(skip_all)]
async fn weather_current(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<CurrentWeatherResponse>, ApiError> {
    let location = resolve_location(&state.weather, &query).await?;
    let conditions = state
        .weather
        .get_current(location.latitude, location.longitude)
        .await?;
    Ok(Json(CurrentWeatherResponse {
        city: location.name,
        country: location.country,
        latitude: location.latitude,
        longitude: location.longitude,
        conditions,
        attribution: ATTRIBUTION.to_string(),
    }))
}

#[instrument(skip_all)]
async fn weather_forecast(
    State(state): State<AppState>,
    Query(query): Query<ForecastQuery>,
) -> Result<Json<ForecastResponse>, ApiError> {
    let days = query.days.unwrap_or(DEFAULT_FORECAST_DAYS);
    if !(1..=7).contains(&days) {
        return Err(ApiError::BadRequest(
            "'days' must be between 1 and 7".to_string(),
        ));
    }
    let location = resolve_location(&state.weather, &query.location()).await?;
    let forecast_days = state
        .weather
        .get_forecast(location.latitude, location.longitude, days)
        .await?;
    Ok(Json(ForecastResponse {
        city: location.name,
        country: location.country,
        latitude: location.latitude,
        longitude: location.longitude,
        days: forecast_days,
        attribution: ATTRIBUTION.to_string(),
    }))
}

/// Resolves the caller-supplied location parameters into a [`Location`].
///
/// A full coordinate pair short-circuits: no geocoding call is made, the
/// name defaults to `"lat,lon"` and the country stays empty. A bare city
/// name is geocoded. Neither is a [`ApiError::BadRequest`].
async fn resolve_location(
    weather: &OpenMeteo,
    query: &LocationQuery,
) -> Result<Location, ApiError> {
    if let Some(lat) = query.lat {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ApiError::BadRequest(
                "'lat' must be between -90 and 90".to_string(),
            ));
        }
    }
    if let Some(lon) = query.lon {
        if !(-180.0..=180.0).contains(&lon) {
            return Err(ApiError::BadRequest(
                "'lon' must be between -180 and 180".to_string(),
            ));
        }
    }
    match (query.lat, query.lon) {
        (Some(lat), Some(lon)) => Ok(Location {
            name: query
                .city
                .clone()
                .unwrap_or_else(|| format!("{lat},{lon}")),
            country: String::new(),
            latitude: lat,
            longitude: lon,
        }),
        _ => match &query.city {
            Some(city) => weather.geocode(city).await,
            None => Err(ApiError::BadRequest(
                "Provide 'city' or both 'lat' and 'lon' parameters".to_string(),
            )),
        },
    }
}

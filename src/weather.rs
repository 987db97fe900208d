//! Open-Meteo upstream client.
//!
//! [`OpenMeteo`] wraps the free Open-Meteo geocoding and forecast APIs (no
//! API key required, CC BY 4.0) behind three operations: [`OpenMeteo::geocode`],
//! [`OpenMeteo::get_current`], and [`OpenMeteo::get_forecast`]. A single
//! `reqwest::Client` is constructed at startup and shared by every in-flight
//! request, so the connection pool is reused across requests.
//!
//! Every upstream failure is remapped into [`ApiError`] before it crosses
//! back into a handler: deadline overruns become [`ApiError::UpstreamTimeout`],
//! connection failures [`ApiError::UpstreamUnreachable`], non-200 statuses
//! [`ApiError::UpstreamUnavailable`], and 200 responses missing expected
//! structure [`ApiError::MalformedUpstreamResponse`]. Partial data is never
//! returned.

use http::StatusCode;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::error::ApiError;

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

const CURRENT_VARS: &str = "temperature_2m,relative_humidity_2m,apparent_temperature,\
                            weather_code,wind_speed_10m,wind_direction_10m,precipitation";
const DAILY_VARS: &str = "weather_code,temperature_2m_max,temperature_2m_min,\
                          precipitation_sum,precipitation_probability_max,wind_speed_10m_max";

/// Deadline for every outbound Open-Meteo call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// WMO Weather Interpretation Codes (WMO 4677).
static WMO_CODES: [(i64, &str); 28] = [
    (0, "Clear sky"),
    (1, "Mainly clear"),
    (2, "Partly cloudy"),
    (3, "Overcast"),
    (45, "Fog"),
    (48, "Depositing rime fog"),
    (51, "Light drizzle"),
    (53, "Moderate drizzle"),
    (55, "Dense drizzle"),
    (56, "Light freezing drizzle"),
    (57, "Dense freezing drizzle"),
    (61, "Slight rain"),
    (63, "Moderate rain"),
    (65, "Heavy rain"),
    (66, "Light freezing rain"),
    (67, "Heavy freezing rain"),
    (71, "Slight snow fall"),
    (73, "Moderate snow fall"),
    (75, "Heavy snow fall"),
    (77, "Snow grains"),
    (80, "Slight rain showers"),
    (81, "Moderate rain showers"),
    (82, "Violent rain showers"),
    (85, "Slight snow showers"),
    (86, "Heavy snow showers"),
    (95, "Thunderstorm"),
    (96, "Thunderstorm with slight hail"),
    (99, "Thunderstorm with heavy hail"),
];

/// Converts a WMO weather code to human-readable English text.
///
/// Codes outside the table render as `Unknown (<code>)` rather than failing.
pub fn describe_weather_code(code: i64) -> String {
    WMO_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, text)| (*text).to_string())
        .unwrap_or_else(|| format!("Unknown ({code})"))
}

/// A place resolved to coordinates, either via geocoding or supplied directly
/// by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub name: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Current weather conditions reshaped into the service's stable field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temperature_c: f64,
    pub feels_like_c: f64,
    pub humidity_pct: i64,
    pub wind_speed_kmh: f64,
    pub wind_direction_deg: i64,
    pub precipitation_mm: f64,
    pub condition: String,
    pub weather_code: i64,
    pub observation_time: String,
}

/// One day of the daily forecast, reshaped into the service's stable field
/// names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: String,
    pub condition: String,
    pub weather_code: i64,
    pub temp_max_c: f64,
    pub temp_min_c: f64,
    pub precipitation_mm: f64,
    pub precipitation_probability_pct: i64,
    pub wind_max_kmh: f64,
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Option<Vec<GeocodingHit>>,
}

#[derive(Debug, Deserialize)]
struct GeocodingHit {
    name: String,
    #[serde(default)]
    country: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct CurrentEnvelope {
    current: CurrentPayload,
}

#[derive(Debug, Deserialize)]
struct CurrentPayload {
    temperature_2m: f64,
    apparent_temperature: f64,
    relative_humidity_2m: i64,
    wind_speed_10m: f64,
    wind_direction_10m: i64,
    precipitation: f64,
    weather_code: i64,
    time: String,
}

#[derive(Debug, Deserialize)]
struct DailyEnvelope {
    daily: DailyPayload,
}

#[derive(Debug, Deserialize)]
struct DailyPayload {
    time: Vec<String>,
    weather_code: Vec<i64>,
    temperature_2m_max: Vec<f64>,
    temperature_2m_min: Vec<f64>,
    precipitation_sum: Vec<f64>,
    precipitation_probability_max: Vec<i64>,
    wind_speed_10m_max: Vec<f64>,
}

/// Client for the Open-Meteo geocoding and forecast APIs.
///
/// Cheap to clone: clones share the underlying connection pool.
#[derive(Clone, Debug)]
pub struct OpenMeteo {
    /// Shared Reqwest HTTP client
    client: Client,
    /// Full URL of the geocoding endpoint
    geocoding_url: Url,
    /// Full URL of the forecast endpoint
    forecast_url: Url,
    /// Deadline applied to each outbound call
    timeout: Duration,
}

impl OpenMeteo {
    /// Constructs a client against the public Open-Meteo endpoints.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            geocoding_url: Url::parse(GEOCODING_URL).expect("valid geocoding URL"),
            forecast_url: Url::parse(FORECAST_URL).expect("valid forecast URL"),
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Overrides the geocoding endpoint URL.
    pub fn with_geocoding_url(&self, url: Url) -> Self {
        let mut this = self.clone();
        this.geocoding_url = url;
        this
    }

    /// Overrides the forecast endpoint URL.
    pub fn with_forecast_url(&self, url: Url) -> Self {
        let mut this = self.clone();
        this.forecast_url = url;
        this
    }

    /// Overrides the per-request deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = timeout;
        this
    }

    /// Geocodes a city name to coordinates, requesting a single best match.
    ///
    /// # Errors
    ///
    /// [`ApiError::CityNotFound`] when the upstream results list is empty or
    /// absent, [`ApiError::UpstreamTimeout`] / [`ApiError::UpstreamUnreachable`]
    /// / [`ApiError::UpstreamUnavailable`] on transport failures, and
    /// [`ApiError::MalformedUpstreamResponse`] when the body does not parse.
    #[instrument(name = "open_meteo.geocode", skip(self))]
    pub async fn geocode(&self, city: &str) -> Result<Location, ApiError> {
        let response: GeocodingResponse = self
            .get_json(
                self.geocoding_url.clone(),
                &[
                    ("name", city.to_string()),
                    ("count", "1".to_string()),
                    ("language", "en".to_string()),
                    ("format", "json".to_string()),
                ],
            )
            .await?;
        let hit = response
            .results
            .and_then(|mut results| {
                if results.is_empty() {
                    None
                } else {
                    Some(results.remove(0))
                }
            })
            .ok_or_else(|| ApiError::CityNotFound(city.to_string()))?;
        Ok(Location {
            name: hit.name,
            country: hit.country,
            latitude: hit.latitude,
            longitude: hit.longitude,
        })
    }

    /// Fetches current weather conditions for the given coordinates.
    #[instrument(name = "open_meteo.get_current", skip(self))]
    pub async fn get_current(&self, lat: f64, lon: f64) -> Result<CurrentConditions, ApiError> {
        let envelope: CurrentEnvelope = self
            .get_json(
                self.forecast_url.clone(),
                &[
                    ("latitude", lat.to_string()),
                    ("longitude", lon.to_string()),
                    ("current", CURRENT_VARS.to_string()),
                ],
            )
            .await?;
        let current = envelope.current;
        Ok(CurrentConditions {
            temperature_c: current.temperature_2m,
            feels_like_c: current.apparent_temperature,
            humidity_pct: current.relative_humidity_2m,
            wind_speed_kmh: current.wind_speed_10m,
            wind_direction_deg: current.wind_direction_10m,
            precipitation_mm: current.precipitation,
            condition: describe_weather_code(current.weather_code),
            weather_code: current.weather_code,
            observation_time: current.time,
        })
    }

    /// Fetches `days` days of daily forecast aggregates for the given
    /// coordinates, one [`ForecastDay`] per entry of the upstream time array.
    ///
    /// The upstream per-field arrays are parallel; if any of them is shorter
    /// than the time array the whole call fails with
    /// [`ApiError::MalformedUpstreamResponse`].
    #[instrument(name = "open_meteo.get_forecast", skip(self))]
    pub async fn get_forecast(
        &self,
        lat: f64,
        lon: f64,
        days: u8,
    ) -> Result<Vec<ForecastDay>, ApiError> {
        let envelope: DailyEnvelope = self
            .get_json(
                self.forecast_url.clone(),
                &[
                    ("latitude", lat.to_string()),
                    ("longitude", lon.to_string()),
                    ("daily", DAILY_VARS.to_string()),
                    ("forecast_days", days.to_string()),
                ],
            )
            .await?;
        let daily = envelope.daily;
        let mut result = Vec::with_capacity(daily.time.len());
        for (i, date) in daily.time.iter().enumerate() {
            let code = *pick(&daily.weather_code, i, "weather_code")?;
            result.push(ForecastDay {
                date: date.clone(),
                condition: describe_weather_code(code),
                weather_code: code,
                temp_max_c: *pick(&daily.temperature_2m_max, i, "temperature_2m_max")?,
                temp_min_c: *pick(&daily.temperature_2m_min, i, "temperature_2m_min")?,
                precipitation_mm: *pick(&daily.precipitation_sum, i, "precipitation_sum")?,
                precipitation_probability_pct: *pick(
                    &daily.precipitation_probability_max,
                    i,
                    "precipitation_probability_max",
                )?,
                wind_max_kmh: *pick(&daily.wind_speed_10m_max, i, "wind_speed_10m_max")?,
            });
        }
        Ok(result)
    }

    /// Generic GET helper that applies the deadline, maps transport errors,
    /// and parses the 200 body as JSON.
    async fn get_json<R>(&self, url: Url, query: &[(&str, String)]) -> Result<R, ApiError>
    where
        R: serde::de::DeserializeOwned,
    {
        let http_response = self
            .client
            .get(url)
            .query(query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(ApiError::from)?;
        if http_response.status() != StatusCode::OK {
            return Err(ApiError::UpstreamUnavailable);
        }
        let bytes = http_response.bytes().await.map_err(ApiError::from)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::MalformedUpstreamResponse(e.to_string()))
    }
}

impl Default for OpenMeteo {
    fn default() -> Self {
        Self::new()
    }
}

/// Indexes into one of the parallel per-field arrays of the daily payload.
fn pick<'a, T>(values: &'a [T], index: usize, field: &str) -> Result<&'a T, ApiError> {
    values.get(index).ok_or_else(|| {
        ApiError::MalformedUpstreamResponse(format!("daily field `{field}` has no entry {index}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn geocoder(server: &MockServer) -> OpenMeteo {
        OpenMeteo::new().with_geocoding_url(Url::parse(&server.uri()).unwrap())
    }

    async fn forecaster(server: &MockServer) -> OpenMeteo {
        OpenMeteo::new().with_forecast_url(Url::parse(&server.uri()).unwrap())
    }

    fn current_body() -> serde_json::Value {
        json!({
            "current": {
                "temperature_2m": 12.5,
                "apparent_temperature": 10.2,
                "relative_humidity_2m": 65,
                "wind_speed_10m": 15.3,
                "wind_direction_10m": 270,
                "precipitation": 0.0,
                "weather_code": 2,
                "time": "2026-02-20T15:00",
            }
        })
    }

    #[test]
    fn known_codes_have_exact_descriptions() {
        for (code, text) in WMO_CODES {
            assert_eq!(describe_weather_code(code), text);
        }
        assert_eq!(describe_weather_code(0), "Clear sky");
        assert_eq!(describe_weather_code(2), "Partly cloudy");
        assert_eq!(describe_weather_code(61), "Slight rain");
        assert_eq!(describe_weather_code(99), "Thunderstorm with heavy hail");
    }

    #[test]
    fn unknown_codes_render_as_unknown() {
        assert_eq!(describe_weather_code(999), "Unknown (999)");
        assert_eq!(describe_weather_code(4), "Unknown (4)");
        assert_eq!(describe_weather_code(-1), "Unknown (-1)");
    }

    #[tokio::test]
    async fn geocode_returns_best_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("name", "Tokyo"))
            .and(query_param("count", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "name": "Tokyo", "country": "Japan", "latitude": 35.6895, "longitude": 139.6917 },
                ],
            })))
            .mount(&server)
            .await;

        let location = geocoder(&server).await.geocode("Tokyo").await.unwrap();
        assert_eq!(
            location,
            Location {
                name: "Tokyo".to_string(),
                country: "Japan".to_string(),
                latitude: 35.6895,
                longitude: 139.6917,
            }
        );
    }

    #[tokio::test]
    async fn geocode_defaults_missing_country_to_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "name": "Null Island", "latitude": 0.0, "longitude": 0.0 },
                ],
            })))
            .mount(&server)
            .await;

        let location = geocoder(&server).await.geocode("Null Island").await.unwrap();
        assert_eq!(location.country, "");
    }

    #[tokio::test]
    async fn geocode_maps_empty_results_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .mount(&server)
            .await;

        let error = geocoder(&server).await.geocode("Atlantis").await.unwrap_err();
        assert!(matches!(error, ApiError::CityNotFound(city) if city == "Atlantis"));
    }

    #[tokio::test]
    async fn geocode_maps_null_results_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": null })))
            .mount(&server)
            .await;

        let error = geocoder(&server).await.geocode("Atlantis").await.unwrap_err();
        assert!(matches!(error, ApiError::CityNotFound(_)));
    }

    #[tokio::test]
    async fn geocode_maps_missing_results_key_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let error = geocoder(&server).await.geocode("Atlantis").await.unwrap_err();
        assert!(matches!(error, ApiError::CityNotFound(_)));
    }

    #[tokio::test]
    async fn geocode_maps_non_200_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let error = geocoder(&server).await.geocode("Tokyo").await.unwrap_err();
        assert!(matches!(error, ApiError::UpstreamUnavailable));
    }

    #[tokio::test]
    async fn geocode_maps_deadline_overrun_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "results": [] }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = geocoder(&server)
            .await
            .with_timeout(Duration::from_millis(50));
        let error = client.geocode("Tokyo").await.unwrap_err();
        assert!(matches!(error, ApiError::UpstreamTimeout));
    }

    #[tokio::test]
    async fn geocode_maps_connection_failure_to_unreachable() {
        // Bind a listener on an ephemeral port and drop it, so nothing
        // listens on that port when the client connects.
        let uri = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            format!("http://{addr}/")
        };
        let client = OpenMeteo::new().with_geocoding_url(Url::parse(&uri).unwrap());
        let error = client.geocode("Tokyo").await.unwrap_err();
        assert!(matches!(error, ApiError::UpstreamUnreachable));
    }

    #[tokio::test]
    async fn get_current_reshapes_upstream_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("latitude", "35.6895"))
            .and(query_param("longitude", "139.6917"))
            .and(query_param("current", CURRENT_VARS))
            .respond_with(ResponseTemplate::new(200).set_body_json(current_body()))
            .mount(&server)
            .await;

        let current = forecaster(&server)
            .await
            .get_current(35.6895, 139.6917)
            .await
            .unwrap();
        assert_eq!(current.temperature_c, 12.5);
        assert_eq!(current.feels_like_c, 10.2);
        assert_eq!(current.humidity_pct, 65);
        assert_eq!(current.wind_speed_kmh, 15.3);
        assert_eq!(current.wind_direction_deg, 270);
        assert_eq!(current.precipitation_mm, 0.0);
        assert_eq!(current.condition, "Partly cloudy");
        assert_eq!(current.weather_code, 2);
        assert_eq!(current.observation_time, "2026-02-20T15:00");
    }

    #[tokio::test]
    async fn get_current_maps_non_200_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let error = forecaster(&server)
            .await
            .get_current(35.0, 139.0)
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::UpstreamUnavailable));
    }

    #[tokio::test]
    async fn get_current_maps_missing_structure_to_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "elevation": 40.0 })))
            .mount(&server)
            .await;

        let error = forecaster(&server)
            .await
            .get_current(35.0, 139.0)
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::MalformedUpstreamResponse(_)));
    }

    #[tokio::test]
    async fn get_current_maps_deadline_overrun_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(current_body())
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = forecaster(&server)
            .await
            .with_timeout(Duration::from_millis(50));
        let error = client.get_current(35.0, 139.0).await.unwrap_err();
        assert!(matches!(error, ApiError::UpstreamTimeout));
    }

    #[tokio::test]
    async fn get_current_renders_unknown_code() {
        let server = MockServer::start().await;
        let mut body = current_body();
        body["current"]["weather_code"] = json!(1234);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let current = forecaster(&server)
            .await
            .get_current(35.0, 139.0)
            .await
            .unwrap();
        assert_eq!(current.condition, "Unknown (1234)");
        assert_eq!(current.weather_code, 1234);
    }

    #[tokio::test]
    async fn get_forecast_builds_one_day_per_time_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("daily", DAILY_VARS))
            .and(query_param("forecast_days", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "daily": {
                    "time": ["2026-02-21", "2026-02-22", "2026-02-23"],
                    "weather_code": [61, 0, 2],
                    "temperature_2m_max": [15.2, 16.0, 14.1],
                    "temperature_2m_min": [8.1, 7.5, 6.9],
                    "precipitation_sum": [12.5, 0.0, 0.2],
                    "precipitation_probability_max": [85, 5, 20],
                    "wind_speed_10m_max": [22.0, 10.5, 12.3],
                },
            })))
            .mount(&server)
            .await;

        let days = forecaster(&server)
            .await
            .get_forecast(35.6895, 139.6917, 3)
            .await
            .unwrap();
        assert_eq!(days.len(), 3);
        assert_eq!(days[0].date, "2026-02-21");
        assert_eq!(days[0].condition, "Slight rain");
        assert_eq!(days[0].temp_max_c, 15.2);
        assert_eq!(days[0].precipitation_probability_pct, 85);
        assert_eq!(days[1].condition, "Clear sky");
        assert_eq!(days[2].condition, "Partly cloudy");
        assert_eq!(days[2].wind_max_kmh, 12.3);
    }

    #[tokio::test]
    async fn get_forecast_maps_missing_daily_to_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "hourly": {} })))
            .mount(&server)
            .await;

        let error = forecaster(&server)
            .await
            .get_forecast(35.0, 139.0, 3)
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::MalformedUpstreamResponse(_)));
    }

    #[tokio::test]
    async fn get_forecast_rejects_short_parallel_arrays() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "daily": {
                    "time": ["2026-02-21", "2026-02-22"],
                    "weather_code": [61],
                    "temperature_2m_max": [15.2, 16.0],
                    "temperature_2m_min": [8.1, 7.5],
                    "precipitation_sum": [12.5, 0.0],
                    "precipitation_probability_max": [85, 5],
                    "wind_speed_10m_max": [22.0, 10.5],
                },
            })))
            .mount(&server)
            .await;

        let error = forecaster(&server)
            .await
            .get_forecast(35.0, 139.0, 2)
            .await
            .unwrap_err();
        match error {
            ApiError::MalformedUpstreamResponse(detail) => {
                assert!(detail.contains("weather_code"), "unexpected detail: {detail}");
            }
            other => panic!("expected malformed response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_forecast_maps_non_200_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let error = forecaster(&server)
            .await
            .get_forecast(35.0, 139.0, 3)
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::UpstreamUnavailable));
    }
}

//! OpenWeather current-conditions source.
//!
//! Calls `GET {base_url}/data/2.5/weather?q={city}&units=metric&appid={key}`
//! and maps the response into a snapshot with these fields:
//! - `temp` (degrees Celsius)
//! - `humidity` (percent)
//! - `condition_ids` (list of OpenWeather condition codes)
//! - `conditions` (description of the first condition)
//! - `wind_speed` (m/s, when present)

use serde::Deserialize;

use ecoalert_core::Snapshot;

use crate::traits::{DataSource, FetchError, Params};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    main: MainBlock,
    #[serde(default)]
    weather: Vec<Condition>,
    #[serde(default)]
    wind: Option<Wind>,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: f64,
    #[serde(default)]
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    id: i64,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Wind {
    #[serde(default)]
    speed: Option<f64>,
}

/// Current weather by city name.
#[derive(Debug)]
pub struct OpenWeatherSource {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenWeatherSource {
    /// `base_url` defaults to the public OpenWeather endpoint.
    pub fn new(id: impl Into<String>, api_key: impl Into<String>, base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            id: id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

/// Map a current-weather JSON body into a snapshot for `subject`.
pub fn parse_current_weather(
    source_id: &str,
    subject: &str,
    body: &str,
) -> Result<Snapshot, FetchError> {
    let payload: CurrentWeather = serde_json::from_str(body)
        .map_err(|e| FetchError::malformed(format!("current weather payload: {e}")))?;

    let condition_ids: Vec<f64> = payload.weather.iter().map(|c| c.id as f64).collect();
    let mut snapshot = Snapshot::new(subject, source_id)
        .with_field("temp", payload.main.temp)
        .with_field("condition_ids", condition_ids);

    if let Some(humidity) = payload.main.humidity {
        snapshot = snapshot.with_field("humidity", humidity);
    }
    if let Some(description) = payload.weather.first().and_then(|c| c.description.clone()) {
        snapshot = snapshot.with_field("conditions", description);
    }
    if let Some(speed) = payload.wind.and_then(|w| w.speed) {
        snapshot = snapshot.with_field("wind_speed", speed);
    }
    Ok(snapshot)
}

#[async_trait::async_trait]
impl DataSource for OpenWeatherSource {
    async fn fetch(&self, key: &str, params: &Params) -> Result<Snapshot, FetchError> {
        let url = format!("{}/data/2.5/weather", self.base_url);
        let mut query: Vec<(&str, &str)> = vec![
            ("q", key),
            ("units", "metric"),
            ("appid", self.api_key.as_str()),
        ];
        for (k, v) in params {
            if !matches!(k.as_str(), "q" | "appid") {
                query.retain(|(existing, _)| *existing != k.as_str());
                query.push((k.as_str(), v.as_str()));
            }
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| FetchError::transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::transport(format!("reading body: {e}")))?;

        // Only a plain 200 carries a usable payload.
        if status != reqwest::StatusCode::OK {
            tracing::warn!(
                source = %self.id,
                city = key,
                %status,
                "OpenWeather returned non-200 status"
            );
            return Err(FetchError::bad_status(
                status.as_u16(),
                format!("{status}: {}", truncate(&body, 200)),
            ));
        }

        parse_current_weather(&self.id, key, &body)
    }

    fn source_id(&self) -> &str {
        &self.id
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecoalert_core::FieldValue;

    const LIMA: &str = r#"{
        "weather": [{"id": 800, "main": "Clear", "description": "clear sky"}],
        "main": {"temp": 20.0, "humidity": 65},
        "wind": {"speed": 3.6},
        "name": "Lima"
    }"#;

    #[test]
    fn parses_current_weather() {
        let snap = parse_current_weather("openweather", "Lima", LIMA).unwrap();
        assert_eq!(snap.subject, "Lima");
        assert_eq!(snap.source, "openweather");
        assert_eq!(snap.field("temp").and_then(FieldValue::as_f64), Some(20.0));
        assert_eq!(snap.field("humidity").and_then(FieldValue::as_f64), Some(65.0));
        assert_eq!(snap.field("condition_ids").unwrap().numbers(), vec![800.0]);
        assert_eq!(snap.field("conditions").and_then(FieldValue::as_str), Some("clear sky"));
        assert_eq!(snap.field("wind_speed").and_then(FieldValue::as_f64), Some(3.6));
    }

    #[test]
    fn missing_main_block_is_malformed() {
        let err = parse_current_weather("openweather", "Lima", r#"{"weather": []}"#).unwrap_err();
        assert_eq!(err.kind, crate::FetchErrorKind::MalformedPayload);
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let snap =
            parse_current_weather("openweather", "Oslo", r#"{"main": {"temp": -20.5}}"#).unwrap();
        assert_eq!(snap.field("temp").and_then(FieldValue::as_f64), Some(-20.5));
        assert!(snap.field("humidity").is_none());
        assert!(snap.field("condition_ids").unwrap().numbers().is_empty());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let source = OpenWeatherSource::new("ow", "key", Some("http://localhost:9999/".into()));
        assert_eq!(source.base_url, "http://localhost:9999");
        assert_eq!(source.source_id(), "ow");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}

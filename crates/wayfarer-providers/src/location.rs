//! HTTP geocode and route client.
//!
//! Lookups are best-effort: every failure is logged and reported as `None`.
//! Both flat answers (`{"lng", "lat"}`, `{"distance", "duration", "steps"}`)
//! and the nested `geocodes[].location` / `route.paths[]` shapes used by
//! common map services are understood.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use wayfarer_core::gateway::{Coordinates, LocationCapability, RouteStep, RouteSummary, TravelMode};

use crate::ProviderError;

pub struct HttpLocationClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpLocationClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Option<Value> {
        let mut request = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .query(query);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(path, error = %err, "location request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(path, status = %response.status(), "location service rejected request");
            return None;
        }
        match response.json::<Value>().await {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(path, error = %err, "location answer was not JSON");
                None
            }
        }
    }
}

#[async_trait]
impl LocationCapability for HttpLocationClient {
    async fn geocode(&self, name: &str, city: Option<&str>) -> Option<Coordinates> {
        let mut query = vec![("address", name.to_string())];
        if let Some(city) = city {
            query.push(("city", city.to_string()));
        }
        let answer = self.get_json("geocode", &query).await?;
        let found = parse_coordinates(&answer);
        debug!(place = %name, found = found.is_some(), "geocode answered");
        found
    }

    async fn route(
        &self,
        from: Coordinates,
        to: Coordinates,
        mode: TravelMode,
    ) -> Option<RouteSummary> {
        let query = [
            ("origin", format_point(from)),
            ("destination", format_point(to)),
        ];
        let answer = self.get_json(&format!("direction/{}", mode), &query).await?;
        parse_route(&answer)
    }
}

fn format_point(point: Coordinates) -> String {
    format!("{:.6},{:.6}", point.lng, point.lat)
}

fn parse_point(text: &str) -> Option<Coordinates> {
    let (lng, lat) = text.split_once(',')?;
    Some(Coordinates {
        lng: lng.trim().parse().ok()?,
        lat: lat.trim().parse().ok()?,
    })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn parse_coordinates(answer: &Value) -> Option<Coordinates> {
    if let (Some(lng), Some(lat)) = (
        answer.get("lng").and_then(as_number),
        answer.get("lat").and_then(as_number),
    ) {
        return Some(Coordinates { lng, lat });
    }
    if let Some(location) = answer.get("location").and_then(Value::as_str) {
        return parse_point(location);
    }
    answer
        .get("geocodes")
        .and_then(Value::as_array)
        .and_then(|codes| codes.first())
        .and_then(|code| code.get("location"))
        .and_then(Value::as_str)
        .and_then(parse_point)
}

fn parse_route(answer: &Value) -> Option<RouteSummary> {
    let path = answer
        .get("route")
        .and_then(|route| route.get("paths"))
        .and_then(Value::as_array)
        .and_then(|paths| paths.first())
        .unwrap_or(answer);
    let distance = path.get("distance").and_then(as_number)?;
    let duration = path.get("duration").and_then(as_number)?;
    let steps = path
        .get("steps")
        .and_then(Value::as_array)
        .map(|steps| {
            steps
                .iter()
                .filter_map(|step| {
                    Some(RouteStep {
                        instruction: step.get("instruction")?.as_str()?.to_string(),
                        distance: step.get("distance").and_then(as_number),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Some(RouteSummary {
        distance,
        duration,
        steps,
    })
}

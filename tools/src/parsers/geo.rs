//! Geolocation lookup parsing (ip-api.com JSON)

use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};
use crate::records::GeolocationRecord;
use crate::registry::Operation;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: String,
    message: Option<String>,
    query: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
    region_name: Option<String>,
    city: Option<String>,
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
    timezone: Option<String>,
    isp: Option<String>,
    org: Option<String>,
    #[serde(rename = "as")]
    asn: Option<String>,
}

pub fn parse(output: &str, host: &str) -> PipelineResult<GeolocationRecord> {
    let resp: ApiResponse = serde_json::from_str(output.trim()).map_err(|e| {
        PipelineError::parse(Operation::Geolocation, format!("invalid lookup response: {e}"))
    })?;

    if resp.status != "success" {
        return Err(PipelineError::parse(
            Operation::Geolocation,
            format!(
                "lookup failed: {}",
                resp.message.as_deref().unwrap_or("no reason given")
            ),
        ));
    }

    Ok(GeolocationRecord {
        query: resp.query.unwrap_or_else(|| host.to_string()),
        country: resp.country,
        country_code: resp.country_code,
        region: resp.region_name,
        city: resp.city,
        latitude: resp.lat,
        longitude: resp.lon,
        timezone: resp.timezone,
        isp: resp.isp,
        org: resp.org,
        asn: resp.asn.filter(|s| !s.is_empty()),
    })
}

//! Region geocoding against an external lookup service

use crate::config::{GeocoderSettings, ALL_RESIDENTIAL};
use crate::data::{self, REGION_COLUMN};
use crate::region;
use polars::prelude::*;
use rand::Rng;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// A region display label with its coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub city: String,
    pub coordinates: Coordinates,
}

/// Turns a free-text place name into coordinates
pub trait Geocoder {
    /// Returns `Ok(None)` when the service has no match for `query`
    fn geocode(&self, query: &str) -> crate::Result<Option<Coordinates>>;
}

/// Geocoder backed by the OpenStreetMap Nominatim search API
pub struct NominatimGeocoder {
    client: reqwest::blocking::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(settings: &GeocoderSettings) -> crate::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
        })
    }
}

impl Geocoder for NominatimGeocoder {
    fn geocode(&self, query: &str) -> crate::Result<Option<Coordinates>> {
        let places: Vec<NominatimPlace> = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()?
            .error_for_status()?
            .json()?;

        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };
        let latitude: f64 = place
            .lat
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid latitude '{}' for {}", place.lat, query))?;
        let longitude: f64 = place
            .lon
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid longitude '{}' for {}", place.lon, query))?;

        Ok(Some(Coordinates {
            latitude,
            longitude,
        }))
    }
}

/// Outcome of a geocoding pass
#[derive(Debug, Default)]
pub struct LocationReport {
    pub locations: Vec<Location>,
    /// Labels that had no match or whose lookup failed
    pub failures: Vec<String>,
}

/// Distinct display labels of the all-residential regions, in table order
pub fn region_labels(df: &DataFrame) -> crate::Result<Vec<String>> {
    let residential = data::filter_property_type(df, ALL_RESIDENTIAL)?;
    let mut labels: Vec<String> = Vec::new();
    for value in data::string_column(&residential, REGION_COLUMN)?
        .into_iter()
        .flatten()
    {
        let label = region::display_label(&value);
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    Ok(labels)
}

/// Geocode every label, pausing for `pause` after roughly half the lookups
///
/// A failed or empty lookup is logged and recorded; the remaining labels are
/// still resolved.
pub fn resolve_locations<G: Geocoder, R: Rng>(
    geocoder: &G,
    labels: &[String],
    pause: Duration,
    rng: &mut R,
) -> LocationReport {
    let mut report = LocationReport::default();

    for (i, label) in labels.iter().enumerate() {
        match geocoder.geocode(label) {
            Ok(Some(coordinates)) => {
                tracing::debug!(
                    city = %label,
                    latitude = coordinates.latitude,
                    longitude = coordinates.longitude,
                    "Resolved location"
                );
                report.locations.push(Location {
                    city: label.clone(),
                    coordinates,
                });
            }
            Ok(None) => {
                tracing::warn!(city = %label, "No geocoding match");
                report.failures.push(label.clone());
            }
            Err(e) => {
                tracing::warn!(city = %label, error = %e, "Geocoding failed");
                report.failures.push(label.clone());
            }
        }

        let last = i + 1 == labels.len();
        if !last && !pause.is_zero() && rng.gen_bool(0.5) {
            std::thread::sleep(pause);
        }
    }

    tracing::info!(
        resolved = report.locations.len(),
        failed = report.failures.len(),
        "Resolved region locations"
    );
    report
}

/// Write locations as `city,latitude,longitude`
pub fn write_locations(locations: &[Location], path: &Path) -> crate::Result<()> {
    let mut df = df!(
        "city" => locations.iter().map(|l| l.city.as_str()).collect::<Vec<_>>(),
        "latitude" => locations.iter().map(|l| l.coordinates.latitude).collect::<Vec<_>>(),
        "longitude" => locations.iter().map(|l| l.coordinates.longitude).collect::<Vec<_>>()
    )?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid locations path {}", path.display()))?;
    data::save_table(&mut df, dir, name)?;
    Ok(())
}

/// Read a locations file into a lookup keyed by display label
pub fn read_locations(path: &Path) -> crate::Result<HashMap<String, Coordinates>> {
    let df = data::load_market_table(path)?;
    let cities = data::string_column(&df, "city")?;
    let latitudes = data::float_column(&df, "latitude")?;
    let longitudes = data::float_column(&df, "longitude")?;

    Ok(cities
        .into_iter()
        .zip(latitudes)
        .zip(longitudes)
        .filter_map(|((city, lat), lon)| {
            Some((
                city?,
                Coordinates {
                    latitude: lat?,
                    longitude: lon?,
                },
            ))
        })
        .collect())
}

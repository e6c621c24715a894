//! Field enrichment
//!
//! [`FieldEnricher`] mutates a merged field in place. [`CentroidEnricher`]
//! derives a centre point, trying in order:
//!
//! 1. an existing `centroid` / `center` / `centerPoint` object
//! 2. top-level latitude/longitude keys
//! 3. the owning farm's latitude/longitude
//! 4. the boundary geometry (GeoJSON Polygon or MultiPolygon, exterior
//!    rings only, area-weighted)
//!
//! and writes `location: {center, centerSource}`, filling `center` and
//! `centroid` when they are absent. Enriching twice changes nothing.

use serde_json::{json, Map, Value};

use crate::aggregate::merge::FieldEntity;

/// Mutates a field in place. Must be idempotent.
pub trait FieldEnricher: Send + Sync {
    fn enrich(&self, field: &mut FieldEntity);
}

const DIRECT_KEYS: [&str; 3] = ["centroid", "center", "centerPoint"];
const LAT_KEYS: [&str; 3] = ["latitude", "lat", "centroidLatitude"];
const LON_KEYS: [&str; 4] = ["longitude", "lon", "lng", "centroidLongitude"];
const OWNER_KEYS: [&str; 2] = ["farmV2", "farm"];
const GEOMETRY_KEYS: [&str; 3] = ["geojson", "geoJson", "geometry"];

/// Weight used for degenerate rings
const MIN_RING_WEIGHT: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CenterSource {
    Direct,
    Farm,
    Boundary,
}

impl CenterSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Farm => "farm",
            Self::Boundary => "boundary",
        }
    }
}

/// A resolved centre point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Center {
    pub latitude: f64,
    pub longitude: f64,
    pub source: CenterSource,
}

impl Center {
    fn new(lat: f64, lon: f64, source: CenterSource) -> Self {
        let (latitude, longitude) = normalize_lat_lon(lat, lon);
        Self {
            latitude,
            longitude,
            source,
        }
    }

    fn point(&self) -> Value {
        json!({"latitude": self.latitude, "longitude": self.longitude})
    }
}

/// Centre-point enricher
#[derive(Debug, Default, Clone, Copy)]
pub struct CentroidEnricher;

impl FieldEnricher for CentroidEnricher {
    fn enrich(&self, field: &mut FieldEntity) {
        let attrs = &mut field.attributes;
        let already = attrs
            .get("location")
            .and_then(|l| l.get("center"))
            .is_some_and(|c| c.is_object());
        if already {
            return;
        }

        let Some(center) = extract_center(attrs) else {
            return;
        };

        attrs.insert(
            "location".to_string(),
            json!({"center": center.point(), "centerSource": center.source.as_str()}),
        );
        for key in ["center", "centroid"] {
            if !has_point(attrs.get(key)) {
                attrs.insert(key.to_string(), center.point());
            }
        }
    }
}

/// Swap when the values only make sense the other way round
fn normalize_lat_lon(lat: f64, lon: f64) -> (f64, f64) {
    if lat.abs() > 90.0 && lon.abs() <= 90.0 {
        (lon, lat)
    } else {
        (lat, lon)
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn first_number(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| number(obj.get(*k)))
}

fn lat_lon(obj: &Map<String, Value>) -> Option<(f64, f64)> {
    let lat = first_number(obj, &["latitude", "lat"])?;
    let lon = first_number(obj, &["longitude", "lon"])?;
    Some((lat, lon))
}

fn has_point(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_object)
        .and_then(lat_lon)
        .is_some()
}

/// Resolve a centre point from a field's attributes
pub fn extract_center(attrs: &Map<String, Value>) -> Option<Center> {
    for key in DIRECT_KEYS {
        if let Some((lat, lon)) = attrs.get(key).and_then(Value::as_object).and_then(lat_lon) {
            return Some(Center::new(lat, lon, CenterSource::Direct));
        }
    }

    if let (Some(lat), Some(lon)) = (first_number(attrs, &LAT_KEYS), first_number(attrs, &LON_KEYS)) {
        return Some(Center::new(lat, lon, CenterSource::Direct));
    }

    for key in OWNER_KEYS {
        if let Some((lat, lon)) = attrs.get(key).and_then(Value::as_object).and_then(lat_lon) {
            return Some(Center::new(lat, lon, CenterSource::Farm));
        }
    }

    let geometry = extract_geometry(attrs.get("boundary")?)?;
    let (lat, lon) = centroid_of_geometry(&geometry)?;
    Some(Center::new(lat, lon, CenterSource::Boundary))
}

fn is_polygonal(value: &Value) -> bool {
    matches!(
        value.get("type").and_then(Value::as_str),
        Some("Polygon") | Some("MultiPolygon")
    ) && value
        .get("coordinates")
        .and_then(Value::as_array)
        .is_some_and(|c| !c.is_empty())
}

/// Find a Polygon/MultiPolygon geometry inside a boundary value
pub fn extract_geometry(boundary: &Value) -> Option<Value> {
    match boundary {
        Value::Object(obj) => GEOMETRY_KEYS
            .iter()
            .filter_map(|k| obj.get(*k))
            .chain(std::iter::once(boundary))
            .find(|candidate| is_polygonal(candidate))
            .cloned(),
        Value::String(text) => {
            let text = text.trim();
            if text.starts_with('{') && text.ends_with('}') {
                let parsed: Value = serde_json::from_str(text).ok()?;
                if parsed.is_object() {
                    return extract_geometry(&parsed);
                }
            }
            None
        }
        _ => None,
    }
}

/// `(lon, lat)` for a GeoJSON position
fn point(value: &Value) -> Option<(f64, f64)> {
    let coords = value.as_array()?;
    if coords.len() < 2 {
        return None;
    }
    let lon = number(coords.first())?;
    let lat = number(coords.get(1))?;
    let (lat, lon) = normalize_lat_lon(lat, lon);
    Some((lon, lat))
}

/// Signed area and centroid of a ring (shoelace); vertex mean when degenerate
fn ring_area_and_centroid(points: &[(f64, f64)]) -> (f64, f64, f64) {
    let mut ring = points.to_vec();
    if ring.first() != ring.last() {
        if let Some(&first) = ring.first() {
            ring.push(first);
        }
    }

    let mut area = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for pair in ring.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        let cross = x0 * y1 - x1 * y0;
        area += cross;
        cx += (x0 + x1) * cross;
        cy += (y0 + y1) * cross;
    }
    area *= 0.5;

    if area.abs() < 1e-12 {
        let open = &ring[..ring.len().saturating_sub(1).max(1)];
        let n = open.len() as f64;
        let mx = open.iter().map(|p| p.0).sum::<f64>() / n;
        let my = open.iter().map(|p| p.1).sum::<f64>() / n;
        return (0.0, mx, my);
    }

    (area, cx / (6.0 * area), cy / (6.0 * area))
}

/// `(lat, lon)` centroid of a polygonal geometry
pub fn centroid_of_geometry(geometry: &Value) -> Option<(f64, f64)> {
    let coordinates = geometry.get("coordinates")?.as_array()?;
    let rings: Vec<&Value> = match geometry.get("type").and_then(Value::as_str)? {
        "Polygon" => coordinates.first().into_iter().collect(),
        "MultiPolygon" => coordinates
            .iter()
            .filter_map(|polygon| polygon.as_array().and_then(|p| p.first()))
            .collect(),
        _ => return None,
    };

    let mut total = 0.0;
    let mut wx = 0.0;
    let mut wy = 0.0;
    let mut fallback = None;

    for ring in rings {
        let points: Vec<(f64, f64)> = ring
            .as_array()
            .map(|pts| pts.iter().filter_map(point).collect())
            .unwrap_or_default();
        if fallback.is_none() {
            fallback = points.first().copied();
        }
        if points.len() < 3 {
            continue;
        }
        let (area, cx, cy) = ring_area_and_centroid(&points);
        let weight = if area == 0.0 { MIN_RING_WEIGHT } else { area.abs() };
        total += weight;
        wx += cx * weight;
        wy += cy * weight;
    }

    let (lon, lat) = if total == 0.0 {
        fallback?
    } else {
        (wx / total, wy / total)
    };
    Some(normalize_lat_lon(lat, lon))
}

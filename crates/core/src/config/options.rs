use serde::{Deserialize, Serialize};

use crate::plugins::PluginKind;
use crate::providers::Coordinate;
use crate::{OverlayError, Result};

const DEFAULT_MAP_ZOOM: u8 = 2;
const MAX_MAP_ZOOM: u8 = 20;
const DEFAULT_MARKER_SIZE: u32 = 14;
const DEFAULT_PARAGRAPHS: u32 = 6;
const FALLBACK_CENTER: Coordinate = Coordinate {
    lat: 51.0,
    lng: -1.5,
};

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(OverlayError::invalid(field, "must not be empty"));
    }
    Ok(())
}

fn check_coordinate(field: &str, lat: f64, lng: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(OverlayError::invalid(
            field,
            format!("({lat}, {lng}) is not a valid coordinate"),
        ));
    }
    Ok(())
}

/// Options for one overlay instance as handed over by the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverlayOptions {
    pub start_ms: u64,
    pub end_ms: u64,
    /// Id of the page element the overlay's container is placed in.
    pub target: String,
    /// Reuse key for sharing one container between instances. Generated
    /// from the plugin's id prefix when absent.
    #[serde(default)]
    pub container_id: Option<String>,
    pub plugin: PluginOptions,
}

impl OverlayOptions {
    pub fn kind(&self) -> PluginKind {
        self.plugin.kind()
    }

    pub fn validate(&self) -> Result<()> {
        require("target", &self.target)?;
        if self.end_ms < self.start_ms {
            return Err(OverlayError::invalid(
                "end_ms",
                format!("{} is before start_ms {}", self.end_ms, self.start_ms),
            ));
        }
        if let Some(id) = &self.container_id {
            require("container_id", id)?;
            if id.chars().any(char::is_whitespace) {
                return Err(OverlayError::invalid("container_id", "must not contain whitespace"));
            }
        }
        self.plugin.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginOptions {
    Map(MapOptions),
    Markdown(MarkdownOptions),
    Figure(FigureOptions),
    Timeline(TimelineOptions),
    Excerpt(ExcerptOptions),
    WordStream(WordStreamOptions),
}

impl PluginOptions {
    pub fn kind(&self) -> PluginKind {
        match self {
            Self::Map(_) => PluginKind::Map,
            Self::Markdown(_) => PluginKind::Markdown,
            Self::Figure(_) => PluginKind::Figure,
            Self::Timeline(_) => PluginKind::Timeline,
            Self::Excerpt(_) => PluginKind::Excerpt,
            Self::WordStream(_) => PluginKind::WordStream,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Map(options) => options.validate(),
            Self::Markdown(options) => options.validate(),
            Self::Figure(options) => options.validate(),
            Self::Timeline(_) => Ok(()),
            Self::Excerpt(options) => options.validate(),
            Self::WordStream(options) => options.validate(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum MapType {
    #[default]
    Roadmap,
    Satellite,
    Terrain,
    Comic,
    StamenToner,
    StamenTerrain,
    StamenWatercolor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapOptions {
    /// Script providing the mapping library.
    pub library_url: String,
    /// Global the library publishes once it has initialised.
    #[serde(default)]
    pub library_global: Option<String>,
    #[serde(default)]
    pub map_type: MapType,
    #[serde(default = "default_zoom")]
    pub zoom: u8,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    /// Place name geocoded to the map center; takes precedence over lat/lng.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub markers: Vec<MarkerOptions>,
    #[serde(default)]
    pub fly: Option<FlyOptions>,
    /// Credential for the geocoding service.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_zoom() -> u8 {
    DEFAULT_MAP_ZOOM
}

impl MapOptions {
    pub fn new(library_url: impl Into<String>) -> Self {
        Self {
            library_url: library_url.into(),
            library_global: None,
            map_type: MapType::default(),
            zoom: DEFAULT_MAP_ZOOM,
            lat: None,
            lng: None,
            location: None,
            markers: Vec::new(),
            fly: None,
            api_key: None,
        }
    }

    /// Center used when no location is named.
    pub fn fallback_center(&self) -> Coordinate {
        Coordinate {
            lat: self.lat.unwrap_or(FALLBACK_CENTER.lat),
            lng: self.lng.unwrap_or(FALLBACK_CENTER.lng),
        }
    }

    pub fn needs_geocoding(&self) -> bool {
        self.location.is_some()
            || self.markers.iter().any(|marker| marker.location.is_some())
            || matches!(
                self.fly,
                Some(FlyOptions {
                    endpoint: FlyEndpoint::Place(_),
                    ..
                })
            )
    }

    pub fn validate(&self) -> Result<()> {
        require("library_url", &self.library_url)?;
        if self.zoom > MAX_MAP_ZOOM {
            return Err(OverlayError::invalid(
                "zoom",
                format!("{} exceeds the maximum of {MAX_MAP_ZOOM}", self.zoom),
            ));
        }
        let center = self.fallback_center();
        check_coordinate("lat/lng", center.lat, center.lng)?;
        if let Some(location) = &self.location {
            require("location", location)?;
        }
        for (index, marker) in self.markers.iter().enumerate() {
            marker.validate(index)?;
        }
        if let Some(fly) = &self.fly {
            fly.validate()?;
        }
        if self.needs_geocoding() && self.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(OverlayError::invalid(
                "api_key",
                "required when a place name has to be geocoded",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkerOptions {
    #[serde(default)]
    pub icon: Option<String>,
    /// Radius in pixels of the scaled marker image.
    #[serde(default = "default_marker_size")]
    pub size: u32,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
}

fn default_marker_size() -> u32 {
    DEFAULT_MARKER_SIZE
}

impl MarkerOptions {
    /// Fixed position, if the marker is not geocoded.
    pub fn position(&self) -> Option<Coordinate> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinate { lat, lng }),
            _ => None,
        }
    }

    fn validate(&self, index: usize) -> Result<()> {
        let field = format!("markers[{index}]");
        match (&self.location, self.position()) {
            (Some(location), _) => require(&field, location),
            (None, Some(position)) => check_coordinate(&field, position.lat, position.lng),
            (None, None) => Err(OverlayError::invalid(
                field,
                "needs either a location or both lat and lng",
            )),
        }
    }
}

/// Where the map pans to after `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlyEndpoint {
    Place(String),
    /// `[lat, lng]`
    Coordinates([f64; 2]),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlyOptions {
    pub endpoint: FlyEndpoint,
    /// Seconds to wait after `start` before panning.
    #[serde(default)]
    pub wait_s: f64,
    #[serde(default = "default_flight_length")]
    pub flight_length_s: f64,
}

fn default_flight_length() -> f64 {
    1.0
}

impl FlyOptions {
    fn validate(&self) -> Result<()> {
        if self.wait_s < 0.0 || self.flight_length_s < 0.0 {
            return Err(OverlayError::invalid("fly", "durations must not be negative"));
        }
        match &self.endpoint {
            FlyEndpoint::Place(place) => require("fly.endpoint", place),
            FlyEndpoint::Coordinates([lat, lng]) => check_coordinate("fly.endpoint", *lat, *lng),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkdownOptions {
    #[serde(default)]
    pub text: String,
    /// Script providing the markdown parser.
    pub parser_url: String,
    /// Parser extensions, loaded once the parser itself has loaded.
    #[serde(default)]
    pub extension_urls: Vec<String>,
}

impl MarkdownOptions {
    pub fn validate(&self) -> Result<()> {
        require("parser_url", &self.parser_url)?;
        for url in &self.extension_urls {
            require("extension_urls", url)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FigureOptions {
    /// Image url.
    pub src: String,
    #[serde(default)]
    pub href: Option<String>,
    /// Caption.
    #[serde(default)]
    pub text: Option<String>,
}

impl FigureOptions {
    pub fn validate(&self) -> Result<()> {
        require("src", &self.src)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Newest entry on top.
    #[default]
    #[serde(alias = "UP", alias = "Up")]
    Up,
    #[serde(alias = "DOWN", alias = "Down")]
    Down,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimelineOptions {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub inner_html: Option<String>,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExcerptOptions {
    /// Article url; its last path segment names the page.
    pub src: String,
    /// Endpoint template with `{lang}` and `{page}` placeholders.
    pub api_template: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_paragraphs")]
    pub paragraphs: u32,
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_paragraphs() -> u32 {
    DEFAULT_PARAGRAPHS
}

impl ExcerptOptions {
    pub fn page_name(&self) -> &str {
        let src = self.src.trim_end_matches('/');
        src.rsplit('/').next().unwrap_or(src)
    }

    pub fn article_url(&self) -> String {
        self.api_template
            .replace("{lang}", &self.lang)
            .replace("{page}", self.page_name())
    }

    pub fn validate(&self) -> Result<()> {
        require("src", &self.src)?;
        require("src", self.page_name())?;
        require("lang", &self.lang)?;
        if !self.api_template.contains("{page}") {
            return Err(OverlayError::invalid(
                "api_template",
                "must contain the `{page}` placeholder",
            ));
        }
        if self.paragraphs == 0 {
            return Err(OverlayError::invalid("paragraphs", "must be at least one"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WordStreamOptions {
    pub text: String,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_color() -> String {
    "black".to_string()
}

impl WordStreamOptions {
    pub fn validate(&self) -> Result<()> {
        require("text", &self.text)?;
        require("color", &self.color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<OverlayOptions> {
        let options: OverlayOptions = serde_json::from_value(value)?;
        options.validate()?;
        Ok(options)
    }

    #[test]
    fn map_defaults_are_filled_in() {
        let options = parse(json!({
            "start_ms": 0,
            "end_ms": 4000,
            "target": "map",
            "plugin": {"kind": "map", "library_url": "https://cdn.example/map.js"}
        }))
        .unwrap();

        let PluginOptions::Map(map) = &options.plugin else {
            panic!("expected map options");
        };
        assert_eq!(map.zoom, 2);
        assert_eq!(map.map_type, MapType::Roadmap);
        assert_eq!(map.fallback_center(), Coordinate { lat: 51.0, lng: -1.5 });
        assert_eq!(options.kind(), PluginKind::Map);
    }

    #[test]
    fn map_types_use_screaming_kebab_names() {
        let map: MapOptions = serde_json::from_value(json!({
            "library_url": "map.js",
            "map_type": "STAMEN-WATERCOLOR"
        }))
        .unwrap();
        assert_eq!(map.map_type, MapType::StamenWatercolor);
    }

    #[test]
    fn geocoding_requires_an_api_key() {
        let mut map = MapOptions::new("map.js");
        map.location = Some("Toronto, Ontario, Canada".into());
        assert!(matches!(
            map.validate(),
            Err(OverlayError::InvalidOption { ref field, .. }) if field == "api_key"
        ));

        map.api_key = Some("key".into());
        assert!(map.validate().is_ok());
    }

    #[test]
    fn markers_need_a_position() {
        let mut map = MapOptions::new("map.js");
        map.markers.push(MarkerOptions {
            icon: None,
            size: 14,
            text: Some("here".into()),
            lat: Some(43.6),
            lng: None,
            location: None,
        });
        let err = map.validate().unwrap_err();
        assert!(format!("{err}").contains("markers[0]"));
    }

    #[test]
    fn rejects_end_before_start_and_unknown_fields() {
        let err = parse(json!({
            "start_ms": 5000,
            "end_ms": 1000,
            "target": "feed",
            "plugin": {"kind": "timeline"}
        }))
        .unwrap_err();
        assert!(matches!(err, OverlayError::InvalidOption { ref field, .. } if field == "end_ms"));

        let err = parse(json!({
            "start_ms": 0,
            "end_ms": 1000,
            "target": "feed",
            "plugin": {"kind": "timeline", "colour": "red"}
        }))
        .unwrap_err();
        assert!(matches!(err, OverlayError::Json(_)));
    }

    #[test]
    fn timeline_direction_accepts_either_case() {
        let timeline: TimelineOptions =
            serde_json::from_value(json!({"direction": "DOWN"})).unwrap();
        assert_eq!(timeline.direction, Direction::Down);
        let timeline: TimelineOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(timeline.direction, Direction::Up);
    }

    #[test]
    fn excerpt_builds_article_url_from_src() {
        let excerpt: ExcerptOptions = serde_json::from_value(json!({
            "src": "http://en.wikipedia.org/wiki/Cape_Town",
            "api_template": "https://{lang}.example.org/api?page={page}",
            "lang": "fr"
        }))
        .unwrap();
        excerpt.validate().unwrap();
        assert_eq!(excerpt.page_name(), "Cape_Town");
        assert_eq!(excerpt.article_url(), "https://fr.example.org/api?page=Cape_Town");
        assert_eq!(excerpt.paragraphs, 6);
    }

    #[test]
    fn fly_endpoint_accepts_place_or_coordinates() {
        let fly: FlyOptions = serde_json::from_value(json!({"endpoint": "Paris"})).unwrap();
        assert_eq!(fly.endpoint, FlyEndpoint::Place("Paris".into()));
        let fly: FlyOptions =
            serde_json::from_value(json!({"endpoint": [48.85, 2.35], "wait_s": 2.0})).unwrap();
        assert_eq!(fly.endpoint, FlyEndpoint::Coordinates([48.85, 2.35]));
        assert_eq!(fly.flight_length_s, 1.0);
    }
}

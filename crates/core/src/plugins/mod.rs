use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::config::{
    ExcerptOptions, FlyEndpoint, MapOptions, MarkdownOptions, PluginOptions,
};
use crate::gate::{AsyncTask, ValueTask};
use crate::host::HostPage;
use crate::providers::{fetch_task, geocode_task, global_check, Coordinate, ResourceProvider};
use crate::script::ScriptLoadDeduplicator;

/// Label of the task resolving the map center.
pub const CENTER: &str = "center";
/// Label of the task resolving the map fly-to endpoint.
pub const FLY_ENDPOINT: &str = "fly";
/// Label of the task fetching an excerpt's article.
pub const ARTICLE: &str = "article";
/// Label under which the instance's own options appear in resolved data.
pub const OPTIONS: &str = "options";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Map,
    Markdown,
    Figure,
    Timeline,
    Excerpt,
    WordStream,
}

impl PluginKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::Markdown => "markdown",
            Self::Figure => "figure",
            Self::Timeline => "timeline",
            Self::Excerpt => "excerpt",
            Self::WordStream => "word_stream",
        }
    }

    /// Prefix of generated container ids; the registry appends a counter.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Map => "leafletdiv",
            Self::Markdown => "markdowndiv",
            Self::Figure => "popcorn-figure",
            Self::Timeline => "timelineDiv",
            Self::Excerpt => "wikidiv",
            Self::WordStream => "wordriver",
        }
    }

    pub fn css_class(self) -> &'static str {
        match self {
            Self::Map => "leaflet-plugin",
            Self::Markdown => "markdown-plugin",
            Self::Figure => "figure-plugin",
            Self::Timeline => "timeline-plugin",
            Self::Excerpt => "wikipedia-plugin",
            Self::WordStream => "wordriver-plugin",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared collaborators the prerequisites are started through.
pub struct PluginServices<'a> {
    pub provider: &'a dyn ResourceProvider,
    pub scripts: &'a ScriptLoadDeduplicator,
    pub host: &'a Rc<dyn HostPage>,
}

/// Starts every prerequisite of a plugin instance and returns the tasks to
/// gate on. Figures, timeline entries and word streams have none.
pub fn prerequisites(options: &PluginOptions, services: &PluginServices<'_>) -> Vec<Box<dyn AsyncTask>> {
    match options {
        PluginOptions::Map(map) => map_prerequisites(map, services),
        PluginOptions::Markdown(markdown) => markdown_prerequisites(markdown, services),
        PluginOptions::Excerpt(excerpt) => excerpt_prerequisites(excerpt, services),
        PluginOptions::Figure(_) | PluginOptions::Timeline(_) | PluginOptions::WordStream(_) => {
            Vec::new()
        }
    }
}

fn map_prerequisites(map: &MapOptions, services: &PluginServices<'_>) -> Vec<Box<dyn AsyncTask>> {
    let mut tasks: Vec<Box<dyn AsyncTask>> =
        vec![Box::new(services.scripts.ensure_loaded(&map.library_url))];

    if let Some(global) = &map.library_global {
        tasks.push(global_check(services.host.clone(), global));
    }

    tasks.push(match &map.location {
        Some(location) => geocode_task(services.provider, CENTER, location),
        None => Box::new(ValueTask::new(CENTER, map.fallback_center())),
    });

    if let Some(fly) = &map.fly {
        tasks.push(match &fly.endpoint {
            FlyEndpoint::Place(place) => geocode_task(services.provider, FLY_ENDPOINT, place),
            FlyEndpoint::Coordinates([lat, lng]) => Box::new(ValueTask::new(
                FLY_ENDPOINT,
                Coordinate {
                    lat: *lat,
                    lng: *lng,
                },
            )),
        });
    }

    for (index, marker) in map.markers.iter().enumerate() {
        let label = format!("marker:{index}");
        match (&marker.location, marker.position()) {
            (Some(location), _) => tasks.push(geocode_task(services.provider, label, location)),
            (None, Some(position)) => tasks.push(Box::new(ValueTask::new(label, position))),
            (None, None) => {
                tracing::warn!(marker = index, "marker has neither location nor lat/lng; skipping");
            }
        }
    }

    tasks
}

fn markdown_prerequisites(
    markdown: &MarkdownOptions,
    services: &PluginServices<'_>,
) -> Vec<Box<dyn AsyncTask>> {
    let parser = services.scripts.ensure_loaded(&markdown.parser_url);
    let mut tasks: Vec<Box<dyn AsyncTask>> = markdown
        .extension_urls
        .iter()
        .map(|url| {
            Box::new(services.scripts.ensure_loaded_after(parser.clone(), url)) as Box<dyn AsyncTask>
        })
        .collect();
    tasks.insert(0, Box::new(parser));
    tasks
}

fn excerpt_prerequisites(
    excerpt: &ExcerptOptions,
    services: &PluginServices<'_>,
) -> Vec<Box<dyn AsyncTask>> {
    vec![fetch_task(services.provider, ARTICLE, &excerpt.article_url())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FigureOptions, FlyOptions, MarkerOptions};
    use crate::gate::{GateStatus, ResourceGate};
    use crate::host::MemoryPage;
    use crate::providers::{SimulatedProvider, SimulatedResponse};
    use crate::timers::TimerQueue;
    use serde_json::json;

    struct Fixture {
        timers: TimerQueue,
        provider: Rc<SimulatedProvider>,
        scripts: ScriptLoadDeduplicator,
        host: Rc<dyn HostPage>,
    }

    impl Fixture {
        fn new(provider: SimulatedProvider, timers: TimerQueue) -> Self {
            let provider = Rc::new(provider);
            Self {
                scripts: ScriptLoadDeduplicator::new(provider.clone()),
                host: Rc::new(MemoryPage::new()),
                provider,
                timers,
            }
        }

        fn gate(&self, options: &PluginOptions) -> ResourceGate {
            let services = PluginServices {
                provider: self.provider.as_ref(),
                scripts: &self.scripts,
                host: &self.host,
            };
            ResourceGate::open(prerequisites(options, &services))
        }
    }

    #[test]
    fn static_plugins_are_ready_at_setup() {
        let timers = TimerQueue::new();
        let fixture = Fixture::new(SimulatedProvider::new(timers.clone()), timers);
        let figure = PluginOptions::Figure(FigureOptions {
            src: "figure.png".into(),
            href: None,
            text: Some("caption".into()),
        });

        assert_eq!(fixture.gate(&figure).poll(), GateStatus::Ready);
        assert!(fixture.provider.requests().is_empty());
    }

    #[test]
    fn map_resolves_center_fly_and_markers() {
        let timers = TimerQueue::new();
        let provider = SimulatedProvider::new(timers.clone())
            .with_script("map.js", SimulatedResponse::ok(150, json!(null)))
            .with_place("Toronto", SimulatedResponse::ok(30, json!({"lat": 43.65, "lng": -79.38})));
        let fixture = Fixture::new(provider, timers);

        let mut map = MapOptions::new("map.js");
        map.api_key = Some("key".into());
        map.fly = Some(FlyOptions {
            endpoint: FlyEndpoint::Place("Toronto".into()),
            wait_s: 1.0,
            flight_length_s: 2.0,
        });
        map.markers.push(MarkerOptions {
            icon: None,
            size: 14,
            text: None,
            lat: Some(40.9),
            lng: Some(-78.9),
            location: None,
        });

        let gate = fixture.gate(&PluginOptions::Map(map));
        fixture.timers.advance_to(149);
        assert_eq!(gate.poll(), GateStatus::Pending);
        fixture.timers.advance_to(150);
        assert_eq!(gate.poll(), GateStatus::Ready);

        let data = gate.resolved().unwrap();
        assert_eq!(data.get(CENTER), Some(&json!({"lat": 51.0, "lng": -1.5})));
        assert_eq!(data.get(FLY_ENDPOINT), Some(&json!({"lat": 43.65, "lng": -79.38})));
        assert_eq!(data.get("marker:0"), Some(&json!({"lat": 40.9, "lng": -78.9})));
        assert!(data.get("script:map.js").is_some());
    }

    #[test]
    fn two_maps_share_one_library_load() {
        let timers = TimerQueue::new();
        let provider =
            SimulatedProvider::new(timers.clone()).with_script("map.js", SimulatedResponse::ok(10, json!(null)));
        let fixture = Fixture::new(provider, timers);

        let first = fixture.gate(&PluginOptions::Map(MapOptions::new("map.js")));
        let second = fixture.gate(&PluginOptions::Map(MapOptions::new("map.js")));
        fixture.timers.advance_by(10);

        assert_eq!(first.poll(), GateStatus::Ready);
        assert_eq!(second.poll(), GateStatus::Ready);
        assert_eq!(fixture.provider.request_count("script:map.js"), 1);
    }

    #[test]
    fn markdown_loads_extensions_after_the_parser() {
        let timers = TimerQueue::new();
        let provider = SimulatedProvider::new(timers.clone())
            .with_script("parser.js", SimulatedResponse::ok(100, json!(null)))
            .with_script("attrs.js", SimulatedResponse::ok(10, json!(null)));
        let fixture = Fixture::new(provider, timers);

        let gate = fixture.gate(&PluginOptions::Markdown(MarkdownOptions {
            text: "## Header".into(),
            parser_url: "parser.js".into(),
            extension_urls: vec!["attrs.js".into()],
        }));
        assert_eq!(fixture.provider.requests(), vec!["script:parser.js".to_string()]);

        fixture.timers.advance_to(100);
        assert_eq!(gate.poll(), GateStatus::Pending);
        fixture.timers.advance_to(110);
        assert_eq!(gate.poll(), GateStatus::Ready);
    }

    #[test]
    fn excerpt_fetch_failure_fails_the_gate() {
        let timers = TimerQueue::new();
        let provider = SimulatedProvider::new(timers.clone()).with_resource(
            "https://en.example.org/api?page=Cat",
            SimulatedResponse::failed(20, "malformed response"),
        );
        let fixture = Fixture::new(provider, timers);

        let gate = fixture.gate(&PluginOptions::Excerpt(ExcerptOptions {
            src: "http://en.example.org/wiki/Cat".into(),
            api_template: "https://{lang}.example.org/api?page={page}".into(),
            lang: "en".into(),
            title: None,
            paragraphs: 3,
        }));
        fixture.timers.advance_by(20);
        assert_eq!(gate.poll(), GateStatus::Failed);
    }

    #[test]
    fn kinds_carry_their_prefixes() {
        assert_eq!(PluginKind::Map.id_prefix(), "leafletdiv");
        assert_eq!(PluginKind::Excerpt.css_class(), "wikipedia-plugin");
        assert_eq!(PluginKind::WordStream.to_string(), "word_stream");
    }
}

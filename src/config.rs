//! Declarative configuration: the source/signal/hypothesis graph.
//!
//! The JSON document is the source of truth for everything the engine
//! scores. Loading is atomic: a document that fails validation is rejected
//! wholesale, with every violation reported.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PamError;

/// Feed dialect of a source, as declared in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
}

impl FeedKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rss" => Some(FeedKind::Rss),
            "atom" => Some(FeedKind::Atom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDef {
    pub name: String,
    pub url: String,
    /// "rss" or "atom". Kept as a string so validation can report bad
    /// values instead of failing the whole parse.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// Per-source fetch timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
}

impl SourceDef {
    pub fn feed_kind(&self) -> Option<FeedKind> {
        FeedKind::parse(&self.kind)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout.max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDef {
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub description: String,
    /// "sum" or "max" across bound sources.
    #[serde(default = "default_aggregation")]
    pub aggregation: String,
    /// Upper bound applied after aggregation.
    #[serde(default = "default_cap")]
    pub cap: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisDef {
    pub name: String,
    pub prior: f64,
    pub signals: Vec<String>,
}

/// Binds a signal to the sources, keyword sets, and window that compute it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBinding {
    #[serde(default)]
    pub sources: Vec<String>,
    /// Names of keyword sets, under the original document's `keywords` key.
    #[serde(rename = "keywords", default)]
    pub keyword_sets: Vec<String>,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

fn default_kind() -> String {
    "rss".to_string()
}

fn default_timeout() -> f64 {
    10.0
}

fn default_aggregation() -> String {
    "sum".to_string()
}

fn default_cap() -> f64 {
    1.0
}

fn default_window_days() -> u32 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sources: Vec<SourceDef>,
    pub signals: Vec<SignalDef>,
    pub hypotheses: Vec<HypothesisDef>,
    pub keyword_sets: BTreeMap<String, Vec<String>>,
    pub signal_bindings: BTreeMap<String, SignalBinding>,
}

impl Config {
    pub fn source(&self, name: &str) -> Option<&SourceDef> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDef> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn hypothesis(&self, name: &str) -> Option<&HypothesisDef> {
        self.hypotheses.iter().find(|h| h.name == name)
    }

    pub fn binding(&self, signal_name: &str) -> Option<&SignalBinding> {
        self.signal_bindings.get(signal_name)
    }

    /// Hostnames appearing in `sources`, plus their `www.`-stripped
    /// variants. Used to seed the fetcher's host whitelist.
    pub fn allowed_hosts(&self) -> HashSet<String> {
        let mut hosts = HashSet::new();
        for source in &self.sources {
            if let Ok(parsed) = url::Url::parse(&source.url) {
                if let Some(host) = parsed.host_str() {
                    hosts.insert(host.to_string());
                    if let Some(stripped) = host.strip_prefix("www.") {
                        hosts.insert(stripped.to_string());
                    }
                }
            }
        }
        hosts
    }

    /// Check the whole graph, returning every violation found.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut source_names: HashSet<&str> = HashSet::new();
        for source in &self.sources {
            if source.name.is_empty() {
                errors.push("source missing name".to_string());
            } else if !source_names.insert(&source.name) {
                errors.push(format!("duplicate source name: {}", source.name));
            }
            if source.url.is_empty() {
                errors.push(format!("source '{}' missing url", source.name));
            }
            if source.feed_kind().is_none() {
                errors.push(format!(
                    "source '{}' has invalid type: {}",
                    source.name, source.kind
                ));
            }
            if source.timeout <= 0.0 {
                errors.push(format!(
                    "source '{}' has invalid timeout: {}",
                    source.name, source.timeout
                ));
            }
        }

        let mut signal_names: HashSet<&str> = HashSet::new();
        for signal in &self.signals {
            if signal.name.is_empty() {
                errors.push("signal missing name".to_string());
            } else if !signal_names.insert(&signal.name) {
                errors.push(format!("duplicate signal name: {}", signal.name));
            }
            if signal.aggregation != "sum" && signal.aggregation != "max" {
                errors.push(format!(
                    "signal '{}' has invalid aggregation: {}",
                    signal.name, signal.aggregation
                ));
            }
            if signal.cap <= 0.0 {
                errors.push(format!(
                    "signal '{}' has invalid cap: {}",
                    signal.name, signal.cap
                ));
            }
        }

        let mut hypothesis_names: HashSet<&str> = HashSet::new();
        for hypothesis in &self.hypotheses {
            if hypothesis.name.is_empty() {
                errors.push("hypothesis missing name".to_string());
            } else if !hypothesis_names.insert(&hypothesis.name) {
                errors.push(format!("duplicate hypothesis name: {}", hypothesis.name));
            }
            if !(0.0..=1.0).contains(&hypothesis.prior) {
                errors.push(format!(
                    "hypothesis '{}' has invalid prior: {}",
                    hypothesis.name, hypothesis.prior
                ));
            }
            for signal_name in &hypothesis.signals {
                if !signal_names.contains(signal_name.as_str()) {
                    errors.push(format!(
                        "hypothesis '{}' references unknown signal: {}",
                        hypothesis.name, signal_name
                    ));
                }
            }
        }

        for (signal_name, binding) in &self.signal_bindings {
            if !signal_names.contains(signal_name.as_str()) {
                errors.push(format!("signal binding for unknown signal: {signal_name}"));
            }
            for source_name in &binding.sources {
                if !source_names.contains(source_name.as_str()) {
                    errors.push(format!(
                        "signal binding '{signal_name}' references unknown source: {source_name}"
                    ));
                }
            }
            for set_name in &binding.keyword_sets {
                if !self.keyword_sets.contains_key(set_name) {
                    errors.push(format!(
                        "signal binding '{signal_name}' references unknown keyword set: {set_name}"
                    ));
                }
            }
            if binding.window_days == 0 {
                errors.push(format!(
                    "signal binding '{signal_name}' has invalid window_days: 0"
                ));
            }
        }

        errors
    }

    /// Parse and validate; rejects the document atomically.
    pub fn from_json(raw: &str) -> Result<Self, PamError> {
        let config: Config =
            serde_json::from_str(raw).map_err(|e| PamError::Config(e.to_string()))?;
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(PamError::ConfigValidation(errors));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, PamError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PamError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    /// The stock world graph shipped with `--init`.
    pub fn default_world() -> Self {
        Config::from_json(DEFAULT_CONFIG_JSON).expect("built-in default config must be valid")
    }

    pub fn write_default(path: &Path) -> Result<(), PamError> {
        let config = Self::default_world();
        let raw = serde_json::to_string_pretty(&config)
            .map_err(|e| PamError::Config(e.to_string()))?;
        std::fs::write(path, raw)
            .map_err(|e| PamError::Config(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "wrote default config");
        Ok(())
    }
}

struct CachedLoad {
    loaded_at: Instant,
    config: Arc<Config>,
}

/// Loads config files with a TTL cache so repeated loads of an unchanged
/// path are free.
pub struct ConfigLoader {
    ttl: Duration,
    cache: Mutex<HashMap<PathBuf, CachedLoad>>,
}

impl ConfigLoader {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn load(&self, path: &Path) -> Result<Arc<Config>, PamError> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(path) {
                if entry.loaded_at.elapsed() < self.ttl {
                    return Ok(entry.config.clone());
                }
            }
        }

        let config = Arc::new(Config::load(path)?);
        self.cache.lock().insert(
            path.to_path_buf(),
            CachedLoad {
                loaded_at: Instant::now(),
                config: config.clone(),
            },
        );
        Ok(config)
    }

    pub fn invalidate(&self, path: &Path) {
        self.cache.lock().remove(path);
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        // Config documents change rarely; an hour matches the feed-side caches.
        Self::new(Duration::from_secs(3600))
    }
}

const DEFAULT_CONFIG_JSON: &str = r#"{
  "sources": [
    {"name": "reuters_world", "url": "https://feeds.reuters.com/reuters/worldNews", "type": "rss", "timeout": 10},
    {"name": "ap_top", "url": "https://feeds.apnews.com/apf-topnews", "type": "rss", "timeout": 10},
    {"name": "bbc_world", "url": "http://feeds.bbci.co.uk/news/world/rss.xml", "type": "rss", "timeout": 10},
    {"name": "nato_news", "url": "https://www.nato.int/cps/en/natohq/news.htm?&format=xml", "type": "rss", "timeout": 10},
    {"name": "un_news", "url": "https://news.un.org/feed/subscribe/en/news/all/rss.xml", "type": "rss", "timeout": 10},
    {"name": "iaea_news", "url": "https://www.iaea.org/rss/news", "type": "rss", "timeout": 10},
    {"name": "aljazeera", "url": "https://www.aljazeera.com/xml/rss/all.xml", "type": "rss", "timeout": 10},
    {"name": "dw_world", "url": "https://www.dw.com/en/rss", "type": "rss", "timeout": 10}
  ],
  "signals": [
    {"name": "mobilization_indicators", "weight": 1.9, "description": "Reports of mobilization, troop movement, conscription", "aggregation": "sum", "cap": 1.0},
    {"name": "border_clashes", "weight": 2.4, "description": "Skirmishes at borders, shelling, strikes", "aggregation": "sum", "cap": 1.0},
    {"name": "diplomatic_breakdown", "weight": 1.6, "description": "Sanctions, expulsions, talks collapse", "aggregation": "sum", "cap": 1.0},
    {"name": "deescalation_signals", "weight": -1.5, "description": "Ceasefires, successful talks", "aggregation": "sum", "cap": 1.0},
    {"name": "domestic_unrest", "weight": 2.0, "description": "Protests, riots, strikes", "aggregation": "sum", "cap": 1.0},
    {"name": "coup_rumors", "weight": 2.2, "description": "Coup attempts, military statements", "aggregation": "sum", "cap": 1.0},
    {"name": "state_repression", "weight": 1.5, "description": "Crackdowns, martial law", "aggregation": "sum", "cap": 1.0},
    {"name": "power_sharing", "weight": -1.3, "description": "Coalitions, reform talks", "aggregation": "sum", "cap": 1.0},
    {"name": "nuclear_testing_talk", "weight": 2.6, "description": "ICBM tests, nuclear rhetoric", "aggregation": "max", "cap": 1.0},
    {"name": "energy_nuclear_incident", "weight": 0.8, "description": "Nuclear energy incidents (not weapons)", "aggregation": "sum", "cap": 0.8},
    {"name": "dealerting_confidence", "weight": -1.8, "description": "De-escalatory nuclear posture signals", "aggregation": "max", "cap": 1.0}
  ],
  "hypotheses": [
    {"name": "global_war_risk", "prior": 0.05, "signals": ["mobilization_indicators", "border_clashes", "diplomatic_breakdown", "deescalation_signals"]},
    {"name": "civil_war_risk", "prior": 0.07, "signals": ["domestic_unrest", "coup_rumors", "state_repression", "power_sharing"]},
    {"name": "nuclear_use_risk", "prior": 0.01, "signals": ["nuclear_testing_talk", "dealerting_confidence", "deescalation_signals"]}
  ],
  "keyword_sets": {
    "mobilization": ["mobilization", "conscription", "call-up", "draft", "reserve forces", "troop movement", "military convoy"],
    "border": ["border clash", "skirmish", "shelling", "airstrike", "missile strike", "incursion", "artillery"],
    "diplo_break": ["sanctions", "ambassador expelled", "talks collapse", "ceasefire fails", "breaking off relations"],
    "deescalate": ["ceasefire", "talks resume", "peace talks", "truce", "de-escalation", "exchange of prisoners"],
    "unrest": ["protest", "riots", "strike", "mass demonstration", "civil unrest"],
    "coup": ["coup", "junta", "military takes power", "state of emergency", "martial law"],
    "repression": ["crackdown", "curfew", "martial law", "security forces", "mass arrests"],
    "power_sharing": ["coalition", "unity government", "power-sharing", "constitution reform"],
    "nuclear_weapons": ["icbm", "ballistic missile", "nuclear test", "warhead", "nuclear strike", "launch"],
    "nuclear_deescalate": ["de-alert", "arms control", "treaty", "dialogue on strategic stability"]
  },
  "signal_bindings": {
    "mobilization_indicators": {"sources": ["reuters_world", "ap_top", "bbc_world", "aljazeera", "dw_world"], "keywords": ["mobilization"], "window_days": 7},
    "border_clashes": {"sources": ["reuters_world", "ap_top", "bbc_world", "aljazeera"], "keywords": ["border"], "window_days": 7},
    "diplomatic_breakdown": {"sources": ["reuters_world", "bbc_world", "dw_world"], "keywords": ["diplo_break"], "window_days": 10},
    "deescalation_signals": {"sources": ["reuters_world", "bbc_world", "un_news"], "keywords": ["deescalate"], "window_days": 10},
    "domestic_unrest": {"sources": ["reuters_world", "ap_top", "bbc_world", "aljazeera"], "keywords": ["unrest"], "window_days": 7},
    "coup_rumors": {"sources": ["reuters_world", "bbc_world", "dw_world"], "keywords": ["coup"], "window_days": 14},
    "state_repression": {"sources": ["reuters_world", "ap_top", "bbc_world"], "keywords": ["repression"], "window_days": 10},
    "power_sharing": {"sources": ["reuters_world", "bbc_world", "un_news"], "keywords": ["power_sharing"], "window_days": 21},
    "nuclear_testing_talk": {"sources": ["reuters_world", "bbc_world", "dw_world"], "keywords": ["nuclear_weapons"], "window_days": 21},
    "energy_nuclear_incident": {"sources": ["iaea_news"], "keywords": ["nuclear_weapons"], "window_days": 21},
    "dealerting_confidence": {"sources": ["reuters_world", "bbc_world"], "keywords": ["nuclear_deescalate"], "window_days": 30}
  }
}
"#;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::Config;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "harvester.toml";
const ENV_PREFIX: &str = "HARVEST";

/// Everything a run needs besides its file paths.
///
/// Sources are layered lowest to highest: built-in defaults, the optional
/// config file, `HARVEST_*` environment variables. CLI flags are applied on
/// top by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub site: SiteConfig,
    pub admission: AdmissionPolicy,
    pub fetch: FetchOptions,
    pub schema: SelectorSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Prefixed to every relative frontier entry.
    pub origin: String,
    pub index_path: String,
    /// Number of `/p{n}` pages walked after the base index page.
    pub index_pages: usize,
    /// Only card links starting with this path are kept.
    pub link_prefix: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            origin: "https://www.realestate.com.au".into(),
            index_path: "/international/us".into(),
            index_pages: 160,
            link_prefix: "/international/us/".into(),
        }
    }
}

/// How many fetches may be in flight at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionPolicy {
    pub max_concurrent_fetches: usize,
    /// New fetches wait while system memory usage is above this percentage.
    /// Zero or negative disables the pressure gate.
    pub memory_threshold_percent: f64,
    pub check_interval_ms: u64,
    pub monitoring_enabled: bool,
    pub monitor_interval_ms: u64,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 20,
            memory_threshold_percent: 90.0,
            check_interval_ms: 1000,
            monitoring_enabled: true,
            monitor_interval_ms: 5000,
        }
    }
}

impl AdmissionPolicy {
    pub fn pressure_threshold(&self) -> Option<f64> {
        (self.memory_threshold_percent > 0.0).then_some(self.memory_threshold_percent)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(100))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Plain HTTP via reqwest.
    Http,
    /// Headless-browser rendering via spider.cloud (needs SPIDER_API_KEY).
    Spider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    pub engine: EngineKind,
    pub bypass_cache: bool,
    pub respect_robots: bool,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Rate-limit retries, honored by the spider engine only.
    pub retries: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            engine: EngineKind::Http,
            bypass_cache: true,
            respect_robots: true,
            timeout_secs: 30,
            user_agent: concat!("listing_harvester/", env!("CARGO_PKG_VERSION")).into(),
            retries: 0,
        }
    }
}

impl FetchOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Site markup selectors. These change whenever the site ships new CSS, so
/// they live in configuration rather than in the extractors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSchema {
    pub price: String,
    pub features_container: String,
    pub feature_item: String,
    pub feature_key: String,
    pub feature_value: String,
    pub discriminator: String,
    pub labels: FieldLabels,
    pub listing_card: String,
    pub card_link: String,
}

impl Default for SelectorSchema {
    fn default() -> Self {
        Self {
            price: "div.sc-10v3xoh-1.cqrlhJ".into(),
            features_container:
                r#"div.zs0kp9-9.hp6kep-0.kyvSuM[data-test-id="ListingFeaturesContainer"]"#.into(),
            feature_item: "div".into(),
            feature_key: "div.basicInfoKey".into(),
            feature_value: "div.basicInfoValue".into(),
            discriminator: "Property Type".into(),
            labels: FieldLabels::default(),
            listing_card: r#"div[data-testid="standard-listing-card"]"#.into(),
            card_link: "a[href]".into(),
        }
    }
}

/// Feature-list labels projected into each record column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldLabels {
    pub land_size: String,
    pub building_size: String,
    pub year_built: String,
    pub rooms: String,
    pub county: String,
}

impl Default for FieldLabels {
    fn default() -> Self {
        Self {
            land_size: "Land Size".into(),
            building_size: "Building Size".into(),
            year_built: "Year Built".into(),
            rooms: "Rooms".into(),
            county: "County".into(),
        }
    }
}

impl Settings {
    /// Load defaults, then `path` if it exists, then the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let defaults = Config::try_from(&Settings::default())
            .context("Failed to serialize default settings")?;

        let settings = Config::builder()
            .add_source(defaults)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        settings
            .try_deserialize()
            .context("Invalid settings")
    }

    /// Base index page followed by `/p2 ..= /p{index_pages + 1}`.
    pub fn index_urls(&self) -> Vec<String> {
        let base = format!("{}{}", self.site.origin, self.site.index_path);
        let mut urls = Vec::with_capacity(self.site.index_pages + 1);
        urls.push(base.clone());
        for page in 2..self.site.index_pages + 2 {
            urls.push(format!("{}/p{}", base, page));
        }
        urls
    }
}

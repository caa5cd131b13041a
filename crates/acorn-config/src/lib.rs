//! acorn-config
//!
//! Typed YAML configuration for the pull pipelines, loaded **once** at
//! process start and passed by reference to each component; no ambient
//! global state.
//!
//! # Contract
//! - The YAML file stores products, keyword sets and pacing overrides.
//!   It must **not** store secret values; credentials are resolved from
//!   the environment via [`resolve_credentials`], and any leaf string
//!   that looks like a secret aborts the load.
//! - `Debug` on [`ResolvedCredentials`] redacts values.
//! - Every load computes a sha256 fingerprint of the canonical JSON form
//!   so pull logs can attribute records to an exact configuration.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Env var holding the trends API username.
pub const ENV_TRENDS_USER: &str = "ACORN_TRENDS_USER";
/// Env var holding the trends API password.
pub const ENV_TRENDS_PASS: &str = "ACORN_TRENDS_PASS";

/// Known secret-like prefixes. If any leaf string value in the config
/// file starts with one of these, the load aborts: secrets belong in the
/// environment, never in the config file.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",        // OpenAI / Stripe style
    "sk_live",    // Stripe live
    "sk_test",    // Stripe test
    "AKIA",       // AWS access key ID
    "-----BEGIN", // PEM private keys
    "ghp_",       // GitHub PAT
    "glpat-",     // GitLab PAT
    "xoxb-",      // Slack bot token
];

/// Default product list used when no config file is supplied.
const DEFAULT_PRODUCTS: &[&str] = &["BTC-USD", "ETH-USD", "LTC-USD"];

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// One named keyword set for the trends pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeywordSet {
    pub keywords: Vec<String>,
    /// Optional tag vocabulary; see [`KeywordSet::tagged_lists`].
    #[serde(default)]
    pub tags: Vec<String>,
}

impl KeywordSet {
    /// Expand tags into per-term keyword lists: one list per base term,
    /// containing `"<term> <tag>"` for every tag. Empty when there are
    /// no tags.
    pub fn tagged_lists(&self) -> Vec<Vec<String>> {
        if self.tags.is_empty() {
            return Vec::new();
        }
        self.keywords
            .iter()
            .map(|term| self.tags.iter().map(|tag| format!("{term} {tag}")).collect())
            .collect()
    }
}

/// Pacing overrides; absent fields fall back to the runner defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PacingSettings {
    pub request_pause_ms: Option<u64>,
    pub failure_cooldown_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default)]
    products: Vec<String>,
    #[serde(default)]
    keyword_sets: BTreeMap<String, KeywordSet>,
    #[serde(default)]
    pacing: PacingSettings,
}

/// Effective configuration for one process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub products: Vec<String>,
    pub keyword_sets: BTreeMap<String, KeywordSet>,
    pub pacing: PacingSettings,
    /// sha256 hex of the canonical JSON form, for log attribution.
    pub config_hash: String,
}

impl AppConfig {
    /// Built-in defaults: the usual products, no keyword sets.
    pub fn defaults() -> Self {
        Self {
            products: DEFAULT_PRODUCTS.iter().map(|s| s.to_string()).collect(),
            keyword_sets: BTreeMap::new(),
            pacing: PacingSettings::default(),
            config_hash: "default".to_string(),
        }
    }

    /// Look up a keyword set by name with a copy-paste friendly error.
    pub fn keyword_set(&self, name: &str) -> Result<&KeywordSet> {
        self.keyword_sets.get(name).with_context(|| {
            format!(
                "keyword set '{}' not found. configured sets: {:?}",
                name,
                self.keyword_sets.keys().collect::<Vec<_>>()
            )
        })
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load and validate a config file.
pub fn load(path: &Path) -> Result<AppConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    load_from_str(&raw)
}

/// Load from an optional path: `None` yields [`AppConfig::defaults`].
pub fn load_or_default(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(p) => load(p),
        None => Ok(AppConfig::defaults()),
    }
}

pub fn load_from_str(raw: &str) -> Result<AppConfig> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
    let json = serde_json::to_value(&yaml).context("yaml->json conversion failed")?;
    enforce_no_secret_literals(&json)?;

    let file: FileConfig = serde_yaml::from_str(raw).context("config shape invalid")?;

    let products = if file.products.is_empty() {
        DEFAULT_PRODUCTS.iter().map(|s| s.to_string()).collect()
    } else {
        file.products
    };
    for p in &products {
        if p.trim().is_empty() {
            bail!("config products must be non-empty strings");
        }
    }
    for (name, set) in &file.keyword_sets {
        if set.keywords.is_empty() || set.keywords.iter().any(|k| k.trim().is_empty()) {
            bail!("keyword set '{name}' must list non-empty keywords");
        }
    }

    let canonical = serde_json::to_string(&json).context("canonical json serialize failed")?;
    let config_hash = sha256_hex(canonical.as_bytes());

    Ok(AppConfig {
        products,
        keyword_sets: file.keyword_sets,
        pacing: file.pacing,
        config_hash,
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &serde_json::Value) -> Result<()> {
    match v {
        serde_json::Value::String(s) => {
            let t = s.trim();
            if t.len() >= 8 && SECRET_PREFIXES.iter().any(|p| t.starts_with(p)) {
                bail!("CONFIG_SECRET_DETECTED: config files must not contain secret values");
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                enforce_no_secret_literals(item)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                enforce_no_secret_literals(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Trends API credentials resolved from the environment at startup.
/// **Values are redacted in `Debug` output.**
#[derive(Clone)]
pub struct ResolvedCredentials {
    pub trends_user: Option<String>,
    pub trends_pass: Option<String>,
}

impl std::fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredentials")
            .field("trends_user", &self.trends_user.as_ref().map(|_| "<REDACTED>"))
            .field("trends_pass", &self.trends_pass.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl ResolvedCredentials {
    /// Both trend credentials, or an error naming the missing env var
    /// (never its value).
    pub fn require_trends(&self) -> Result<(String, String)> {
        let user = self
            .trends_user
            .clone()
            .with_context(|| format!("missing env var {ENV_TRENDS_USER}"))?;
        let pass = self
            .trends_pass
            .clone()
            .with_context(|| format!("missing env var {ENV_TRENDS_PASS}"))?;
        Ok((user, pass))
    }
}

/// Resolve credentials from the environment. Call once in `main`; pass
/// the result down. Empty values count as absent.
pub fn resolve_credentials() -> ResolvedCredentials {
    fn read(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
    ResolvedCredentials {
        trends_user: read(ENV_TRENDS_USER),
        trends_pass: read(ENV_TRENDS_PASS),
    }
}

use anyhow::{bail, Context, Result};
use context_vault_core::chunk::{ChunkMode, ChunkOptions};
use context_vault_core::search::SearchParams;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub vault: VaultConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub signing: SigningConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    #[serde(default)]
    pub mode: ChunkMode,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            mode: ChunkMode::default(),
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkOptions {
        ChunkOptions {
            max_tokens: self.max_tokens,
            overlap_tokens: self.overlap_tokens,
            mode: self.mode,
        }
    }
}

fn default_max_tokens() -> usize {
    700
}
fn default_overlap() -> usize {
    0
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Vector weight: `hybrid = (1-α)*keyword + α*vector`.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            final_limit: default_final_limit(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> SearchParams {
        SearchParams {
            hybrid_alpha: self.hybrid_alpha,
            final_limit: self.final_limit,
            bm25_k1: self.bm25_k1,
            bm25_b: self.bm25_b,
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.4
}
fn default_final_limit() -> usize {
    12
}
fn default_bm25_k1() -> f64 {
    1.2
}
fn default_bm25_b() -> f64 {
    0.75
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub dims: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            dims: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default = "default_actor")]
    pub actor: String,
    #[serde(default = "default_segment_max_events")]
    pub segment_max_events: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            actor: default_actor(),
            segment_max_events: default_segment_max_events(),
        }
    }
}

fn default_actor() -> String {
    "vault".to_string()
}
fn default_segment_max_events() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_auto_snapshot")]
    pub auto_snapshot: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            auto_snapshot: default_auto_snapshot(),
        }
    }
}

fn default_auto_snapshot() -> bool {
    true
}

/// Symmetric signing keys, one per signer id, hex encoded.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SigningConfig {
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

impl Config {
    /// Default configuration for a vault rooted at `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            vault: VaultConfig { root: root.into() },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            audit: AuditConfig::default(),
            index: IndexConfig::default(),
            signing: SigningConfig::default(),
        }
    }

    /// Check constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }
        if self.chunking.overlap_tokens >= self.chunking.max_tokens {
            bail!("chunking.overlap_tokens must be < chunking.max_tokens");
        }

        if self.retrieval.final_limit < 1 {
            bail!("retrieval.final_limit must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.hybrid_alpha) {
            bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
        }
        if self.retrieval.bm25_k1 < 0.0 || !(0.0..=1.0).contains(&self.retrieval.bm25_b) {
            bail!("retrieval.bm25_k1 must be >= 0 and retrieval.bm25_b in [0.0, 1.0]");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "hashing" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled or hashing.",
                other
            ),
        }
        if self.embedding.is_enabled() && matches!(self.embedding.dims, None | Some(0)) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                self.embedding.provider
            );
        }

        if self.audit.segment_max_events == 0 {
            bail!("audit.segment_max_events must be > 0");
        }
        if self.audit.actor.trim().is_empty() {
            bail!("audit.actor must not be empty");
        }

        for (signer, key) in &self.signing.keys {
            match hex::decode(key) {
                Ok(bytes) if !bytes.is_empty() => {}
                _ => bail!("signing.keys.{} must be a non-empty hex string", signer),
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // A relative vault root is resolved against the config file's directory.
    if config.vault.root.is_relative() {
        if let Some(dir) = path.parent() {
            config.vault.root = dir.join(&config.vault.root);
        }
    }

    config.validate()?;
    Ok(config)
}

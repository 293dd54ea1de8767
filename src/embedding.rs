//! Embedding provider selection.
//!
//! The [`EmbeddingProvider`] trait and the built-in [`HashingEmbedder`] live
//! in `context-vault-core`; this module maps `[embedding]` configuration
//! onto a provider instance.
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"disabled"` | none; search uses the bag-of-words fallback |
//! | `"hashing"` | [`HashingEmbedder`] with `dims` dimensions |

use anyhow::{bail, Result};

pub use context_vault_core::embedding::{EmbeddingProvider, HashingEmbedder};

use crate::config::EmbeddingConfig;

/// Create the configured provider, or `None` when embeddings are disabled.
///
/// # Errors
///
/// Returns an error for unknown provider names or a missing `dims`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Option<Box<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "hashing" => {
            let Some(dims) = config.dims else {
                bail!("embedding.dims is required for the hashing provider");
            };
            Ok(Some(Box::new(HashingEmbedder::new(dims)?)))
        }
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_yields_none() {
        assert!(create_provider(&EmbeddingConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_hashing_provider() {
        let config = EmbeddingConfig {
            provider: "hashing".into(),
            dims: Some(16),
        };
        let provider = create_provider(&config).unwrap().unwrap();
        assert_eq!(provider.dims(), 16);
        assert_eq!(provider.embed(&["fox"]).unwrap()[0].len(), 16);
    }

    #[test]
    fn test_unknown_provider_errors() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            dims: Some(16),
        };
        assert!(create_provider(&config).is_err());
    }
}

//! Configuration for the percent-format segment generator.
//!
//! ```toml
//! marker = "# %%"
//! language = "python"
//! markdown-tags = ["markdown", "md"]
//! raw-tags = ["raw"]
//! ```

use serde::{
  Deserialize,
  Serialize,
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to parse cells config: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("cell marker must not be empty")]
  EmptyMarker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CellsConfig {
  /// Prefix that opens a new cell when a line starts with it.
  pub marker:        String,
  /// Language tag given to code cells.
  pub language:      String,
  pub markdown_tags: Vec<String>,
  pub raw_tags:      Vec<String>,
}

impl Default for CellsConfig {
  fn default() -> Self {
    Self {
      marker:        "# %%".into(),
      language:      "python".into(),
      markdown_tags: vec!["markdown".into(), "md".into()],
      raw_tags:      vec!["raw".into()],
    }
  }
}

impl CellsConfig {
  pub fn from_toml(source: &str) -> Result<Self> {
    let config: Self = toml::from_str(source)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.marker.trim().is_empty() {
      return Err(ConfigError::EmptyMarker);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_source_yields_defaults() {
    assert_eq!(CellsConfig::from_toml("").unwrap(), CellsConfig::default());
  }

  #[test]
  fn partial_override() {
    let config = CellsConfig::from_toml(
      r#"
        marker = "// %%"
        language = "rust"
      "#,
    )
    .unwrap();
    assert_eq!(config.marker, "// %%");
    assert_eq!(config.language, "rust");
    assert_eq!(config.raw_tags, vec!["raw".to_string()]);
  }

  #[test]
  fn rejects_unknown_keys_and_empty_marker() {
    assert!(matches!(
      CellsConfig::from_toml("cell-marker = \"x\""),
      Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
      CellsConfig::from_toml("marker = \"  \""),
      Err(ConfigError::EmptyMarker)
    ));
  }
}

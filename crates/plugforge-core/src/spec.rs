//! Plugin specification types.
//!
//! A [`PluginSpecification`] is immutable once collected: the CLI assembles
//! it from flags or a TOML file, and the pipeline consumes it for the
//! expansion and generation prompts.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Declarative description of the plugin to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpecification {
    /// Slug name for the plugin (lowercase alphanumerics and hyphens).
    pub name: String,
    /// One-paragraph description of what the plugin does.
    pub description: String,
    /// Feature list driving the generation prompt.
    #[serde(default)]
    pub features: Vec<String>,
    /// Named actions the plugin should expose.
    #[serde(default)]
    pub actions: Vec<String>,
    /// Named providers the plugin should expose.
    #[serde(default)]
    pub providers: Vec<String>,
    /// Named evaluators the plugin should expose.
    #[serde(default)]
    pub evaluators: Vec<String>,
    /// Named background services the plugin should expose.
    #[serde(default)]
    pub services: Vec<String>,
}

impl PluginSpecification {
    /// Validate the specification, in particular the slug name.
    pub fn validate(&self) -> Result<()> {
        validate_slug(&self.name)?;
        if self.description.trim().is_empty() {
            bail!("plugin description must not be empty");
        }
        Ok(())
    }

    /// Parse a specification from TOML and validate it.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let spec: Self = toml::from_str(contents)?;
        spec.validate()?;
        Ok(spec)
    }
}

/// Check that a plugin name is a valid slug: non-empty, lowercase
/// alphanumerics and hyphens, no leading/trailing/doubled hyphen.
pub fn validate_slug(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("plugin name must not be empty");
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        bail!("plugin name {name:?} has a misplaced hyphen");
    }
    for c in name.chars() {
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            bail!("plugin name {name:?} contains invalid character {c:?} (use lowercase letters, digits, and hyphens)");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> PluginSpecification {
        PluginSpecification {
            name: name.to_owned(),
            description: "A weather lookup plugin.".to_owned(),
            features: vec!["current conditions".to_owned()],
            actions: vec!["GET_WEATHER".to_owned()],
            providers: Vec::new(),
            evaluators: Vec::new(),
            services: Vec::new(),
        }
    }

    #[test]
    fn accepts_valid_slugs() {
        for name in ["weather", "weather-api", "plugin-v2"] {
            assert!(spec(name).validate().is_ok(), "expected {name:?} to pass");
        }
    }

    #[test]
    fn rejects_invalid_slugs() {
        for name in ["", "Weather", "weather_api", "-weather", "weather-", "a--b", "weather api"] {
            assert!(spec(name).validate().is_err(), "expected {name:?} to fail");
        }
    }

    #[test]
    fn rejects_empty_description() {
        let mut s = spec("weather");
        s.description = "   ".to_owned();
        assert!(s.validate().is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let s = PluginSpecification::from_toml(
            r#"
            name = "weather"
            description = "Fetches weather data."
            features = ["forecast"]
            "#,
        )
        .expect("should parse");
        assert_eq!(s.name, "weather");
        assert_eq!(s.features, vec!["forecast"]);
        assert!(s.actions.is_empty());
    }
}

use std::path::Path;

use anyhow::{Context, Result};
use diversion_core::PipelineConfig;
use diversion_sink_feature_service::FeatureServiceConfig;
use serde::Deserialize;

/// Contents of the TOML configuration file.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Settings {
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub publish: PublishSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_owned()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct PublishSettings {
    #[serde(default)]
    pub feature_service: Option<FeatureServiceConfig>,
}

impl Settings {
    pub(crate) fn parse(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text).context("Failed to parse configuration")?;
        settings
            .pipeline
            .validate()
            .context("Invalid pipeline configuration")?;
        Ok(settings)
    }

    pub(crate) async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("In config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use diversion_core::{LayerId, MaterialCategory, Metric};

    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let settings = Settings::parse("year = 2023\n").expect("valid");

        assert_eq!(settings.pipeline.year, 2023);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.publish.feature_service.is_none());
        assert_eq!(
            settings.pipeline.rename.resolve("Comm. Organics"),
            Some(MaterialCategory::Organics)
        );
    }

    #[test]
    fn full_config_parses() {
        let text = r#"
year = 2024

rename = [
    { exact = "BFS", category = "Organics" },
    { contains = "cardboard", category = "Cardboard" },
]

[thresholds.diverted_tons]
absolute_floor = 10
percent_ceiling = 15.0

[logging]
level = "debug"

[publish.feature_service]
token = "secret"

[publish.feature_service.layers]
facilities = "https://example.test/FeatureServer/0"
statewide = "https://example.test/FeatureServer/2"
"#;

        let settings = Settings::parse(text).expect("valid");

        assert_eq!(settings.pipeline.rename.rules().len(), 2);
        let threshold = settings.pipeline.thresholds.for_metric(Metric::DivertedTons);
        assert!((threshold.percent_ceiling - 15.0).abs() < f64::EPSILON);
        assert!((threshold.absolute_floor - 10.0).abs() < f64::EPSILON);
        assert_eq!(settings.logging.level, "debug");

        let service = settings.publish.feature_service.expect("feature service");
        assert_eq!(service.token.as_deref(), Some("secret"));
        assert_eq!(
            service.layers.keys().copied().collect::<Vec<_>>(),
            vec![LayerId::Facilities, LayerId::Statewide]
        );
    }

    #[test]
    fn negative_threshold_is_rejected() {
        let text = "year = 2023\n[thresholds.recovery_rate]\nabsolute_floor = -1.0\npercent_ceiling = 5.0\n";

        assert!(Settings::parse(text).is_err());
    }

    #[tokio::test]
    async fn load_reads_the_file_and_names_it_on_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("diversion.toml");
        std::fs::write(&path, "year = 2022\n").expect("write");

        let settings = Settings::load(&path).await.expect("valid");
        assert_eq!(settings.pipeline.year, 2022);

        let err = Settings::load(&dir.path().join("absent.toml"))
            .await
            .expect_err("no such file");
        assert!(format!("{err:#}").contains("absent.toml"));
    }

    #[test]
    fn missing_year_is_rejected() {
        assert!(Settings::parse("[logging]\nlevel = \"warn\"\n").is_err());
    }
}

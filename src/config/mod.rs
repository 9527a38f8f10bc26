//! Pipeline configuration.
//!
//! Every component receives its settings from a [`PipelineConfig`] built at
//! the start of a run; nothing is read from process-wide state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::data::gcs::GcsScale;
use crate::data::{
    SplitConfig, DEFAULT_MASK_COLUMNS, DEFAULT_WINDOW_SIZE, GCS_EYE_COLUMN, GCS_MOTOR_COLUMN,
    GCS_VERBAL_COLUMN, HOURS_COLUMN, MEASUREMENT_COLUMNS, MORTALITY_COLUMN, SUBJECT_COLUMN,
};
use crate::error::PipelineError;

/// A categorical Glasgow Coma Scale column and the scale its descriptors come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcsColumn {
    pub column: String,
    pub scale: GcsScale,
}

/// Input column contract and cleaning rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    /// Subject identifier in the timeline table
    pub subject: String,
    /// Elapsed hours in the timeline table
    pub hours: String,
    /// Measurement columns kept as features
    pub measurements: Vec<String>,
    /// Measurement columns holding text-suffixed GCS scores
    pub gcs: Vec<GcsColumn>,
    /// Columns forward-filled after normalization
    pub ffill: Vec<String>,
    /// Whether forward-fill restarts at each subject
    pub ffill_per_subject: bool,
    /// Columns that must be present for the validity mask to be 1
    pub mask: Vec<String>,
    /// Subject identifier in the outcomes table
    pub outcome_subject: String,
    /// Mortality flag in the outcomes table
    pub mortality: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        let measurements: Vec<String> = MEASUREMENT_COLUMNS.iter().map(|c| c.to_string()).collect();
        Self {
            subject: SUBJECT_COLUMN.to_string(),
            hours: HOURS_COLUMN.to_string(),
            ffill: measurements.clone(),
            measurements,
            gcs: vec![
                GcsColumn {
                    column: GCS_EYE_COLUMN.to_string(),
                    scale: GcsScale::EyeOpening,
                },
                GcsColumn {
                    column: GCS_MOTOR_COLUMN.to_string(),
                    scale: GcsScale::MotorResponse,
                },
                GcsColumn {
                    column: GCS_VERBAL_COLUMN.to_string(),
                    scale: GcsScale::VerbalResponse,
                },
            ],
            ffill_per_subject: true,
            mask: DEFAULT_MASK_COLUMNS.iter().map(|c| c.to_string()).collect(),
            outcome_subject: SUBJECT_COLUMN.to_string(),
            mortality: MORTALITY_COLUMN.to_string(),
        }
    }
}

impl ColumnConfig {
    /// Scale of a GCS column, if the column is categorical
    pub fn gcs_scale(&self, column: &str) -> Option<GcsScale> {
        self.gcs.iter().find(|g| g.column == column).map(|g| g.scale)
    }

    /// Every cleaning column must also be a measurement column
    pub fn validate(&self) -> crate::error::Result<()> {
        let referenced = self
            .gcs
            .iter()
            .map(|g| &g.column)
            .chain(&self.ffill)
            .chain(&self.mask);
        for column in referenced {
            if !self.measurements.contains(column) {
                return Err(PipelineError::MissingColumn(column.clone()));
            }
        }
        Ok(())
    }
}

/// Sliding window settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Timeline rows per window
    pub window_size: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

/// Complete configuration of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub columns: ColumnConfig,
    pub window: WindowConfig,
    pub split: SplitConfig,
}

impl PipelineConfig {
    /// Load configuration from a JSON file. Missing sections take defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from {:?}", path);
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: PipelineConfig = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every parameter before the run starts
    pub fn validate(&self) -> crate::error::Result<()> {
        crate::utils::validation::positive("window_size", self.window.window_size)?;
        self.columns.validate()?;
        self.split.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SubsetLevel;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window.window_size, 12);
        assert_eq!(config.columns.measurements.len(), 13);
        assert_eq!(
            config.columns.gcs_scale(GCS_MOTOR_COLUMN),
            Some(GcsScale::MotorResponse)
        );
        assert_eq!(config.columns.gcs_scale("Glucose"), None);
    }

    #[test]
    fn test_unknown_mask_column_rejected() {
        let mut config = PipelineConfig::default();
        config.columns.mask.push("Weight".to_string());
        assert!(matches!(
            config.validate(),
            Err(PipelineError::MissingColumn(c)) if c == "Weight"
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "window": { "window_size": 6 }, "split": { "subset_level": "window", "subset_proportion": 0.5 } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.window.window_size, 6);
        assert_eq!(config.split.subset_level, SubsetLevel::Window);
        assert_eq!(config.split.seed, 123);
        assert_eq!(config.columns, ColumnConfig::default());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "window": { "window_size": 0 } }"#).unwrap();
        assert!(PipelineConfig::from_file(&path).is_err());

        std::fs::write(&path, r#"{ "split": { "split_ratio": 0.8 } }"#).unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.split.split_ratio, 0.8);
    }
}

//! # ICU Mortality: data preparation for in-hospital mortality prediction
//!
//! Turns hourly ICU timelines into fixed-size, flattened windows labeled with
//! the admission outcome, splits them into train and test arrays by
//! admission, and scores the predictions of an external model.
//!
//! ## Features
//!
//! - Glasgow coma scale text normalization (`"4 Spontaneously"` becomes `4`)
//! - Per-subject forward fill and a row validity mask
//! - Sliding windows with a label only on the window before discharge
//! - Seeded train/test split with admission- or window-level subsetting
//! - Checkpointing that keeps partial progress on interrupt
//! - ROC / PR curves, classification report and optimal cutoff
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use icu_mortality::checkpoint::CheckpointPaths;
//! use icu_mortality::config::PipelineConfig;
//! use icu_mortality::data::dictionary::{generate_data_dict, DataDictBuilder};
//! use icu_mortality::data::loader::load_dataframes;
//! use icu_mortality::data::preprocessing::train_test_split;
//!
//! let config = PipelineConfig::default();
//!
//! // Load and clean
//! let (timeline, outcomes) =
//!     load_dataframes(&config.columns, "timeseries.csv", "stays.csv").unwrap();
//!
//! // Build and store the data dictionary
//! let builder = DataDictBuilder::new(config.window);
//! let data_dict =
//!     generate_data_dict(&builder, &timeline, &outcomes, &CheckpointPaths::default()).unwrap();
//!
//! // Split by admission
//! let dataset = train_test_split(&data_dict, &config.split).unwrap();
//! println!("{} train windows", dataset.train_size());
//! ```

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod utils;

/// Re-export commonly used types
pub use config::PipelineConfig;
pub use data::dictionary::{BuildOutcome, DataDictBuilder};
pub use data::loader::DataLoader;
pub use data::{DataDict, Dataset, SplitConfig, SubsetLevel};
pub use error::{PipelineError, Result};
pub use metrics::{Classifier, EvaluationReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!(
        "{} v{} - ICU mortality data preparation and evaluation",
        NAME, VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_info() {
        let info_str = info();
        assert!(info_str.contains("icu-mortality"));
        assert!(info_str.contains(VERSION));
    }
}

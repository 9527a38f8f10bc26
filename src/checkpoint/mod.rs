use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::data::DataDict;
use crate::error::Result;

/// Default location of a completed data dictionary
pub const DEFAULT_DATA_DICT_PATH: &str = "data/data_dict.bin";

/// Where a data dictionary is written on completion and on interruption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPaths {
    /// Written after a clean run
    pub complete: PathBuf,
    /// Written when the run is interrupted part way
    pub partial: PathBuf,
}

impl CheckpointPaths {
    /// Derive the partial path by appending `_temp` to the file stem
    pub fn from_output<P: AsRef<Path>>(output: P) -> Self {
        let complete = output.as_ref().to_path_buf();
        let stem = complete
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("data_dict");
        let partial_name = match complete.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}_temp.{}", stem, ext),
            None => format!("{}_temp", stem),
        };
        let partial = complete.with_file_name(partial_name);
        Self { complete, partial }
    }
}

impl Default for CheckpointPaths {
    fn default() -> Self {
        Self::from_output(DEFAULT_DATA_DICT_PATH)
    }
}

/// Serialize a data dictionary, creating parent directories as needed
pub fn save_data_dict<P: AsRef<Path>>(data_dict: &DataDict, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        warn!("Overwriting existing data dictionary at {:?}", path);
    }

    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, data_dict)?;

    info!(
        "Stored data dictionary ({} subjects, {} windows) at {:?}",
        data_dict.len(),
        data_dict.total_windows(),
        path
    );
    Ok(())
}

/// Read a data dictionary written by [`save_data_dict`]
pub fn load_data_dict<P: AsRef<Path>>(path: P) -> Result<DataDict> {
    let path = path.as_ref();
    info!("Loading data dictionary from {:?}", path);
    let reader = BufReader::new(File::open(path)?);
    let data_dict: DataDict = bincode::deserialize_from(reader)?;
    info!(
        "Loaded {} subjects with {} windows",
        data_dict.len(),
        data_dict.total_windows()
    );
    Ok(data_dict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SubjectWindows;
    use ndarray::array;
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_paths() {
        let paths = CheckpointPaths::default();
        assert_eq!(paths.complete, PathBuf::from("data/data_dict.bin"));
        assert_eq!(paths.partial, PathBuf::from("data/data_dict_temp.bin"));

        let paths = CheckpointPaths::from_output("out/windows");
        assert_eq!(paths.partial, PathBuf::from("out/windows_temp"));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("data_dict.bin");

        let mut data_dict = DataDict::new(2, vec!["hr_0".to_string(), "hr_1".to_string()]);
        data_dict.insert(
            42,
            SubjectWindows {
                windows: array![[80.0, f32::NAN], [81.0, 82.0]],
                targets: vec![0, 1],
            },
        );

        save_data_dict(&data_dict, &path).unwrap();
        let loaded = load_data_dict(&path).unwrap();

        assert_eq!(loaded.window_size, 2);
        assert_eq!(loaded.columns, data_dict.columns);
        let windows = loaded.get(42).unwrap();
        assert_eq!(windows.targets, vec![0, 1]);
        assert_eq!(windows.windows[[1, 1]], 82.0);
        assert!(windows.windows[[0, 1]].is_nan());
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        assert!(load_data_dict(temp_dir.path().join("absent.bin")).is_err());
    }
}

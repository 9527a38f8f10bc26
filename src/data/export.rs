//! Writes split arrays to delimited text for external model training.

use crate::data::Dataset;
use crate::error::Result;
use csv::WriterBuilder;
use ndarray::{Array1, Array2};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Header of the label files
pub const LABEL_COLUMN: &str = "label";

/// Paths of the four files written by [`write_dataset`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFiles {
    pub x_train: PathBuf,
    pub x_test: PathBuf,
    pub y_train: PathBuf,
    pub y_test: PathBuf,
}

impl DatasetFiles {
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            x_train: dir.join("x_train.csv"),
            x_test: dir.join("x_test.csv"),
            y_train: dir.join("y_train.csv"),
            y_test: dir.join("y_test.csv"),
        }
    }
}

/// Write a feature matrix with one header row. Missing values are left empty.
pub fn write_features<P: AsRef<Path>>(x: &Array2<f32>, columns: &[String], path: P) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_path(path)?;
    wtr.write_record(columns)?;

    let mut record = Vec::with_capacity(columns.len());
    for row in x.rows() {
        record.clear();
        record.extend(row.iter().map(|v| if v.is_nan() { String::new() } else { v.to_string() }));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write a label vector under a `label` header
pub fn write_labels<P: AsRef<Path>>(y: &Array1<u8>, path: P) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_path(path)?;
    wtr.write_record([LABEL_COLUMN])?;
    for label in y {
        wtr.write_record([label.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write train and test arrays into `dir`
pub fn write_dataset<P: AsRef<Path>>(dataset: &Dataset, columns: &[String], dir: P) -> Result<DatasetFiles> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let files = DatasetFiles::in_dir(dir);

    write_features(&dataset.x_train, columns, &files.x_train)?;
    write_features(&dataset.x_test, columns, &files.x_test)?;
    write_labels(&dataset.y_train, &files.y_train)?;
    write_labels(&dataset.y_test, &files.y_test)?;

    info!(
        "Wrote {} train and {} test rows to {:?}",
        dataset.train_size(),
        dataset.test_size(),
        dir
    );
    Ok(files)
}

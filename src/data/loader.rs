use crate::config::ColumnConfig;
use crate::data::preprocessing::Cleaner;
use crate::data::{
    AdmissionOutcomes, Mortality, RawTimeline, RawTimelineRow, RawValue, SubjectId, TimelineFrame,
};
use crate::error::{PipelineError, Result};
use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Csv,
    Tsv,
    GzippedCsv,
    GzippedTsv,
}

impl FileFormat {
    /// Detect file format from path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str());
        let stem = path.file_stem().and_then(|s| s.to_str());

        match (ext, stem) {
            (Some("gz"), Some(stem)) if stem.ends_with(".csv") => Ok(FileFormat::GzippedCsv),
            (Some("gz"), Some(stem)) if stem.ends_with(".tsv") || stem.ends_with(".txt") => {
                Ok(FileFormat::GzippedTsv)
            }
            (Some("csv"), _) => Ok(FileFormat::Csv),
            (Some("tsv"), _) | (Some("txt"), _) => Ok(FileFormat::Tsv),
            _ => Err(PipelineError::InvalidParameter {
                name: "input path",
                reason: format!("unsupported file format: {:?}", path),
            }),
        }
    }

    /// Get delimiter character
    pub fn delimiter(&self) -> u8 {
        match self {
            FileFormat::Csv | FileFormat::GzippedCsv => b',',
            FileFormat::Tsv | FileFormat::GzippedTsv => b'\t',
        }
    }

    /// Check if format is gzipped
    pub fn is_gzipped(&self) -> bool {
        matches!(self, FileFormat::GzippedCsv | FileFormat::GzippedTsv)
    }
}

/// Data loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Rows between progress messages
    pub batch_size: usize,
    /// Maximum number of rows to load (0 = unlimited)
    pub max_records: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 100_000,
            max_records: 0,
        }
    }
}

/// Column positions resolved against a header row
struct Projection {
    indices: Vec<usize>,
}

impl Projection {
    /// Find each required column, failing on the first absent one
    fn resolve(headers: &csv::StringRecord, required: &[&str]) -> Result<Self> {
        let indices = required
            .iter()
            .map(|name| {
                headers
                    .iter()
                    .position(|h| h.trim() == *name)
                    .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { indices })
    }

    fn field<'r>(&self, record: &'r csv::StringRecord, position: usize) -> &'r str {
        record.get(self.indices[position]).unwrap_or("").trim()
    }
}

fn is_missing(field: &str) -> bool {
    field.is_empty() || field.eq_ignore_ascii_case("nan") || field.eq_ignore_ascii_case("na")
}

fn parse_f32(field: &str, column: &str, line: usize) -> Result<Option<f32>> {
    if is_missing(field) {
        return Ok(None);
    }
    field
        .parse::<f32>()
        .map(Some)
        .map_err(|_| PipelineError::InvalidValue {
            column: column.to_string(),
            line,
            value: field.to_string(),
        })
}

/// Subject ids may be written as integers or as whole floats ("123.0")
fn parse_subject_id(field: &str, column: &str, line: usize) -> Result<SubjectId> {
    field
        .parse::<SubjectId>()
        .ok()
        .or_else(|| {
            field
                .parse::<f64>()
                .ok()
                .filter(|v| v.fract() == 0.0 && *v >= 0.0)
                .map(|v| v as SubjectId)
        })
        .ok_or_else(|| PipelineError::InvalidValue {
            column: column.to_string(),
            line,
            value: field.to_string(),
        })
}

/// Reader for the timeline and admission outcome tables
pub struct DataLoader {
    config: LoaderConfig,
    columns: ColumnConfig,
}

impl DataLoader {
    /// Create new data loader for a column contract
    pub fn new(columns: ColumnConfig) -> Self {
        Self {
            config: LoaderConfig::default(),
            columns,
        }
    }

    /// Create new data loader with custom config
    pub fn with_config(columns: ColumnConfig, config: LoaderConfig) -> Self {
        Self { config, columns }
    }

    pub fn columns(&self) -> &ColumnConfig {
        &self.columns
    }

    fn open<P: AsRef<Path>>(&self, path: P) -> Result<(Box<dyn Read>, FileFormat)> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)?;
        debug!("Detected file format: {:?}", format);

        let file = File::open(path)?;
        let reader: Box<dyn Read> = if format.is_gzipped() {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok((reader, format))
    }

    /// Load and project the timeline table
    pub fn load_timeline<P: AsRef<Path>>(&self, path: P) -> Result<RawTimeline> {
        let path = path.as_ref();
        info!("Loading timeline from {:?}", path);
        let (reader, format) = self.open(path)?;
        let timeline = self.parse_timeline(reader, format)?;
        info!("Loaded {} timeline rows", timeline.rows.len());
        Ok(timeline)
    }

    /// Load the admission outcomes table
    pub fn load_outcomes<P: AsRef<Path>>(&self, path: P) -> Result<AdmissionOutcomes> {
        let path = path.as_ref();
        info!("Loading admission outcomes from {:?}", path);
        let (reader, format) = self.open(path)?;
        let outcomes = self.parse_outcomes(reader, format)?;
        info!("Loaded outcomes for {} subjects", outcomes.len());
        Ok(outcomes)
    }

    /// Parse timeline rows, keeping only the configured columns
    pub fn parse_timeline<R: Read>(&self, reader: R, format: FileFormat) -> Result<RawTimeline> {
        let mut csv_reader = ReaderBuilder::new()
            .delimiter(format.delimiter())
            .has_headers(true)
            .from_reader(reader);

        let mut required = vec![self.columns.subject.as_str(), self.columns.hours.as_str()];
        required.extend(self.columns.measurements.iter().map(String::as_str));
        let projection = Projection::resolve(csv_reader.headers()?, &required)?;
        debug!("Projected {} columns", required.len());

        let categorical: Vec<bool> = self
            .columns
            .measurements
            .iter()
            .map(|c| self.columns.gcs_scale(c).is_some())
            .collect();

        let mut rows = Vec::new();
        for (index, result) in csv_reader.records().enumerate() {
            let record = result?;
            let line = index + 2;

            let subject_id =
                parse_subject_id(projection.field(&record, 0), &self.columns.subject, line)?;
            let hours = parse_f32(projection.field(&record, 1), &self.columns.hours, line)?
                .ok_or_else(|| PipelineError::InvalidValue {
                    column: self.columns.hours.clone(),
                    line,
                    value: String::new(),
                })?;

            let values = self
                .columns
                .measurements
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    let field = projection.field(&record, i + 2);
                    if is_missing(field) {
                        Ok(RawValue::Missing)
                    } else if let Ok(v) = field.parse::<f32>() {
                        Ok(RawValue::Numeric(v))
                    } else if categorical[i] {
                        Ok(RawValue::Text(field.to_string()))
                    } else {
                        Err(PipelineError::InvalidValue {
                            column: column.clone(),
                            line,
                            value: field.to_string(),
                        })
                    }
                })
                .collect::<Result<Vec<_>>>()?;

            rows.push(RawTimelineRow {
                subject_id,
                hours,
                values,
            });

            if self.config.max_records > 0 && rows.len() >= self.config.max_records {
                warn!("Reached maximum record limit: {}", self.config.max_records);
                break;
            }
            if self.config.batch_size > 0 && rows.len() % self.config.batch_size == 0 {
                debug!("Loaded {} rows...", rows.len());
            }
        }

        Ok(RawTimeline {
            columns: self.columns.measurements.clone(),
            rows,
        })
    }

    /// Parse outcome records. Unreadable mortality values mark the subject invalid.
    pub fn parse_outcomes<R: Read>(&self, reader: R, format: FileFormat) -> Result<AdmissionOutcomes> {
        let mut csv_reader = ReaderBuilder::new()
            .delimiter(format.delimiter())
            .has_headers(true)
            .from_reader(reader);

        let required = [
            self.columns.outcome_subject.as_str(),
            self.columns.mortality.as_str(),
        ];
        let projection = Projection::resolve(csv_reader.headers()?, &required)?;

        let mut outcomes = AdmissionOutcomes::new();
        for (index, result) in csv_reader.records().enumerate() {
            let record = result?;
            let line = index + 2;

            let subject_id = parse_subject_id(
                projection.field(&record, 0),
                &self.columns.outcome_subject,
                line,
            )?;
            let mortality = projection
                .field(&record, 1)
                .parse::<f64>()
                .ok()
                .and_then(Mortality::from_value);
            if mortality.is_none() {
                debug!("Subject {} has no valid mortality status", subject_id);
            }
            outcomes.insert(subject_id, mortality);
        }

        Ok(outcomes)
    }
}

/// Load both tables and clean the timeline
pub fn load_dataframes<P: AsRef<Path>, Q: AsRef<Path>>(
    columns: &ColumnConfig,
    timeline_path: P,
    outcomes_path: Q,
) -> Result<(TimelineFrame, AdmissionOutcomes)> {
    info!("Loading dataframes");
    let loader = DataLoader::new(columns.clone());
    let raw = loader.load_timeline(timeline_path)?;
    let outcomes = loader.load_outcomes(outcomes_path)?;

    let timeline = Cleaner::new(columns)?.clean(raw)?;
    Ok((timeline, outcomes))
}

/// Load `label,score` rows produced by an external model
pub fn load_scores<P: AsRef<Path>>(path: P) -> Result<(Vec<u8>, Vec<f64>)> {
    let path = path.as_ref();
    info!("Loading scores from {:?}", path);
    let format = FileFormat::from_path(path)?;
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if format.is_gzipped() {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    parse_scores(reader, format)
}

fn parse_scores<R: Read>(reader: R, format: FileFormat) -> Result<(Vec<u8>, Vec<f64>)> {
    let mut csv_reader = ReaderBuilder::new()
        .delimiter(format.delimiter())
        .has_headers(true)
        .from_reader(reader);
    let projection = Projection::resolve(csv_reader.headers()?, &["label", "score"])?;

    let mut labels = Vec::new();
    let mut scores = Vec::new();
    for (index, result) in csv_reader.records().enumerate() {
        let record = result?;
        let line = index + 2;
        let invalid = |column: &str, value: &str| PipelineError::InvalidValue {
            column: column.to_string(),
            line,
            value: value.to_string(),
        };

        let label_field = projection.field(&record, 0);
        let label = label_field
            .parse::<f64>()
            .ok()
            .and_then(Mortality::from_value)
            .ok_or_else(|| invalid("label", label_field))?;
        let score_field = projection.field(&record, 1);
        let score = score_field
            .parse::<f64>()
            .ok()
            .filter(|s| s.is_finite())
            .ok_or_else(|| invalid("score", score_field))?;

        labels.push(label.label());
        scores.push(score);
    }
    Ok((labels, scores))
}

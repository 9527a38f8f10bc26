pub mod dictionary;
pub mod export;
pub mod feature_engineering;
pub mod gcs;
pub mod loader;
pub mod preprocessing;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Subject (admission) identifier
pub type SubjectId = u64;

/// Subject identifier column shared by both input tables
pub const SUBJECT_COLUMN: &str = "SUBJECT_ID";

/// Elapsed hours since admission
pub const HOURS_COLUMN: &str = "Hours";

/// Mortality flag in the admission outcomes table
pub const MORTALITY_COLUMN: &str = "MORTALITY";

/// Derived validity mask column
pub const MASK_COLUMN: &str = "mask";

/// Default number of timeline rows per window
pub const DEFAULT_WINDOW_SIZE: usize = 12;

pub const GCS_EYE_COLUMN: &str = "Glascow coma scale eye opening";
pub const GCS_MOTOR_COLUMN: &str = "Glascow coma scale motor response";
pub const GCS_VERBAL_COLUMN: &str = "Glascow coma scale verbal response";
pub const GCS_TOTAL_COLUMN: &str = "Glascow coma scale total";

/// Clinical measurement columns kept from the timeline table
pub const MEASUREMENT_COLUMNS: &[&str] = &[
    "Diastolic blood pressure",
    "Fraction inspired oxygen",
    GCS_EYE_COLUMN,
    GCS_MOTOR_COLUMN,
    GCS_TOTAL_COLUMN,
    GCS_VERBAL_COLUMN,
    "Glucose",
    "Heart Rate",
    "Mean blood pressure",
    "Oxygen saturation",
    "Respiratory rate",
    "Systolic blood pressure",
    "Temperature",
];

/// Columns that must all be present for a row to count as valid
pub const DEFAULT_MASK_COLUMNS: &[&str] = &[
    "Heart Rate",
    "Mean blood pressure",
    "Oxygen saturation",
    "Respiratory rate",
    GCS_TOTAL_COLUMN,
];

/// A timeline cell as read from disk, typed once at ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Missing,
    Numeric(f32),
    /// Categorical text such as `"4 Spontaneously"`
    Text(String),
}

/// One admission-hour observation before cleaning
#[derive(Debug, Clone, PartialEq)]
pub struct RawTimelineRow {
    pub subject_id: SubjectId,
    pub hours: f32,
    /// Values aligned with `RawTimeline::columns`
    pub values: Vec<RawValue>,
}

/// Projected but uncleaned timeline table
#[derive(Debug, Clone, Default)]
pub struct RawTimeline {
    pub columns: Vec<String>,
    pub rows: Vec<RawTimelineRow>,
}

/// One admission-hour observation after cleaning
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineRow {
    pub subject_id: SubjectId,
    pub hours: f32,
    /// Measurements aligned with `TimelineFrame::columns`
    pub values: Vec<Option<f32>>,
    /// 1 when none of the mask columns is missing
    pub mask: u8,
}

impl TimelineRow {
    /// Feature value at `index`, where `index == values.len()` addresses the mask.
    /// Missing measurements read as NaN.
    pub fn feature(&self, index: usize) -> f32 {
        if index == self.values.len() {
            f32::from(self.mask)
        } else {
            self.values[index].unwrap_or(f32::NAN)
        }
    }
}

/// Cleaned timeline table
#[derive(Debug, Clone, Default)]
pub struct TimelineFrame {
    pub columns: Vec<String>,
    pub rows: Vec<TimelineRow>,
}

impl TimelineFrame {
    /// Position of a measurement column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Names of every per-row feature: the measurements followed by the mask
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = self.columns.clone();
        names.push(MASK_COLUMN.to_string());
        names
    }

    /// Rows of each subject, in input order, keyed by ascending subject id
    pub fn group_by_subject(&self) -> BTreeMap<SubjectId, Vec<&TimelineRow>> {
        let mut groups: BTreeMap<SubjectId, Vec<&TimelineRow>> = BTreeMap::new();
        for row in &self.rows {
            groups.entry(row.subject_id).or_default().push(row);
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// In-hospital mortality outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mortality {
    Survived,
    Died,
}

impl Mortality {
    /// Interpret a raw outcome value; only 0 and 1 are valid
    pub fn from_value(value: f64) -> Option<Self> {
        if value == 0.0 {
            Some(Mortality::Survived)
        } else if value == 1.0 {
            Some(Mortality::Died)
        } else {
            None
        }
    }

    /// Binary label (0 survived, 1 died)
    pub fn label(&self) -> u8 {
        match self {
            Mortality::Survived => 0,
            Mortality::Died => 1,
        }
    }
}

/// Admission outcomes keyed by subject
#[derive(Debug, Clone, Default)]
pub struct AdmissionOutcomes {
    /// `None` marks a subject whose recorded outcome is not 0 or 1
    by_subject: HashMap<SubjectId, Option<Mortality>>,
}

impl AdmissionOutcomes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome. The first record of a subject wins.
    pub fn insert(&mut self, subject_id: SubjectId, mortality: Option<Mortality>) {
        self.by_subject.entry(subject_id).or_insert(mortality);
    }

    /// Valid mortality status of a subject, if any
    pub fn mortality(&self, subject_id: SubjectId) -> Option<Mortality> {
        self.by_subject.get(&subject_id).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_subject.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_subject.is_empty()
    }
}

impl FromIterator<(SubjectId, Option<Mortality>)> for AdmissionOutcomes {
    fn from_iter<I: IntoIterator<Item = (SubjectId, Option<Mortality>)>>(iter: I) -> Self {
        let mut outcomes = Self::new();
        for (subject_id, mortality) in iter {
            outcomes.insert(subject_id, mortality);
        }
        outcomes
    }
}

/// Flattened windows of one subject and their labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectWindows {
    /// One flattened window per row, in window-start order
    pub windows: Array2<f32>,
    /// One label per window
    pub targets: Vec<u8>,
}

impl SubjectWindows {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn positive_count(&self) -> usize {
        self.targets.iter().filter(|&&t| t == 1).count()
    }
}

/// Per-subject windows and labels produced by the dictionary builder.
///
/// Subjects are kept in ascending id order so that shuffles seeded with the
/// same value always start from the same sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDict {
    /// Rows per window
    pub window_size: usize,
    /// Flattened column names (`<measurement>_<timestep>`)
    pub columns: Vec<String>,
    /// Windows keyed by subject
    pub subjects: BTreeMap<SubjectId, SubjectWindows>,
}

impl DataDict {
    pub fn new(window_size: usize, columns: Vec<String>) -> Self {
        Self {
            window_size,
            columns,
            subjects: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, subject_id: SubjectId, windows: SubjectWindows) {
        self.subjects.insert(subject_id, windows);
    }

    pub fn get(&self, subject_id: SubjectId) -> Option<&SubjectWindows> {
        self.subjects.get(&subject_id)
    }

    pub fn subject_ids(&self) -> Vec<SubjectId> {
        self.subjects.keys().copied().collect()
    }

    /// Number of flattened feature columns
    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    /// Number of subjects
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Total number of windows across subjects
    pub fn total_windows(&self) -> usize {
        self.subjects.values().map(SubjectWindows::len).sum()
    }

    /// Number of windows carrying label 1
    pub fn positive_windows(&self) -> usize {
        self.subjects.values().map(SubjectWindows::positive_count).sum()
    }
}

/// Granularity at which a subset is drawn before training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubsetLevel {
    /// Keep a fraction of the subjects
    #[default]
    Admission,
    /// Keep a fraction of each subject's windows
    Window,
}

impl SubsetLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubsetLevel::Admission => "admission",
            SubsetLevel::Window => "window",
        }
    }
}

impl FromStr for SubsetLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admission" | "subject" => Ok(SubsetLevel::Admission),
            "window" => Ok(SubsetLevel::Window),
            other => Err(format!(
                "unknown subset level '{}', expected 'admission' or 'window'",
                other
            )),
        }
    }
}

impl fmt::Display for SubsetLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Train/test split configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Fraction of subjects assigned to training
    pub split_ratio: f64,
    /// Shuffle and subsampling seed
    pub seed: u64,
    /// Fraction of data kept (1 keeps everything)
    pub subset_proportion: f64,
    /// Whether the subset is drawn over subjects or windows
    pub subset_level: SubsetLevel,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            split_ratio: 0.7,
            seed: 123,
            subset_proportion: 1.0,
            subset_level: SubsetLevel::Admission,
        }
    }
}

impl SplitConfig {
    /// Check ratios are in range
    pub fn validate(&self) -> crate::error::Result<()> {
        crate::utils::validation::open_unit("split_ratio", self.split_ratio)?;
        crate::utils::validation::half_open_unit("subset_proportion", self.subset_proportion)?;
        Ok(())
    }
}

/// Feature matrices and label vectors for training and testing
#[derive(Debug, Clone)]
pub struct Dataset {
    pub x_train: Array2<f32>,
    pub x_test: Array2<f32>,
    pub y_train: Array1<u8>,
    pub y_test: Array1<u8>,
    /// Subjects assigned to training, in shuffled order
    pub train_subjects: Vec<SubjectId>,
    /// Subjects assigned to testing, in shuffled order
    pub test_subjects: Vec<SubjectId>,
}

impl Dataset {
    pub fn train_size(&self) -> usize {
        self.x_train.nrows()
    }

    pub fn test_size(&self) -> usize {
        self.x_test.nrows()
    }

    /// Share of windows that ended up in training
    pub fn achieved_ratio(&self) -> f64 {
        let total = self.train_size() + self.test_size();
        if total == 0 {
            0.0
        } else {
            self.train_size() as f64 / total as f64
        }
    }

    /// Positive labels in (train, test)
    pub fn positive_counts(&self) -> (usize, usize) {
        let count = |y: &Array1<u8>| y.iter().filter(|&&t| t == 1).count();
        (count(&self.y_train), count(&self.y_test))
    }
}

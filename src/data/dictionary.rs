//! Builds the per-subject data dictionary of flattened windows and labels.

use crate::checkpoint::{save_data_dict, CheckpointPaths};
use crate::config::WindowConfig;
use crate::data::feature_engineering::WindowReshaper;
use crate::data::{AdmissionOutcomes, DataDict, Mortality, SubjectWindows, TimelineFrame, TimelineRow};
use crate::error::{PipelineError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a dictionary build
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    /// Every subject was processed
    Complete(DataDict),
    /// The interrupt flag was raised; holds the subjects finished so far
    Interrupted(DataDict),
}

impl BuildOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, BuildOutcome::Complete(_))
    }

    pub fn data_dict(&self) -> &DataDict {
        match self {
            BuildOutcome::Complete(d) | BuildOutcome::Interrupted(d) => d,
        }
    }

    pub fn into_inner(self) -> DataDict {
        match self {
            BuildOutcome::Complete(d) | BuildOutcome::Interrupted(d) => d,
        }
    }
}

/// Windows and labels for one subject's timeline.
///
/// A window starts at every offset `i` with `i + window_size < len`, so a
/// timeline of `window_size + k` rows yields `k` windows. Only the window
/// ending one row before the final row carries the mortality label.
/// Returns `None` when no window fits.
pub fn subject_windows(
    timeline: &[&TimelineRow],
    mortality: Mortality,
    reshaper: &WindowReshaper,
) -> Result<Option<SubjectWindows>> {
    let window_size = reshaper.window_size();
    let len = timeline.len();
    if len <= window_size {
        return Ok(None);
    }

    let n_windows = len - window_size;
    let mut flat = Vec::with_capacity(n_windows * reshaper.width());
    let mut targets = Vec::with_capacity(n_windows);

    for start in 0..n_windows {
        let end = start + window_size;
        flat.extend(reshaper.reshape(&timeline[start..end])?);
        targets.push(if end == len - 1 { mortality.label() } else { 0 });
    }

    let windows = Array2::from_shape_vec((n_windows, reshaper.width()), flat)?;
    Ok(Some(SubjectWindows { windows, targets }))
}

/// Polled before each subject; `true` stops the build
pub type StopCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// Walks every subject of a cleaned timeline and collects its windows
pub struct DataDictBuilder {
    window: WindowConfig,
    stop: Option<StopCheck>,
    show_progress: bool,
}

impl DataDictBuilder {
    pub fn new(window: WindowConfig) -> Self {
        Self {
            window,
            stop: None,
            show_progress: false,
        }
    }

    /// Stop between subjects once `flag` is set
    pub fn with_interrupt(self, flag: Arc<AtomicBool>) -> Self {
        self.with_stop_check(move || flag.load(Ordering::SeqCst))
    }

    /// Stop between subjects once `check` returns true
    pub fn with_stop_check<F>(mut self, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.stop = Some(Box::new(check));
        self
    }

    /// Draw a progress bar over subjects
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn interrupted(&self) -> bool {
        self.stop.as_ref().is_some_and(|check| check())
    }

    /// Build the data dictionary.
    ///
    /// Subjects without a valid outcome or with too short a timeline are skipped.
    pub fn build(&self, timeline: &TimelineFrame, outcomes: &AdmissionOutcomes) -> Result<BuildOutcome> {
        crate::utils::validation::positive("window_size", self.window.window_size)?;

        let reshaper = WindowReshaper::new(&timeline.feature_names(), self.window.window_size);
        let mut data_dict = DataDict::new(self.window.window_size, reshaper.column_names());
        let groups = timeline.group_by_subject();

        let progress = if self.show_progress {
            let bar = ProgressBar::new(groups.len() as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} subjects")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        info!("Transforming..");
        let (mut no_outcome, mut too_short) = (0usize, 0usize);

        for (&subject_id, rows) in &groups {
            if self.interrupted() {
                progress.abandon();
                warn!(
                    "Interrupted after {} of {} subjects",
                    data_dict.len(),
                    groups.len()
                );
                return Ok(BuildOutcome::Interrupted(data_dict));
            }
            progress.inc(1);

            let Some(mortality) = outcomes.mortality(subject_id) else {
                debug!("Skipping subject {}: no valid mortality status", subject_id);
                no_outcome += 1;
                continue;
            };

            match subject_windows(rows, mortality, &reshaper)? {
                Some(windows) => data_dict.insert(subject_id, windows),
                None => {
                    debug!(
                        "Skipping subject {}: {} rows, window size {}",
                        subject_id,
                        rows.len(),
                        self.window.window_size
                    );
                    too_short += 1;
                }
            }
        }
        progress.finish_and_clear();

        info!(
            "Built {} subjects with {} windows ({} positive); skipped {} without outcome, {} too short",
            data_dict.len(),
            data_dict.total_windows(),
            data_dict.positive_windows(),
            no_outcome,
            too_short
        );
        Ok(BuildOutcome::Complete(data_dict))
    }
}

/// Build the data dictionary and persist it.
///
/// A complete build goes to `paths.complete`. On interruption the partial
/// dictionary goes to `paths.partial` and the run fails with
/// [`PipelineError::Interrupted`].
pub fn generate_data_dict(
    builder: &DataDictBuilder,
    timeline: &TimelineFrame,
    outcomes: &AdmissionOutcomes,
    paths: &CheckpointPaths,
) -> Result<DataDict> {
    match builder.build(timeline, outcomes)? {
        BuildOutcome::Complete(data_dict) => {
            info!("Storing data_dict in {:?}..", paths.complete);
            save_data_dict(&data_dict, &paths.complete)?;
            Ok(data_dict)
        }
        BuildOutcome::Interrupted(data_dict) => {
            warn!("Storing partial data_dict in {:?}..", paths.partial);
            save_data_dict(&data_dict, &paths.partial)?;
            Err(PipelineError::Interrupted {
                subjects: data_dict.len(),
                path: paths.partial.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::load_data_dict;
    use crate::data::SubjectId;

    /// Timeline with one measurement column "hr" whose value is the row position
    fn timeline(lengths: &[(SubjectId, usize)]) -> TimelineFrame {
        let rows = lengths
            .iter()
            .flat_map(|&(subject_id, len)| {
                (0..len).map(move |i| TimelineRow {
                    subject_id,
                    hours: i as f32,
                    values: vec![Some(i as f32)],
                    mask: 1,
                })
            })
            .collect();
        TimelineFrame {
            columns: vec!["hr".to_string()],
            rows,
        }
    }

    fn outcomes(entries: &[(SubjectId, Option<Mortality>)]) -> AdmissionOutcomes {
        entries.iter().copied().collect()
    }

    fn builder(window_size: usize) -> DataDictBuilder {
        DataDictBuilder::new(WindowConfig { window_size })
    }

    #[test]
    fn test_fifteen_rows_window_twelve() {
        let frame = timeline(&[(1, 15)]);
        let outcome = builder(12)
            .build(&frame, &outcomes(&[(1, Some(Mortality::Died))]))
            .unwrap();
        assert!(outcome.is_complete());

        let dict = outcome.into_inner();
        let windows = dict.get(1).unwrap();
        assert_eq!(windows.targets, vec![0, 0, 1]);
        assert_eq!(windows.windows.dim(), (3, 24));
        // window starting at offset 2: first "hr" value is row 2
        assert_eq!(windows.windows[[2, 0]], 2.0);
        assert_eq!(dict.columns[0], "hr_0");
        assert_eq!(dict.columns[1], "mask_0");
        assert_eq!(dict.columns[23], "mask_11");
    }

    #[test]
    fn test_k_extra_rows_give_k_windows() {
        let reshaper = WindowReshaper::new(&["hr".to_string(), "mask".to_string()], 4);
        for k in 1..6 {
            let frame = timeline(&[(1, 4 + k)]);
            let rows: Vec<&TimelineRow> = frame.rows.iter().collect();
            let windows = subject_windows(&rows, Mortality::Died, &reshaper)
                .unwrap()
                .unwrap();
            assert_eq!(windows.len(), k);
            assert_eq!(windows.positive_count(), 1);
            assert_eq!(*windows.targets.last().unwrap(), 1);
        }
    }

    #[test]
    fn test_survivor_windows_are_all_negative() {
        let frame = timeline(&[(1, 8)]);
        let dict = builder(3)
            .build(&frame, &outcomes(&[(1, Some(Mortality::Survived))]))
            .unwrap()
            .into_inner();
        assert_eq!(dict.get(1).unwrap().targets, vec![0; 5]);
    }

    #[test]
    fn test_subjects_skipped() {
        let frame = timeline(&[(1, 12), (2, 11), (3, 14), (4, 14), (5, 13)]);
        let outcomes = outcomes(&[
            (1, Some(Mortality::Died)),
            (2, Some(Mortality::Died)),
            (3, None),
            (5, Some(Mortality::Survived)),
        ]);
        let dict = builder(12).build(&frame, &outcomes).unwrap().into_inner();

        // 1: exactly window_size rows, 2: too short, 3: invalid outcome, 4: no outcome
        assert_eq!(dict.subject_ids(), vec![5]);
        assert_eq!(dict.get(5).unwrap().targets, vec![0]);
    }

    #[test]
    fn test_same_columns_for_every_subject() {
        let frame = timeline(&[(1, 6), (2, 9)]);
        let outcomes = outcomes(&[(1, Some(Mortality::Died)), (2, Some(Mortality::Survived))]);
        let dict = builder(4).build(&frame, &outcomes).unwrap().into_inner();

        for windows in dict.subjects.values() {
            assert_eq!(windows.windows.ncols(), dict.n_features());
            assert_eq!(windows.windows.nrows(), windows.targets.len());
        }
        assert_eq!(dict.total_windows(), 2 + 5);
    }

    #[test]
    fn test_interrupt_keeps_partial_progress() {
        let frame = timeline(&[(1, 6), (2, 6)]);
        let outcomes = outcomes(&[(1, Some(Mortality::Died)), (2, Some(Mortality::Died))]);
        let flag = Arc::new(AtomicBool::new(true));

        let outcome = builder(4)
            .with_interrupt(flag)
            .build(&frame, &outcomes)
            .unwrap();
        assert!(!outcome.is_complete());
        assert!(outcome.data_dict().is_empty());
    }

    /// Stop check that lets `n` subjects through
    fn stop_after(n: usize) -> impl Fn() -> bool + Send + Sync + 'static {
        let polls = std::sync::atomic::AtomicUsize::new(0);
        move || polls.fetch_add(1, Ordering::SeqCst) >= n
    }

    #[test]
    fn test_interrupt_mid_build_persists_completed_subjects() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let paths = CheckpointPaths::from_output(temp_dir.path().join("data_dict.bin"));
        let frame = timeline(&[(3, 7), (1, 6), (2, 5)]);
        let outcomes = outcomes(&[
            (1, Some(Mortality::Died)),
            (2, Some(Mortality::Survived)),
            (3, Some(Mortality::Died)),
        ]);
        let full = builder(4).build(&frame, &outcomes).unwrap().into_inner();

        let interrupted = builder(4).with_stop_check(stop_after(2));
        let err = generate_data_dict(&interrupted, &frame, &outcomes, &paths).unwrap_err();
        assert!(matches!(err, PipelineError::Interrupted { subjects: 2, .. }));
        assert!(!paths.complete.exists());

        let partial = load_data_dict(&paths.partial).unwrap();
        assert_eq!(partial.subject_ids(), vec![1, 2]);
        assert_eq!(partial.columns, full.columns);
        assert_eq!(partial.get(1), full.get(1));
        assert_eq!(partial.get(2), full.get(2));
        assert_eq!(partial.get(1).unwrap().targets, vec![0, 1]);
        assert_eq!(partial.get(2).unwrap().targets, vec![0]);
    }

    #[test]
    fn test_generate_data_dict_writes_checkpoints() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let paths = CheckpointPaths::from_output(temp_dir.path().join("data_dict.bin"));
        let frame = timeline(&[(1, 6)]);
        let outcomes = outcomes(&[(1, Some(Mortality::Died))]);

        let dict = generate_data_dict(&builder(4), &frame, &outcomes, &paths).unwrap();
        assert_eq!(load_data_dict(&paths.complete).unwrap(), dict);
        assert!(!paths.partial.exists());

        let interrupted = builder(4).with_interrupt(Arc::new(AtomicBool::new(true)));
        let err = generate_data_dict(&interrupted, &frame, &outcomes, &paths).unwrap_err();
        assert!(matches!(err, PipelineError::Interrupted { subjects: 0, .. }));
        assert!(load_data_dict(&paths.partial).unwrap().is_empty());
    }
}

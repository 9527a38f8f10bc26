use crate::config::ColumnConfig;
use crate::data::gcs::SuffixNormalizer;
use crate::data::{
    DataDict, Dataset, RawTimeline, RawValue, SplitConfig, SubjectId, SubjectWindows,
    SubsetLevel, TimelineFrame, TimelineRow,
};
use crate::error::{PipelineError, Result};
use crate::utils::{random::seeded_rng, round_half_even};
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use tracing::{debug, info};

/// Turns a raw timeline into a cleaned one: GCS normalization,
/// forward-fill and the validity mask.
pub struct Cleaner {
    columns: ColumnConfig,
}

impl Cleaner {
    /// Create a cleaner for a validated column contract
    pub fn new(columns: &ColumnConfig) -> Result<Self> {
        columns.validate()?;
        Ok(Self {
            columns: columns.clone(),
        })
    }

    /// Run every cleaning step
    pub fn clean(&self, raw: RawTimeline) -> Result<TimelineFrame> {
        let resolve = |names: &[String]| -> Result<Vec<usize>> {
            names
                .iter()
                .map(|name| {
                    raw.columns
                        .iter()
                        .position(|c| c == name)
                        .ok_or_else(|| PipelineError::MissingColumn(name.clone()))
                })
                .collect()
        };
        let ffill = resolve(&self.columns.ffill)?;
        let mask = resolve(&self.columns.mask)?;

        let normalizers: Vec<Option<SuffixNormalizer>> = raw
            .columns
            .iter()
            .map(|c| {
                self.columns
                    .gcs_scale(c)
                    .map(|scale| SuffixNormalizer::for_scale(c.clone(), scale))
            })
            .collect();

        info!("Replacing GCS..");
        let mut frame = normalize_gcs(raw, &normalizers)?;

        info!("Forward-filling {} columns", ffill.len());
        forward_fill(&mut frame.rows, &ffill, self.columns.ffill_per_subject);

        info!("Computing validity mask");
        compute_mask(&mut frame.rows, &mask);
        let valid = frame.rows.iter().filter(|r| r.mask == 1).count();
        debug!("{} of {} rows are valid", valid, frame.rows.len());

        Ok(frame)
    }
}

/// Convert raw cells to numbers. `normalizers[i]` handles column `i` when it is categorical.
pub fn normalize_gcs(
    raw: RawTimeline,
    normalizers: &[Option<SuffixNormalizer>],
) -> Result<TimelineFrame> {
    let mut rows = Vec::with_capacity(raw.rows.len());

    for (index, raw_row) in raw.rows.into_iter().enumerate() {
        let values = raw_row
            .values
            .iter()
            .enumerate()
            .map(|(i, value)| match (normalizers.get(i).and_then(Option::as_ref), value) {
                (Some(normalizer), _) => normalizer.normalize(value),
                (None, RawValue::Missing) => Ok(None),
                (None, RawValue::Numeric(v)) => Ok(Some(*v)),
                (None, RawValue::Text(text)) => Err(PipelineError::InvalidValue {
                    column: raw.columns[i].clone(),
                    line: index + 2,
                    value: text.clone(),
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        rows.push(TimelineRow {
            subject_id: raw_row.subject_id,
            hours: raw_row.hours,
            values,
            mask: 0,
        });
    }

    Ok(TimelineFrame {
        columns: raw.columns,
        rows,
    })
}

/// Propagate the last observed value of each column downward.
///
/// With `per_subject` the carried value never crosses into another subject.
pub fn forward_fill(rows: &mut [TimelineRow], columns: &[usize], per_subject: bool) {
    let mut carried: HashMap<Option<SubjectId>, Vec<Option<f32>>> = HashMap::new();

    for row in rows.iter_mut() {
        let key = per_subject.then_some(row.subject_id);
        let last = carried.entry(key).or_insert_with(|| vec![None; columns.len()]);

        for (slot, &column) in last.iter_mut().zip(columns) {
            match row.values[column] {
                Some(v) => *slot = Some(v),
                None => row.values[column] = *slot,
            }
        }
    }
}

/// Set `mask` to 1 when none of `columns` is missing
pub fn compute_mask(rows: &mut [TimelineRow], columns: &[usize]) {
    for row in rows.iter_mut() {
        let complete = columns.iter().all(|&c| row.values[c].is_some());
        row.mask = u8::from(complete);
    }
}

/// Thins one subject's windows while always keeping the final, label-bearing one
#[derive(Debug, Clone, Copy)]
pub struct WindowSubsampler {
    proportion: f64,
    seed: u64,
}

impl WindowSubsampler {
    pub fn new(proportion: f64, seed: u64) -> Self {
        Self { proportion, seed }
    }

    /// Row indices to keep for a subject with `n` windows.
    ///
    /// `round((n - 1) * proportion)` indices are drawn with replacement from
    /// every row but the last, sorted, and followed by the last row.
    pub fn sample_indices(&self, n: usize) -> Vec<usize> {
        if n == 0 {
            return Vec::new();
        }
        let pool = n - 1;
        let draws = round_half_even(pool as f64 * self.proportion);

        let mut rng = seeded_rng(self.seed);
        let mut indices: Vec<usize> = (0..draws).map(|_| rng.gen_range(0..pool)).collect();
        indices.sort_unstable();
        indices.push(pool);
        indices
    }

    /// Subsampled copy of a subject's windows and labels
    pub fn subsample(&self, subject: &SubjectWindows) -> SubjectWindows {
        let indices = self.sample_indices(subject.len());
        SubjectWindows {
            windows: subject.windows.select(Axis(0), &indices),
            targets: indices.iter().map(|&i| subject.targets[i]).collect(),
        }
    }
}

/// Stack the windows and labels of `subjects` into a feature matrix and label vector
pub fn get_arrays(
    data_dict: &DataDict,
    subjects: &[SubjectId],
    subsampler: Option<&WindowSubsampler>,
) -> Result<(Array2<f32>, Array1<u8>)> {
    let mut features = Vec::new();
    let mut targets = Vec::new();

    for &subject_id in subjects {
        let windows = data_dict
            .get(subject_id)
            .ok_or(PipelineError::UnknownSubject(subject_id))?;

        match subsampler {
            Some(subsampler) => {
                let thinned = subsampler.subsample(windows);
                features.extend(thinned.windows.iter().copied());
                targets.extend(thinned.targets);
            }
            None => {
                features.extend(windows.windows.iter().copied());
                targets.extend_from_slice(&windows.targets);
            }
        }
    }

    let x = Array2::from_shape_vec((targets.len(), data_dict.n_features()), features)?;
    Ok((x, Array1::from(targets)))
}

/// Split subjects into train and test sets.
///
/// Subjects are shuffled with `config.seed`, so the same seed always gives the
/// same partition. Windows of one subject never end up on both sides.
pub fn train_test_split(data_dict: &DataDict, config: &SplitConfig) -> Result<Dataset> {
    config.validate()?;

    let mut subjects = data_dict.subject_ids();
    let mut rng = seeded_rng(config.seed);
    subjects.shuffle(&mut rng);
    info!("Random seed: {}", config.seed);
    info!("Split ratio: {}", config.split_ratio);

    let subsampler = match config.subset_level {
        SubsetLevel::Admission => {
            if config.subset_proportion < 1.0 {
                let keep = round_half_even(subjects.len() as f64 * config.subset_proportion);
                subjects.truncate(keep);
                info!(
                    "Subset proportion {}: keeping {} admissions",
                    config.subset_proportion, keep
                );
            }
            None
        }
        SubsetLevel::Window => {
            if config.subset_proportion < 1.0 {
                info!(
                    "Subset proportion {}: thinning windows within each admission",
                    config.subset_proportion
                );
                Some(WindowSubsampler::new(config.subset_proportion, config.seed))
            } else {
                None
            }
        }
    };

    let split_index = round_half_even(subjects.len() as f64 * config.split_ratio);
    let test_subjects = subjects.split_off(split_index);
    let train_subjects = subjects;

    let (x_train, y_train) = get_arrays(data_dict, &train_subjects, subsampler.as_ref())?;
    let (x_test, y_test) = get_arrays(data_dict, &test_subjects, subsampler.as_ref())?;

    let dataset = Dataset {
        x_train,
        x_test,
        y_train,
        y_test,
        train_subjects,
        test_subjects,
    };

    info!(
        "Completed train test split.. Train size: {} Test size: {} Final split ratio: {:.4}",
        dataset.train_size(),
        dataset.test_size(),
        dataset.achieved_ratio()
    );
    let (train_pos, test_pos) = dataset.positive_counts();
    info!(
        "Train distribution: positive={}, negative={}",
        train_pos,
        dataset.train_size() - train_pos
    );
    info!(
        "Test distribution: positive={}, negative={}",
        test_pos,
        dataset.test_size() - test_pos
    );

    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnConfig, GcsColumn};
    use crate::data::gcs::GcsScale;
    use crate::data::RawTimelineRow;
    use ndarray::array;

    fn raw_row(subject_id: SubjectId, values: Vec<RawValue>) -> RawTimelineRow {
        RawTimelineRow {
            subject_id,
            hours: 0.0,
            values,
        }
    }

    fn columns() -> ColumnConfig {
        ColumnConfig {
            measurements: vec!["hr".to_string(), "eye".to_string()],
            gcs: vec![GcsColumn {
                column: "eye".to_string(),
                scale: GcsScale::EyeOpening,
            }],
            ffill: vec!["hr".to_string()],
            mask: vec!["hr".to_string(), "eye".to_string()],
            ..ColumnConfig::default()
        }
    }

    fn raw_timeline() -> RawTimeline {
        RawTimeline {
            columns: vec!["hr".to_string(), "eye".to_string()],
            rows: vec![
                raw_row(1, vec![RawValue::Numeric(80.0), RawValue::Text("4 Spontaneously".into())]),
                raw_row(1, vec![RawValue::Missing, RawValue::Missing]),
                raw_row(2, vec![RawValue::Missing, RawValue::Numeric(3.0)]),
                raw_row(2, vec![RawValue::Numeric(90.0), RawValue::Text("2 To pain".into())]),
            ],
        }
    }

    /// Data dictionary where subject `id` has `id` windows of width 2,
    /// row `r` holding `[id, r]`, with the last window labeled 1
    fn dictionary(ids: &[SubjectId]) -> DataDict {
        let mut dict = DataDict::new(1, vec!["a_0".to_string(), "b_0".to_string()]);
        for &id in ids {
            let n = id as usize;
            let windows = Array2::from_shape_fn((n, 2), |(r, c)| if c == 0 { id as f32 } else { r as f32 });
            let mut targets = vec![0; n];
            targets[n - 1] = 1;
            dict.insert(id, SubjectWindows { windows, targets });
        }
        dict
    }

    #[test]
    fn test_clean_pipeline() {
        let frame = Cleaner::new(&columns()).unwrap().clean(raw_timeline()).unwrap();

        assert_eq!(frame.rows[0].values, vec![Some(80.0), Some(4.0)]);
        // hr carried within subject 1, eye is not forward-filled
        assert_eq!(frame.rows[1].values, vec![Some(80.0), None]);
        // subject 2 does not inherit subject 1's heart rate
        assert_eq!(frame.rows[2].values, vec![None, Some(3.0)]);
        assert_eq!(frame.rows[3].values, vec![Some(90.0), Some(2.0)]);

        let masks: Vec<u8> = frame.rows.iter().map(|r| r.mask).collect();
        assert_eq!(masks, vec![1, 0, 0, 1]);
    }

    #[test]
    fn test_global_forward_fill_crosses_subjects() {
        let mut columns = columns();
        columns.ffill_per_subject = false;
        let frame = Cleaner::new(&columns).unwrap().clean(raw_timeline()).unwrap();
        assert_eq!(frame.rows[2].values[0], Some(80.0));
    }

    #[test]
    fn test_cleaner_rejects_unknown_descriptor() {
        let mut raw = raw_timeline();
        raw.rows[0].values[1] = RawValue::Text("4 Eyes open".into());
        let err = Cleaner::new(&columns()).unwrap().clean(raw).unwrap_err();
        assert!(matches!(err, PipelineError::GcsParse { .. }));
    }

    #[test]
    fn test_subsampler_keeps_last_row() {
        let subsampler = WindowSubsampler::new(0.5, 123);
        for n in 1..30 {
            let indices = subsampler.sample_indices(n);
            assert_eq!(indices.len(), round_half_even((n - 1) as f64 * 0.5) + 1);
            assert_eq!(*indices.last().unwrap(), n - 1);
            assert!(indices[..indices.len() - 1].iter().all(|&i| i < n - 1));
            assert!(indices.windows(2).all(|w| w[0] <= w[1]));
        }
        assert!(subsampler.sample_indices(0).is_empty());
    }

    #[test]
    fn test_subsample_rows_and_labels_align() {
        let dict = dictionary(&[9]);
        let thinned = WindowSubsampler::new(0.5, 7).subsample(dict.get(9).unwrap());

        assert_eq!(thinned.windows.nrows(), thinned.targets.len());
        assert_eq!(thinned.targets.len(), 5);
        assert_eq!(*thinned.targets.last().unwrap(), 1);
        assert_eq!(thinned.windows.row(4).to_vec(), vec![9.0, 8.0]);
        for (row, &target) in thinned.windows.outer_iter().zip(&thinned.targets[..4]) {
            assert!(row[1] < 8.0);
            assert_eq!(target, 0);
        }
    }

    #[test]
    fn test_get_arrays_concatenates_in_order() {
        let dict = dictionary(&[2, 3]);
        let (x, y) = get_arrays(&dict, &[3, 2], None).unwrap();

        assert_eq!(x.dim(), (5, 2));
        assert_eq!(y.len(), 5);
        assert_eq!(x.row(0).to_vec(), vec![3.0, 0.0]);
        assert_eq!(x.row(3).to_vec(), vec![2.0, 0.0]);
        assert_eq!(y, array![0u8, 0, 1, 0, 1]);

        let (x, y) = get_arrays(&dict, &[], None).unwrap();
        assert_eq!(x.dim(), (0, 2));
        assert!(y.is_empty());

        assert!(matches!(
            get_arrays(&dict, &[4], None),
            Err(PipelineError::UnknownSubject(4))
        ));
    }

    #[test]
    fn test_train_test_split_is_reproducible() {
        let dict = dictionary(&(1..=10).collect::<Vec<_>>());
        let config = SplitConfig::default();

        let a = train_test_split(&dict, &config).unwrap();
        let b = train_test_split(&dict, &config).unwrap();

        assert_eq!(a.train_subjects, b.train_subjects);
        assert_eq!(a.x_train, b.x_train);
        assert_eq!(a.train_subjects.len(), 7);
        assert_eq!(a.test_subjects.len(), 3);
        assert_eq!(a.x_train.nrows(), a.y_train.len());
        assert_eq!(a.x_test.nrows(), a.y_test.len());
        assert_eq!(a.train_size() + a.test_size(), dict.total_windows());

        let mut all: Vec<_> = a.train_subjects.iter().chain(&a.test_subjects).copied().collect();
        all.sort_unstable();
        assert_eq!(all, dict.subject_ids());
    }

    #[test]
    fn test_admission_subset_truncates_before_split() {
        let dict = dictionary(&(1..=10).collect::<Vec<_>>());
        let config = SplitConfig {
            subset_proportion: 0.5,
            ..SplitConfig::default()
        };
        let dataset = train_test_split(&dict, &config).unwrap();

        // 5 subjects kept, round(5 * 0.7) = 4 to training
        assert_eq!(dataset.train_subjects.len(), 4);
        assert_eq!(dataset.test_subjects.len(), 1);

        let full = train_test_split(&dict, &SplitConfig::default()).unwrap();
        let shuffled: Vec<_> = full.train_subjects.iter().chain(&full.test_subjects).copied().collect();
        let kept: Vec<_> = dataset.train_subjects.iter().chain(&dataset.test_subjects).copied().collect();
        assert_eq!(kept, shuffled[..5].to_vec());
    }

    #[test]
    fn test_window_subset_thins_every_subject() {
        let dict = dictionary(&(1..=10).collect::<Vec<_>>());
        let config = SplitConfig {
            subset_proportion: 0.5,
            subset_level: SubsetLevel::Window,
            ..SplitConfig::default()
        };
        let a = train_test_split(&dict, &config).unwrap();
        let b = train_test_split(&dict, &config).unwrap();

        assert_eq!(a.x_train, b.x_train);
        assert_eq!(a.x_test, b.x_test);
        assert_eq!(a.train_subjects.len(), 7);

        let expected: usize = a
            .train_subjects
            .iter()
            .map(|&id| round_half_even((id - 1) as f64 * 0.5) + 1)
            .sum();
        assert_eq!(a.train_size(), expected);
        // every subject keeps its positive window
        assert_eq!(a.positive_counts().0, a.train_subjects.len());
    }

    #[test]
    fn test_split_rejects_invalid_ratio() {
        let dict = dictionary(&[1, 2]);
        let config = SplitConfig {
            split_ratio: 0.0,
            ..SplitConfig::default()
        };
        assert!(matches!(
            train_test_split(&dict, &config),
            Err(PipelineError::InvalidParameter { name: "split_ratio", .. })
        ));
    }
}

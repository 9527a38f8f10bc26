//! Window flattening: a `window_size x n_features` slice of one subject's
//! timeline becomes a single wide feature row.

use crate::data::TimelineRow;
use crate::error::{PipelineError, Result};

/// Flattens fixed-length windows into rows with a stable column layout.
///
/// Output columns are named `<feature>_<timestep>` and ordered by timestep,
/// then by feature name, so every window of every subject shares one layout.
#[derive(Debug, Clone)]
pub struct WindowReshaper {
    window_size: usize,
    /// Feature positions within a `TimelineRow`, in name order
    order: Vec<usize>,
    /// Feature names in name order
    names: Vec<String>,
}

impl WindowReshaper {
    /// `feature_names` addresses `TimelineRow::feature` by position
    pub fn new(feature_names: &[String], window_size: usize) -> Self {
        let mut order: Vec<usize> = (0..feature_names.len()).collect();
        order.sort_by(|&a, &b| feature_names[a].cmp(&feature_names[b]));
        let names = order.iter().map(|&i| feature_names[i].clone()).collect();

        Self {
            window_size,
            order,
            names,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Number of values in a flattened window
    pub fn width(&self) -> usize {
        self.window_size * self.names.len()
    }

    /// Flattened column names
    pub fn column_names(&self) -> Vec<String> {
        (0..self.window_size)
            .flat_map(|t| self.names.iter().map(move |name| format!("{}_{}", name, t)))
            .collect()
    }

    /// Flatten one window. Rows take timestep indices by position, not by hour.
    pub fn reshape(&self, window: &[&TimelineRow]) -> Result<Vec<f32>> {
        if window.len() != self.window_size {
            return Err(PipelineError::WindowLength {
                expected: self.window_size,
                found: window.len(),
            });
        }

        let mut flat = Vec::with_capacity(self.width());
        for row in window {
            flat.extend(self.order.iter().map(|&feature| row.feature(feature)));
        }
        Ok(flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<Option<f32>>, mask: u8) -> TimelineRow {
        TimelineRow {
            subject_id: 1,
            hours: 0.0,
            values,
            mask,
        }
    }

    fn names() -> Vec<String> {
        vec!["b".to_string(), "a".to_string(), "mask".to_string()]
    }

    #[test]
    fn test_column_names_sorted_by_timestep_then_name() {
        let reshaper = WindowReshaper::new(&names(), 2);
        assert_eq!(
            reshaper.column_names(),
            vec!["a_0", "b_0", "mask_0", "a_1", "b_1", "mask_1"]
        );
        assert_eq!(reshaper.width(), 6);
    }

    #[test]
    fn test_reshape_values_follow_column_order() {
        let reshaper = WindowReshaper::new(&names(), 2);
        let r0 = row(vec![Some(10.0), Some(1.0)], 1);
        let r1 = row(vec![None, Some(2.0)], 0);

        let flat = reshaper.reshape(&[&r0, &r1]).unwrap();
        assert_eq!(&flat[..3], &[1.0, 10.0, 1.0]);
        assert_eq!(flat[3], 2.0);
        assert!(flat[4].is_nan());
        assert_eq!(flat[5], 0.0);
    }

    #[test]
    fn test_uppercase_sorts_before_lowercase() {
        let names = vec!["mask".to_string(), "Temperature".to_string(), "Glucose".to_string()];
        let reshaper = WindowReshaper::new(&names, 1);
        assert_eq!(
            reshaper.column_names(),
            vec!["Glucose_0", "Temperature_0", "mask_0"]
        );
    }

    #[test]
    fn test_wrong_window_length() {
        let reshaper = WindowReshaper::new(&names(), 3);
        let r = row(vec![Some(1.0), Some(1.0)], 1);
        let err = reshaper.reshape(&[&r, &r]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::WindowLength {
                expected: 3,
                found: 2
            }
        ));
    }
}

//! Glasgow Coma Scale text normalization.
//!
//! Charted GCS sub-scores arrive as a number followed by a descriptor, e.g.
//! `"4 Spontaneously"` or `"1.0 ET/Trach"`. The descriptors of the matching
//! scale are removed in order and the remainder is read as an integer.

use serde::{Deserialize, Serialize};

use crate::data::RawValue;
use crate::error::{PipelineError, Result};

const EYE_OPENING: &[&str] = &["To speech", "To pain", "Spontaneously", "No Response"];

const MOTOR_RESPONSE: &[&str] = &[
    "Localizes Pain",
    "Flex-withdraws",
    "Obeys Commands",
    "No Response",
    "Abnorm extensn",
    "Abnorm flexion",
];

const VERBAL_RESPONSE: &[&str] = &[
    "Confused",
    "Inapprop words",
    "ET/Trach",
    "Oriented",
    "Incomp sounds",
];

/// GCS component scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcsScale {
    EyeOpening,
    MotorResponse,
    VerbalResponse,
}

impl GcsScale {
    /// Descriptor vocabulary, in removal order
    pub fn descriptors(&self) -> &'static [&'static str] {
        match self {
            GcsScale::EyeOpening => EYE_OPENING,
            GcsScale::MotorResponse => MOTOR_RESPONSE,
            GcsScale::VerbalResponse => VERBAL_RESPONSE,
        }
    }
}

/// Removes descriptor substrings and parses the residual score
#[derive(Debug, Clone)]
pub struct SuffixNormalizer {
    column: String,
    patterns: Vec<String>,
}

impl SuffixNormalizer {
    /// Normalizer for `column` using the vocabulary of `scale`
    pub fn for_scale(column: impl Into<String>, scale: GcsScale) -> Self {
        Self::new(
            column,
            scale.descriptors().iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Normalizer with a custom ordered pattern list
    pub fn new(column: impl Into<String>, patterns: Vec<String>) -> Self {
        Self {
            column: column.into(),
            patterns,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Remove every pattern occurrence, one pattern after another
    pub fn strip(&self, text: &str) -> String {
        self.patterns
            .iter()
            .fold(text.to_string(), |acc, pattern| acc.replace(pattern.as_str(), ""))
    }

    /// Normalize a single cell. Numbers and missing cells pass through.
    pub fn normalize(&self, value: &RawValue) -> Result<Option<f32>> {
        match value {
            RawValue::Missing => Ok(None),
            RawValue::Numeric(v) => Ok(Some(*v)),
            RawValue::Text(text) => self.parse_score(text).map(Some),
        }
    }

    fn parse_score(&self, text: &str) -> Result<f32> {
        let residual = self.strip(text);
        let residual = residual.trim();

        // "1.0 ET/Trach" leaves "1.0", which still denotes a whole score
        let score = residual
            .parse::<i64>()
            .ok()
            .or_else(|| {
                residual
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(|v| v.trunc() as i64)
            })
            .ok_or_else(|| PipelineError::GcsParse {
                column: self.column.clone(),
                value: text.to_string(),
            })?;

        Ok(score as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> RawValue {
        RawValue::Text(s.to_string())
    }

    #[test]
    fn test_strip_descriptors() {
        let eye = SuffixNormalizer::for_scale("eye", GcsScale::EyeOpening);
        assert_eq!(eye.normalize(&text("4 Spontaneously")).unwrap(), Some(4.0));
        assert_eq!(eye.normalize(&text("1 No Response")).unwrap(), Some(1.0));

        let verbal = SuffixNormalizer::for_scale("verbal", GcsScale::VerbalResponse);
        assert_eq!(verbal.normalize(&text("1.0 ET/Trach")).unwrap(), Some(1.0));
        assert_eq!(verbal.normalize(&text("5 Oriented")).unwrap(), Some(5.0));

        let motor = SuffixNormalizer::for_scale("motor", GcsScale::MotorResponse);
        assert_eq!(motor.normalize(&text("4 Flex-withdraws")).unwrap(), Some(4.0));
    }

    #[test]
    fn test_non_text_passes_through() {
        let motor = SuffixNormalizer::for_scale("motor", GcsScale::MotorResponse);
        assert_eq!(motor.normalize(&RawValue::Numeric(6.0)).unwrap(), Some(6.0));
        assert_eq!(motor.normalize(&RawValue::Missing).unwrap(), None);
    }

    #[test]
    fn test_pattern_order_matters() {
        let normalizer =
            SuffixNormalizer::new("c", vec!["ab".to_string(), "b".to_string()]);
        assert_eq!(normalizer.strip("3 abb"), "3 ");

        let normalizer =
            SuffixNormalizer::new("c", vec!["b".to_string(), "ab".to_string()]);
        assert_eq!(normalizer.strip("3 abb"), "3 a");
    }

    #[test]
    fn test_unknown_descriptor_is_an_error() {
        let eye = SuffixNormalizer::for_scale("eye", GcsScale::EyeOpening);
        let err = eye.normalize(&text("3 To Speech")).unwrap_err();
        assert!(matches!(err, PipelineError::GcsParse { ref column, .. } if column == "eye"));
    }
}

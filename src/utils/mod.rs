use std::path::Path;
use anyhow::{Context, Result};

/// Ensure directory exists
pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {:?}", path))?;
    }
    Ok(())
}

/// Format duration as human-readable string
pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

/// Format number with commas
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}

/// Round half to even (`2.5` gives `2`, `3.5` gives `4`)
pub fn round_half_even(value: f64) -> usize {
    value.round_ties_even().max(0.0) as usize
}

/// Random number utilities
pub mod random {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Create RNG with fixed seed
    pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(seed)
    }
}

/// Parameter validation
pub mod validation {
    use crate::error::{PipelineError, Result};

    /// Value must lie strictly between 0 and 1
    pub fn open_unit(name: &'static str, value: f64) -> Result<()> {
        if !(value > 0.0 && value < 1.0) {
            return Err(PipelineError::InvalidParameter {
                name,
                reason: format!("must be between 0 and 1 (exclusive), got {}", value),
            });
        }
        Ok(())
    }

    /// Value must lie in (0, 1]
    pub fn half_open_unit(name: &'static str, value: f64) -> Result<()> {
        if !(value > 0.0 && value <= 1.0) {
            return Err(PipelineError::InvalidParameter {
                name,
                reason: format!("must be in (0, 1], got {}", value),
            });
        }
        Ok(())
    }

    /// Value must be at least one
    pub fn positive(name: &'static str, value: usize) -> Result<()> {
        if value == 0 {
            return Err(PipelineError::InvalidParameter {
                name,
                reason: "must be positive, got 0".to_string(),
            });
        }
        Ok(())
    }
}

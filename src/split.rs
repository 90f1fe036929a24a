//! Chronological train/remainder split.

use crate::error::{PipelineError, Result};

pub const DEFAULT_TRAIN_FRACTION: f64 = 0.67;

/// Reject fractions outside `(0, 1]`, NaN included.
pub fn validate_fraction(train_fraction: f64) -> Result<()> {
    if train_fraction > 0.0 && train_fraction <= 1.0 {
        Ok(())
    } else {
        Err(PipelineError::Config(format!(
            "train_fraction must be in (0, 1], got {}",
            train_fraction
        )))
    }
}

/// Number of leading items that form the training slice.
pub fn train_len(total: usize, train_fraction: f64) -> Result<usize> {
    validate_fraction(train_fraction)?;
    Ok(((train_fraction * total as f64).floor() as usize).min(total))
}

/// Split `items` into the first `floor(train_fraction * N)` items and the rest.
/// No shuffling: earlier samples train, later ones remain.
pub fn split<T>(items: &[T], train_fraction: f64) -> Result<(&[T], &[T])> {
    let n = train_len(items.len(), train_fraction)?;
    Ok(items.split_at(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fraction_on_hundred() {
        let items: Vec<usize> = (0..100).collect();
        let (train, rest) = split(&items, DEFAULT_TRAIN_FRACTION).unwrap();
        assert_eq!(train.len(), 67);
        assert_eq!(rest.len(), 33);
        assert_eq!(train, &items[..67]);
        assert_eq!(rest[0], 67);
    }

    #[test]
    fn test_full_fraction() {
        let items = [1, 2, 3];
        let (train, rest) = split(&items, 1.0).unwrap();
        assert_eq!(train, &[1, 2, 3]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_floor_rounding() {
        let items = [0u8; 10];
        let (train, _) = split(&items, 0.15).unwrap();
        assert_eq!(train.len(), 1);
    }

    #[test]
    fn test_out_of_range() {
        let items = [1, 2, 3];
        for bad in [0.0, -0.2, 1.01, f64::NAN] {
            assert!(matches!(split(&items, bad), Err(PipelineError::Config(_))));
        }
    }
}

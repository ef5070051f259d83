use crate::error::{AppError, AppResult};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StarState {
    Full,
    Half,
    Empty,
}

/// Ratings run from 0.0 to 5.0 in half-point steps.
pub fn validate_rating(rating: f64) -> AppResult<()> {
    if !rating.is_finite() || !(0.0..=5.0).contains(&rating) {
        return Err(AppError::Validation(
            "rating must be between 0.0 and 5.0".to_string(),
        ));
    }
    if (rating * 2.0).fract() != 0.0 {
        return Err(AppError::Validation(
            "rating must use half-point increments (e.g. 4.5)".to_string(),
        ));
    }
    Ok(())
}

/// Five star slots for display. Out-of-range input is clamped; a fractional
/// part of at least one half renders as a half star.
pub fn star_states(rating: Option<f64>) -> [StarState; 5] {
    let r = rating.filter(|r| r.is_finite()).unwrap_or(0.0).clamp(0.0, 5.0);
    let full = r.trunc() as usize;
    let half = usize::from(r - r.trunc() >= 0.5);

    let mut stars = [StarState::Empty; 5];
    for (i, slot) in stars.iter_mut().enumerate() {
        if i < full {
            *slot = StarState::Full;
        } else if i < full + half {
            *slot = StarState::Half;
        }
    }
    stars
}

#[cfg(test)]
mod tests {
    use super::*;
    use StarState::*;

    #[test]
    fn test_star_states_half() {
        assert_eq!(star_states(Some(3.5)), [Full, Full, Full, Half, Empty]);
    }

    #[test]
    fn test_star_states_bounds() {
        assert_eq!(star_states(Some(5.0)), [Full; 5]);
        assert_eq!(star_states(Some(7.2)), [Full; 5]);
        assert_eq!(star_states(Some(-1.0)), [Empty; 5]);
        assert_eq!(star_states(None), [Empty; 5]);
    }

    #[test]
    fn test_star_states_rounds_down_below_half() {
        assert_eq!(star_states(Some(4.4)), [Full, Full, Full, Full, Empty]);
    }

    #[test]
    fn test_validate_rating() {
        assert!(validate_rating(4.5).is_ok());
        assert!(validate_rating(0.0).is_ok());
        assert!(validate_rating(4.3).is_err());
        assert!(validate_rating(5.5).is_err());
        assert!(validate_rating(f64::NAN).is_err());
    }
}

//! Deterministic variant assignment
//!
//! A session's variant is re-derived from `(test_id, session_id)` alone, so
//! no assignment table is needed to answer "which arm is this session in".

use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

/// Allowed deviation of the split total from 1.0
pub const SPLIT_TOLERANCE: f64 = 1e-9;

/// Reject splits that do not sum to 1 or contain out-of-range entries
pub fn validate_traffic_split(split: &[f64]) -> AppResult<()> {
    if split.len() < 2 {
        return Err(AppError::validation(
            "invalid_traffic_split",
            "a test needs at least two variants",
        ));
    }

    if let Some(bad) = split
        .iter()
        .find(|share| !share.is_finite() || **share < 0.0 || **share > 1.0)
    {
        return Err(AppError::validation(
            "invalid_traffic_split",
            format!("traffic split entries must be within [0, 1], got {bad}"),
        ));
    }

    let total: f64 = split.iter().sum();
    if (total - 1.0).abs() > SPLIT_TOLERANCE {
        return Err(AppError::validation(
            "invalid_traffic_split",
            format!("traffic split must sum to 1.0, got {total}"),
        ));
    }

    Ok(())
}

/// Map `(test_id, session_id)` uniformly onto `[0, 1)`
pub fn assignment_point(test_id: i64, session_id: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(test_id.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(session_id.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    // Keep 53 bits so the quotient is exact and strictly below 1.0
    let bits = u64::from_be_bytes(prefix) >> 11;
    bits as f64 / (1u64 << 53) as f64
}

/// Index of the variant whose cumulative split boundary contains the session
pub fn assign_index(test_id: i64, session_id: &str, split: &[f64]) -> usize {
    let point = assignment_point(test_id, session_id);

    let mut boundary = 0.0;
    for (index, share) in split.iter().enumerate() {
        boundary += share;
        if point < boundary {
            return index;
        }
    }

    // Rounding may leave the last boundary a hair under 1.0
    split.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_validation() {
        assert!(validate_traffic_split(&[0.5, 0.5]).is_ok());
        assert!(validate_traffic_split(&[0.2, 0.3, 0.5]).is_ok());
        assert!(validate_traffic_split(&[0.1; 10]).is_ok());

        let err = validate_traffic_split(&[0.5, 0.4]).unwrap_err();
        assert_eq!(err.code(), "invalid_traffic_split");
        assert!(validate_traffic_split(&[1.0]).is_err());
        assert!(validate_traffic_split(&[1.2, -0.2]).is_err());
        assert!(validate_traffic_split(&[f64::NAN, 1.0]).is_err());
    }

    #[test]
    fn test_assignment_is_pure() {
        for i in 0..100 {
            let session = format!("session-{i}");
            let first = assign_index(7, &session, &[0.3, 0.3, 0.4]);
            let second = assign_index(7, &session, &[0.3, 0.3, 0.4]);
            assert_eq!(first, second);
            assert_eq!(assignment_point(7, &session), assignment_point(7, &session));
        }
    }

    #[test]
    fn test_point_range() {
        for i in 0..1000 {
            let point = assignment_point(i, "visitor");
            assert!((0.0..1.0).contains(&point));
        }
    }

    #[test]
    fn test_even_split_is_uniform() {
        let mut counts = [0usize; 2];
        for i in 0..2000 {
            counts[assign_index(1, &format!("session-{i}"), &[0.5, 0.5])] += 1;
        }
        for count in counts {
            assert!((950..=1050).contains(&count), "unbalanced split: {counts:?}");
        }
    }

    #[test]
    fn test_different_tests_assign_independently() {
        let differing = (0..200)
            .filter(|i| {
                let session = format!("session-{i}");
                assign_index(1, &session, &[0.5, 0.5]) != assign_index(2, &session, &[0.5, 0.5])
            })
            .count();
        assert!(differing > 50);
    }

    #[test]
    fn test_zero_share_variant_never_assigned() {
        for i in 0..500 {
            assert_ne!(assign_index(3, &format!("session-{i}"), &[0.5, 0.0, 0.5]), 1);
        }
    }
}

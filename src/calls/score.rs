//! Normalization of mean ranks into expression scores.

use crate::common::round_half_up;

/// Lower bound of the expression score.
pub const MIN_EXPRESSION_SCORE: f64 = 0.01;
/// Upper bound of the expression score.
pub const MAX_EXPRESSION_SCORE: f64 = 100.0;

/// Supporting code for `expression_score`.
pub(crate) mod expression_score {
    /// Error type for `expression_score`.
    #[derive(thiserror::Error, Debug, Clone, PartialEq)]
    pub enum Error {
        /// Invalid-argument: the species maximal rank must be positive.
        #[error("max rank must be positive, got {0}")]
        NonPositiveMaxRank(f64),
        /// Invalid-argument: a rank must be positive.
        #[error("rank must be positive, got {0}")]
        NonPositiveRank(f64),
        /// Invalid-argument: a rank cannot exceed the species maximal rank.
        #[error("rank {rank} exceeds max rank {max_rank}")]
        RankAboveMaxRank { rank: f64, max_rank: f64 },
    }
}

/// Compute the expression score for the given mean rank.
///
/// An absent rank yields an absent score. The score maps rank 1 to
/// `MAX_EXPRESSION_SCORE` and rank `max_rank` towards the minimum, clamped
/// to `[MIN_EXPRESSION_SCORE, MAX_EXPRESSION_SCORE]` and rounded half-up
/// to 5 fractional digits. A raw value above the maximum indicates an
/// inconsistent max rank upstream and is reported as a warning before
/// clamping.
pub fn expression_score(
    rank: Option<f64>,
    max_rank: f64,
) -> Result<Option<f64>, expression_score::Error> {
    if max_rank <= 0.0 {
        return Err(expression_score::Error::NonPositiveMaxRank(max_rank));
    }
    let rank = match rank {
        Some(rank) => rank,
        None => return Ok(None),
    };
    if rank <= 0.0 {
        return Err(expression_score::Error::NonPositiveRank(rank));
    }
    if rank > max_rank {
        return Err(expression_score::Error::RankAboveMaxRank { rank, max_rank });
    }

    let raw = (max_rank + 1.0 - rank) * 100.0 / max_rank;
    if raw > MAX_EXPRESSION_SCORE {
        tracing::warn!(
            "expression score {} exceeds {} (rank={}, max_rank={}), clamping",
            raw,
            MAX_EXPRESSION_SCORE,
            rank,
            max_rank
        );
    }
    let clamped = raw.clamp(MIN_EXPRESSION_SCORE, MAX_EXPRESSION_SCORE);
    Ok(Some(round_half_up(clamped, 5)))
}

#[cfg(test)]
mod tests {
    use float_cmp::approx_eq;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::{expression_score, MAX_EXPRESSION_SCORE, MIN_EXPRESSION_SCORE};

    #[test]
    fn absent_rank_yields_absent_score() -> Result<(), super::expression_score::Error> {
        assert_eq!(expression_score(None, 100.0)?, None);
        Ok(())
    }

    #[rstest]
    #[case(Some(1.0), 0.0)]
    #[case(Some(1.0), -5.0)]
    #[case(None, 0.0)]
    fn non_positive_max_rank_is_an_error(#[case] rank: Option<f64>, #[case] max_rank: f64) {
        assert_eq!(
            expression_score(rank, max_rank),
            Err(super::expression_score::Error::NonPositiveMaxRank(max_rank))
        );
    }

    #[test]
    fn non_positive_rank_is_an_error() {
        assert_eq!(
            expression_score(Some(0.0), 100.0),
            Err(super::expression_score::Error::NonPositiveRank(0.0))
        );
        assert_eq!(
            expression_score(Some(-1.0), 100.0),
            Err(super::expression_score::Error::NonPositiveRank(-1.0))
        );
    }

    #[test]
    fn rank_above_max_rank_is_an_error() {
        assert_eq!(
            expression_score(Some(101.0), 100.0),
            Err(super::expression_score::Error::RankAboveMaxRank {
                rank: 101.0,
                max_rank: 100.0
            })
        );
    }

    #[test]
    fn best_rank_scores_the_maximum() -> Result<(), super::expression_score::Error> {
        // rank 1 of 1 clamps to exactly 100.00000
        assert_eq!(expression_score(Some(1.0), 1.0)?, Some(100.0));
        Ok(())
    }

    #[test]
    fn worst_rank_scores_near_the_minimum() -> Result<(), super::expression_score::Error> {
        let score = expression_score(Some(100.0), 100.0)?.expect("score present");
        assert!(approx_eq!(f64, score, 1.0, epsilon = 1e-9));
        Ok(())
    }

    #[test]
    fn scores_stay_in_bounds() -> Result<(), super::expression_score::Error> {
        for rank in [1u32, 2, 10, 500, 41_025] {
            let score = expression_score(Some(rank as f64), 41_025.0)?.expect("score present");
            assert!(score >= MIN_EXPRESSION_SCORE, "rank {}: {}", rank, score);
            assert!(score <= MAX_EXPRESSION_SCORE, "rank {}: {}", rank, score);
        }
        Ok(())
    }

    #[test]
    fn score_is_strictly_decreasing_in_rank() -> Result<(), super::expression_score::Error> {
        let max_rank = 10_000.0;
        let mut previous = f64::INFINITY;
        for rank in [1.0, 2.0, 5.0, 100.0, 2_500.0, 9_999.0] {
            let score = expression_score(Some(rank), max_rank)?.expect("score present");
            assert!(score < previous, "rank {}: {} !< {}", rank, score, previous);
            previous = score;
        }
        Ok(())
    }

    #[test]
    fn rounding_is_half_up_to_five_digits() -> Result<(), super::expression_score::Error> {
        // (3 + 1 - 2) * 100 / 3 = 66.666666...
        let score = expression_score(Some(2.0), 3.0)?.expect("score present");
        assert_eq!(score, 66.66667);
        Ok(())
    }

    #[tracing_test::traced_test]
    #[test]
    fn fractional_rank_warns_and_clamps() -> Result<(), super::expression_score::Error> {
        // a rank below 1 pushes the raw score above the maximum
        let score = expression_score(Some(0.5), 100.0)?.expect("score present");

        assert_eq!(score, 100.0);
        assert!(logs_contain("exceeds"));

        Ok(())
    }
}

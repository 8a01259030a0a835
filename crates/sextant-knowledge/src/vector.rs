//! Vector similarity.
//!
//! Pure functions over `f32` slices used by semantic search. Zero vectors
//! never produce NaN: they normalize to themselves and have similarity 0.0
//! with everything.

use crate::error::{KnowledgeError, Result};

/// Options for [`find_most_similar`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityOptions {
    pub limit: usize,
    pub threshold: f32,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.5,
        }
    }
}

/// A ranked candidate from [`find_most_similar`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityMatch {
    /// Position of the candidate in the input slice.
    pub index: usize,
    pub score: f32,
}

fn check_dimensions(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() != b.len() {
        return Err(KnowledgeError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dimensions(a, b)?;
    Ok(a.iter().zip(b).map(|(x, y)| x * y).sum())
}

/// L2 norm.
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale to unit length. The zero vector maps to itself.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let mag = magnitude(v);
    if mag == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / mag).collect()
}

/// Cosine similarity clamped into `[-1, 1]`.
///
/// Returns exactly `0.0` when either side is empty or all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    let dot = dot_product(a, b)?;
    let denom = magnitude(a) * magnitude(b);
    if denom == 0.0 || !denom.is_finite() {
        return Ok(0.0);
    }
    let sim = dot / denom;
    if sim.is_nan() {
        return Ok(0.0);
    }
    Ok(sim.clamp(-1.0, 1.0))
}

/// Top `limit` candidates scoring at least `threshold`, best first.
///
/// Equal scores keep their input order.
pub fn find_most_similar<C: AsRef<[f32]>>(
    query: &[f32],
    candidates: &[C],
    options: SimilarityOptions,
) -> Result<Vec<SimilarityMatch>> {
    let mut matches = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        let score = cosine_similarity(query, candidate.as_ref())?;
        if score >= options.threshold {
            matches.push(SimilarityMatch { index, score });
        }
    }

    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches.truncate(options.limit);
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dot_product() {
        assert_eq!(dot_product(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]).unwrap(), 32.0);
        assert!(matches!(
            dot_product(&[1.0], &[1.0, 2.0]),
            Err(KnowledgeError::DimensionMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_normalize() {
        let n = normalize(&[3.0, 4.0]);
        assert!((n[0] - 0.6).abs() < 1e-6);
        assert!((n[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_identical_and_opposite() {
        let v = [0.3, -1.2, 4.0];
        assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-6);
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &neg).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&[], &[]).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_dimension_mismatch() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0]).is_err());
    }

    #[test]
    fn test_find_most_similar_orders_and_filters() {
        let query = [1.0, 0.0];
        let candidates = vec![
            vec![0.0, 1.0],  // 0.0
            vec![1.0, 1.0],  // ~0.707
            vec![1.0, 0.0],  // 1.0
            vec![-1.0, 0.0], // -1.0
        ];
        let found = find_most_similar(
            &query,
            &candidates,
            SimilarityOptions {
                limit: 10,
                threshold: 0.5,
            },
        )
        .unwrap();

        let indices: Vec<usize> = found.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![2, 1]);
    }

    #[test]
    fn test_find_most_similar_ties_keep_input_order() {
        let query = [1.0, 0.0];
        let candidates = vec![vec![2.0, 0.0], vec![0.5, 0.0], vec![1.0, 0.0]];
        let found = find_most_similar(
            &query,
            &candidates,
            SimilarityOptions {
                limit: 2,
                threshold: 0.0,
            },
        )
        .unwrap();

        let indices: Vec<usize> = found.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_find_most_similar_empty_corpus() {
        let candidates: Vec<Vec<f32>> = Vec::new();
        assert!(
            find_most_similar(&[1.0], &candidates, SimilarityOptions::default())
                .unwrap()
                .is_empty()
        );
    }

    proptest! {
        #[test]
        fn prop_cosine_is_bounded(
            pair in (1usize..32).prop_flat_map(|n| (
                prop::collection::vec(-1000.0f32..1000.0, n),
                prop::collection::vec(-1000.0f32..1000.0, n),
            ))
        ) {
            let (a, b) = pair;
            let sim = cosine_similarity(&a, &b).unwrap();
            prop_assert!(sim.is_finite());
            prop_assert!((-1.0..=1.0).contains(&sim));
        }

        #[test]
        fn prop_normalize_is_unit_or_zero(v in prop::collection::vec(-100.0f32..100.0, 1..32)) {
            let n = normalize(&v);
            let mag = magnitude(&n);
            prop_assert!(mag == 0.0 || (mag - 1.0).abs() < 1e-3);
        }
    }
}

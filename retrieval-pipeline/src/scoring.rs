use std::{cmp::Ordering, collections::HashMap};

/// A passage position in the index paired with a retrieval score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub id: String,
    pub position: usize,
    pub score: f32,
}

impl ScoredPassage {
    pub fn new(id: impl Into<String>, position: usize, score: f32) -> Self {
        Self {
            id: id.into(),
            position,
            score,
        }
    }
}

/// Configuration for reciprocal rank fusion.
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    pub k: f32,
    pub dense_weight: f32,
    pub concept_weight: f32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self {
            k: 60.0,
            dense_weight: 1.0,
            concept_weight: 1.0,
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot = x.mul_add(*y, dot);
        norm_a = x.mul_add(*x, norm_a);
        norm_b = y.mul_add(*y, norm_b);
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON || !denom.is_finite() {
        return 0.0;
    }
    let similarity = dot / denom;
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}

/// Sorts by score descending; equal scores fall back to id ascending so the
/// ordering is stable across runs.
pub fn sort_by_score_desc(items: &mut [ScoredPassage]) {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Merges two rankings by weighted reciprocal rank. Input order is taken as
/// the rank; the fused score replaces the per-list scores.
pub fn reciprocal_rank_fusion(
    dense_ranked: &[ScoredPassage],
    concept_ranked: &[ScoredPassage],
    config: RrfConfig,
) -> Vec<ScoredPassage> {
    let k = if config.k <= 0.0 || !config.k.is_finite() {
        60.0
    } else {
        config.k
    };
    let weight = |value: f32| {
        if value.is_finite() {
            value.max(0.0)
        } else {
            0.0
        }
    };

    let mut merged: HashMap<&str, ScoredPassage> = HashMap::new();
    for (ranked, list_weight) in [
        (dense_ranked, weight(config.dense_weight)),
        (concept_ranked, weight(config.concept_weight)),
    ] {
        for (rank, candidate) in ranked.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let contribution = list_weight / (k + rank as f32 + 1.0);
            merged
                .entry(candidate.id.as_str())
                .and_modify(|entry| entry.score += contribution)
                .or_insert_with(|| {
                    ScoredPassage::new(candidate.id.clone(), candidate.position, contribution)
                });
        }
    }

    let mut fused: Vec<ScoredPassage> = merged.into_values().collect();
    sort_by_score_desc(&mut fused);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_handles_orthogonal_and_degenerate_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn ties_break_by_id() {
        let mut items = vec![
            ScoredPassage::new("b", 1, 0.5),
            ScoredPassage::new("a", 0, 0.5),
            ScoredPassage::new("c", 2, 0.9),
        ];
        sort_by_score_desc(&mut items);
        let ids: Vec<&str> = items.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn fusion_rewards_agreement_between_lists() {
        let dense = vec![
            ScoredPassage::new("s1", 0, 0.9),
            ScoredPassage::new("s2", 1, 0.8),
        ];
        let concept = vec![
            ScoredPassage::new("s2", 1, 0.7),
            ScoredPassage::new("s3", 2, 0.6),
        ];

        let fused = reciprocal_rank_fusion(&dense, &concept, RrfConfig::default());

        let ids: Vec<&str> = fused.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1", "s3"]);
        assert!(fused[0].score > fused[1].score);
    }
}

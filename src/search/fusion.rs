//! Reciprocal Rank Fusion of the vector and lexical search legs.

use std::collections::HashMap;

use crate::store::ChunkHit;

/// RRF constant; a rank-`r` result contributes `1 / (K + r + 1)`.
pub const RRF_K: f64 = 60.0;

/// How many characters of chunk content participate in the fusion key.
const KEY_CONTENT_CHARS: usize = 100;

struct FusedHit {
    hit: ChunkHit,
    score: f64,
    vector_rank: Option<usize>,
}

/// Fuses the two legs with equal weight.
///
/// Results are keyed by `(url, first 100 chars of chunk content)` so the
/// same chunk surfacing in both legs accumulates both contributions. When
/// the lexical leg is empty the vector ordering is returned as-is. The
/// reported `distance` becomes `1 − score` for caller consistency; ties are
/// broken by vector-leg rank so the ordering is deterministic.
pub fn fuse(vector: Vec<ChunkHit>, lexical: Vec<ChunkHit>, limit: usize) -> Vec<ChunkHit> {
    if lexical.is_empty() {
        let mut hits = vector;
        hits.truncate(limit);
        return hits;
    }

    let mut fused: HashMap<(String, String), FusedHit> = HashMap::new();

    for (rank, hit) in vector.into_iter().enumerate() {
        let key = fusion_key(&hit);
        let contribution = rrf_score(rank);
        let entry = fused.entry(key).or_insert_with(|| FusedHit {
            hit,
            score: 0.0,
            vector_rank: Some(rank),
        });
        entry.score += contribution;
        entry.vector_rank.get_or_insert(rank);
    }

    for (rank, hit) in lexical.into_iter().enumerate() {
        let key = fusion_key(&hit);
        let contribution = rrf_score(rank);
        let entry = fused.entry(key).or_insert_with(|| FusedHit {
            hit,
            score: 0.0,
            vector_rank: None,
        });
        entry.score += contribution;
    }

    let mut ranked: Vec<FusedHit> = fused.into_values().collect();
    // Hash-map iteration order must not leak into results: sort by combined
    // score, then by vector rank as the stable secondary key.
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| rank_or_max(a.vector_rank).cmp(&rank_or_max(b.vector_rank)))
    });
    ranked.truncate(limit);

    ranked
        .into_iter()
        .map(|fused| ChunkHit {
            distance: 1.0 - fused.score,
            ..fused.hit
        })
        .collect()
}

fn rrf_score(rank: usize) -> f64 {
    1.0 / (RRF_K + rank as f64 + 1.0)
}

fn rank_or_max(rank: Option<usize>) -> usize {
    rank.unwrap_or(usize::MAX)
}

fn fusion_key(hit: &ChunkHit) -> (String, String) {
    let prefix: String = hit.content.chars().take(KEY_CONTENT_CHARS).collect();
    (hit.url.clone(), prefix)
}

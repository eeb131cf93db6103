use citerag_core::config::FusionWeights;
use citerag_core::types::{SearchHit, SourceKind};
use citerag_hybrid::fusion::{fuse, pool_hits, FusedHit, FusionStrategy};

fn dense(items: &[(&str, f32)]) -> Vec<SearchHit> {
    items.iter().map(|(id, s)| SearchHit { id: id.to_string(), score: *s, source: SourceKind::Dense }).collect()
}

fn sparse(items: &[(&str, f32)]) -> Vec<SearchHit> {
    items.iter().map(|(id, s)| SearchHit { id: id.to_string(), score: *s, source: SourceKind::Sparse }).collect()
}

fn even() -> FusionWeights { FusionWeights { dense: 0.5, sparse: 0.5 } }

fn score_of(fused: &[FusedHit], id: &str) -> f32 {
    fused.iter().find(|h| h.chunk_id == id).map(|h| h.fused_score).unwrap_or(0.0)
}

const STRATEGIES: [FusionStrategy; 2] = [FusionStrategy::Rrf { k: 60.0 }, FusionStrategy::WeightedMinMax];

#[test]
fn raising_a_retriever_score_never_lowers_the_fused_score() {
    let sparse_hits = sparse(&[("b", 5.0), ("c", 2.0)]);
    for strategy in STRATEGIES {
        let before = fuse(&dense(&[("a", 0.9), ("b", 0.5), ("c", 0.1)]), &sparse_hits, strategy, even());
        let after = fuse(&dense(&[("b", 0.95), ("a", 0.9), ("c", 0.1)]), &sparse_hits, strategy, even());
        assert!(score_of(&after, "b") >= score_of(&before, "b"), "{strategy:?}");
    }
}

#[test]
fn a_chunk_first_in_both_lists_is_fused_first() {
    let d = dense(&[("a", 0.91), ("b", 0.9), ("c", 0.4), ("d", 0.2)]);
    let s = sparse(&[("a", 12.0), ("e", 11.5), ("c", 6.0), ("b", 0.5)]);
    let weights = [
        even(),
        FusionWeights { dense: 0.9, sparse: 0.1 },
        FusionWeights { dense: 0.1, sparse: 0.9 },
        FusionWeights { dense: 1.0, sparse: 0.0 },
        FusionWeights { dense: 0.0, sparse: 1.0 },
        FusionWeights { dense: 3.0, sparse: 7.0 },
    ];
    for strategy in STRATEGIES {
        for w in weights {
            let fused = fuse(&d, &s, strategy, w);
            assert_eq!(fused[0].chunk_id, "a", "{strategy:?} {w:?}");
        }
    }
}

#[test]
fn single_list_hits_use_only_that_contribution() {
    let fused = fuse(&dense(&[("a", 0.8)]), &sparse(&[("z", 3.0)]), FusionStrategy::Rrf { k: 60.0 }, even());
    let a = fused.iter().find(|h| h.chunk_id == "a").unwrap();
    assert_eq!(a.sparse_score, None);
    assert_eq!(a.dense_score, Some(0.8));
    assert!((a.fused_score - 0.5).abs() < 1e-6);

    let both = fuse(&dense(&[("a", 0.8)]), &sparse(&[("a", 3.0)]), FusionStrategy::Rrf { k: 60.0 }, even());
    assert!((both[0].fused_score - 1.0).abs() < 1e-6);
}

#[test]
fn weights_shift_the_balance() {
    let d = dense(&[("a", 0.9), ("b", 0.1)]);
    let s = sparse(&[("b", 9.0), ("a", 1.0)]);
    let dense_heavy = fuse(&d, &s, FusionStrategy::WeightedMinMax, FusionWeights { dense: 0.8, sparse: 0.2 });
    assert_eq!(dense_heavy[0].chunk_id, "a");
    let sparse_heavy = fuse(&d, &s, FusionStrategy::WeightedMinMax, FusionWeights { dense: 0.2, sparse: 0.8 });
    assert_eq!(sparse_heavy[0].chunk_id, "b");
}

#[test]
fn ties_prefer_agreement_then_chunk_id() {
    // x: dense only (0.5), y: both (0 + 0.5), z: sparse floor (0)
    let fused = fuse(&dense(&[("x", 1.0), ("y", 0.0)]), &sparse(&[("y", 3.0), ("z", 1.0)]), FusionStrategy::WeightedMinMax, even());
    let ids: Vec<_> = fused.iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["y", "x", "z"]);

    let fused = fuse(&dense(&[("m", 0.7)]), &sparse(&[("k", 2.0)]), FusionStrategy::Rrf { k: 60.0 }, even());
    let ids: Vec<_> = fused.iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["k", "m"]);
}

#[test]
fn fused_scores_stay_in_unit_range() {
    let d = dense(&[("a", 0.99), ("b", 0.42), ("c", -0.3), ("d", 0.0)]);
    let s = sparse(&[("c", 17.5), ("e", 4.0), ("a", 0.2)]);
    for strategy in STRATEGIES {
        for weights in [even(), FusionWeights { dense: 1.0, sparse: 0.0 }, FusionWeights { dense: 0.3, sparse: 2.0 }] {
            let fused = fuse(&d, &s, strategy, weights);
            assert_eq!(fused.len(), 5);
            assert!(fused.iter().all(|h| (0.0..=1.0).contains(&h.fused_score)), "{strategy:?} {weights:?}");
            assert!(fused.windows(2).all(|w| w[0].fused_score >= w[1].fused_score));
        }
    }
}

#[test]
fn empty_inputs_fuse_to_nothing() {
    assert!(fuse(&[], &[], FusionStrategy::default(), even()).is_empty());
}

#[test]
fn pooling_keeps_the_best_score_per_chunk() {
    let pooled = pool_hits(sparse(&[("a", 1.0), ("b", 2.0), ("a", 3.0), ("c", 2.0)]));
    let got: Vec<_> = pooled.iter().map(|h| (h.id.as_str(), h.score)).collect();
    assert_eq!(got, vec![("a", 3.0), ("b", 2.0), ("c", 2.0)]);
}

use citerag_core::error::Error;
use citerag_core::traits::DenseIndex;
use citerag_core::types::{AccessFilter, DenseRecord, Roles};
use citerag_vector::{cosine, LanceDenseIndex, MemoryDenseIndex};

fn record(id: &str, roles: &[&str], vector: Vec<f32>) -> DenseRecord {
    DenseRecord {
        chunk_id: id.to_string(),
        document_id: id.split('#').next().unwrap_or(id).to_string(),
        access_roles: roles.iter().map(|r| r.to_string()).collect::<Roles>(),
        vector,
    }
}

fn seed_records() -> Vec<DenseRecord> {
    vec![
        record("leave#000", &[], vec![1.0, 0.0, 0.0]),
        record("leave#001", &[], vec![0.8, 0.6, 0.0]),
        record("payroll#000", &["finance"], vec![0.9, 0.1, 0.0]),
        record("router#000", &[], vec![0.0, 0.0, 1.0]),
    ]
}

async fn exercise_ranking_and_acl(index: &dyn DenseIndex) {
    index.upsert("hr", "m1", seed_records()).await.expect("upsert");

    let public = index.search("hr", &[1.0, 0.0, 0.0], 3, &AccessFilter::public()).await.expect("search");
    let ids: Vec<_> = public.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["leave#000", "leave#001", "router#000"]);
    assert!((public[0].score - 1.0).abs() < 1e-4);
    assert!((public[1].score - 0.8).abs() < 1e-4);

    let finance = index.search("hr", &[1.0, 0.0, 0.0], 2, &AccessFilter::for_role("finance")).await.expect("search");
    let ids: Vec<_> = finance.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["leave#000", "payroll#000"]);

    assert!(index.search("engineering", &[1.0, 0.0, 0.0], 3, &AccessFilter::public()).await.expect("search").is_empty());
    assert_eq!(index.model_id("hr").await.expect("model"), Some("m1".to_string()));
}

async fn exercise_model_guard_and_removal(index: &dyn DenseIndex) {
    index.upsert("hr", "m1", seed_records()).await.expect("upsert");
    let err = index.upsert("hr", "m2", vec![record("x#000", &[], vec![0.0, 1.0, 0.0])]).await.unwrap_err();
    assert!(matches!(err, Error::ModelMismatch { ref expected, ref actual, .. } if expected == "m1" && actual == "m2"));
    let err = index.upsert("hr", "m1", vec![record("x#000", &[], vec![0.0, 1.0])]).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));

    // replacing a vector keeps one entry per chunk id
    index.upsert("hr", "m1", vec![record("router#000", &[], vec![1.0, 0.0, 0.0])]).await.expect("replace");
    let hits = index.search("hr", &[1.0, 0.0, 0.0], 10, &AccessFilter::public()).await.expect("search");
    assert_eq!(hits.iter().filter(|h| h.id == "router#000").count(), 1);
    assert!((hits[0].score - 1.0).abs() < 1e-4);

    index.remove("hr", &["router#000".to_string(), "leave#000".to_string()]).await.expect("remove");
    let hits = index.search("hr", &[1.0, 0.0, 0.0], 10, &AccessFilter::for_role("finance")).await.expect("search");
    let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["payroll#000", "leave#001"]);
}

async fn exercise_role_isolation(index: &dyn DenseIndex) {
    let err = index.upsert("hr", "m1", vec![record("merged#000", &["hr|finance"], vec![1.0, 0.0, 0.0])]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(index.upsert("hr", "m1", vec![record("blank#000", &[""], vec![1.0, 0.0, 0.0])]).await.is_err());

    index.upsert("hr", "m1", seed_records()).await.expect("upsert");
    for wildcard in ["%", "fin_nce", "finance|hr"] {
        let err = index.search("hr", &[1.0, 0.0, 0.0], 10, &AccessFilter::for_role(wildcard)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{wildcard:?} accepted");
    }
    let hr = index.search("hr", &[1.0, 0.0, 0.0], 10, &AccessFilter::for_role("hr")).await.expect("search");
    assert!(hr.iter().all(|h| h.id != "payroll#000"));
}

#[tokio::test]
async fn memory_index_ranks_and_filters() {
    exercise_ranking_and_acl(&MemoryDenseIndex::new()).await;
}

#[tokio::test]
async fn memory_index_guards_models_and_removes() {
    exercise_model_guard_and_removal(&MemoryDenseIndex::new()).await;
}

#[tokio::test]
async fn memory_index_rejects_delimited_roles() {
    exercise_role_isolation(&MemoryDenseIndex::new()).await;
}

#[tokio::test]
async fn memory_index_rebinds_model_once_emptied() {
    let index = MemoryDenseIndex::new();
    index.upsert("hr", "m1", vec![record("a#000", &[], vec![1.0, 0.0])]).await.expect("upsert");
    index.remove("hr", &["a#000".to_string()]).await.expect("remove");
    assert_eq!(index.model_id("hr").await.expect("model"), None);
    index.upsert("hr", "m2", vec![record("a#000", &[], vec![1.0, 0.0, 0.0])]).await.expect("rebuilt with new model");
    assert_eq!(index.len("hr"), 1);
}

#[tokio::test]
async fn memory_index_rejects_bad_collection_and_query_dims() {
    let index = MemoryDenseIndex::new();
    assert!(index.upsert("../x", "m1", seed_records()).await.is_err());
    index.upsert("hr", "m1", seed_records()).await.expect("upsert");
    let err = index.search("hr", &[1.0, 0.0], 3, &AccessFilter::public()).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { .. }));
}

#[tokio::test]
async fn lance_index_ranks_and_filters() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = LanceDenseIndex::open(&tmp.path().to_string_lossy()).await?;
    exercise_ranking_and_acl(&index).await;
    Ok(())
}

#[tokio::test]
async fn lance_index_guards_models_and_removes() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = LanceDenseIndex::open(&tmp.path().to_string_lossy()).await?;
    exercise_model_guard_and_removal(&index).await;
    Ok(())
}

#[tokio::test]
async fn lance_index_rejects_delimited_roles() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let index = LanceDenseIndex::open(&tmp.path().to_string_lossy()).await?;
    exercise_role_isolation(&index).await;
    Ok(())
}

#[tokio::test]
async fn lance_index_persists_model_binding() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let uri = tmp.path().to_string_lossy().to_string();
    LanceDenseIndex::open(&uri).await?.upsert("hr", "m1", seed_records()).await?;
    let reopened = LanceDenseIndex::open(&uri).await?;
    assert_eq!(reopened.model_id("hr").await?, Some("m1".to_string()));
    assert_eq!(reopened.model_id("support").await?, None);
    Ok(())
}

#[test]
fn cosine_handles_zero_vectors() {
    assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    assert!((cosine(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
}

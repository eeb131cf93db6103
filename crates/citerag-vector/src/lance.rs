//! LanceDB-backed dense index: one table per collection (`dense_<collection>`)
//! plus a shared meta table holding each collection's embedding model and
//! dimensionality.
use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::{Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_array::builder::{FixedSizeListBuilder, Float32Builder};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType};
use tokio::sync::Mutex;
use tracing::{debug, info};

use citerag_core::error::{Error, Result};
use citerag_core::traits::DenseIndex;
use citerag_core::types::{validate_collection, validate_roles, AccessFilter, ChunkId, DenseRecord, Roles, SearchHit, SourceKind};

use crate::schema::{build_dense_schema, dense_table, META_TABLE};
use crate::table::{ensure_table, get_meta, open_db, set_meta, sql_literal, table_exists};
use crate::{check_dims, rank_hits};

pub struct LanceDenseIndex {
    conn: Connection,
    write_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

fn encode_roles(roles: &Roles) -> String {
    if roles.is_empty() {
        String::new()
    } else {
        format!("|{}|", roles.iter().cloned().collect::<Vec<_>>().join("|"))
    }
}

fn decode_roles(encoded: &str) -> Roles {
    encoded.split('|').filter(|r| !r.is_empty()).map(str::to_string).collect()
}

fn role_predicate(filter: &AccessFilter) -> String {
    match &filter.role {
        None => "roles = ''".to_string(),
        Some(role) => format!("roles = '' OR roles LIKE {}", sql_literal(&format!("%|{role}|%"))),
    }
}

fn model_key(collection: &str) -> String { format!("embedder_id:{collection}") }

fn dim_key(collection: &str) -> String { format!("dim:{collection}") }

fn to_record_batch(records: &[DenseRecord], dim: usize) -> Result<RecordBatch> {
    let mut vectors = FixedSizeListBuilder::new(Float32Builder::with_capacity(records.len() * dim), dim as i32);
    for r in records {
        vectors.values().append_slice(&r.vector);
        vectors.append(true);
    }
    RecordBatch::try_new(
        build_dense_schema(dim),
        vec![
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.chunk_id.as_str()))),
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.document_id.as_str()))),
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| encode_roles(&r.access_roles)))),
            Arc::new(vectors.finish()),
        ],
    )
    .map_err(Error::index)
}

impl LanceDenseIndex {
    pub async fn open(uri: &str) -> Result<Self> {
        let conn = open_db(uri).await?;
        info!(uri, "opened lance dense index");
        Ok(Self { conn, write_locks: std::sync::Mutex::new(HashMap::new()) })
    }

    /// Writes to one collection's table are serialized; other collections proceed.
    fn write_lock(&self, collection: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.write_locks.lock().map_err(|_| Error::IndexUnavailable("lance lock registry poisoned".into()))?;
        Ok(locks.entry(collection.to_string()).or_default().clone())
    }

    async fn row_count(&self, table: &str) -> Result<usize> {
        if !table_exists(&self.conn, table).await? {
            return Ok(0);
        }
        let t = self.conn.open_table(table).execute().await.map_err(Error::index)?;
        t.count_rows(None).await.map_err(Error::index)
    }

    async fn stored_dim(&self, collection: &str) -> Result<Option<usize>> {
        Ok(get_meta(&self.conn, META_TABLE, &dim_key(collection)).await?.and_then(|d| d.parse().ok()))
    }
}

#[async_trait]
impl DenseIndex for LanceDenseIndex {
    async fn upsert(&self, collection: &str, model_id: &str, records: Vec<DenseRecord>) -> Result<()> {
        validate_collection(collection)?;
        records.iter().try_for_each(|r| validate_roles(&r.access_roles))?;
        let Some(dim) = records.first().map(|r| r.vector.len()) else { return Ok(()) };
        check_dims(&records, dim)?;
        let lock = self.write_lock(collection)?;
        let _guard = lock.lock().await;
        let table = dense_table(collection);

        if self.row_count(&table).await? > 0 {
            if let Some(expected) = get_meta(&self.conn, META_TABLE, &model_key(collection)).await? {
                if expected != model_id {
                    return Err(Error::ModelMismatch { collection: collection.to_string(), expected, actual: model_id.to_string() });
                }
            }
            if let Some(expected) = self.stored_dim(collection).await? {
                if expected != dim {
                    return Err(Error::DimensionMismatch { expected, actual: dim });
                }
            }
        } else if let Some(expected) = self.stored_dim(collection).await? {
            // an emptied table keeps its vector width
            if table_exists(&self.conn, &table).await? && expected != dim {
                return Err(Error::DimensionMismatch { expected, actual: dim });
            }
        }

        ensure_table(&self.conn, &table, build_dense_schema(dim)).await?;
        let batch = to_record_batch(&records, dim)?;
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), build_dense_schema(dim)));
        let t = self.conn.open_table(&table).execute().await.map_err(Error::index)?;
        let mut mi = t.merge_insert(&["chunk_id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(Error::index)?;

        set_meta(&self.conn, META_TABLE, &model_key(collection), model_id).await?;
        set_meta(&self.conn, META_TABLE, &dim_key(collection), &dim.to_string()).await?;
        debug!(collection, upserted = records.len(), "lance upsert");
        Ok(())
    }

    async fn remove(&self, collection: &str, chunk_ids: &[ChunkId]) -> Result<()> {
        validate_collection(collection)?;
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let lock = self.write_lock(collection)?;
        let _guard = lock.lock().await;
        let table = dense_table(collection);
        if !table_exists(&self.conn, &table).await? {
            return Ok(());
        }
        let t = self.conn.open_table(&table).execute().await.map_err(Error::index)?;
        let list = chunk_ids.iter().map(|id| sql_literal(id)).collect::<Vec<_>>().join(", ");
        t.delete(&format!("chunk_id IN ({list})")).await.map_err(Error::index)?;
        Ok(())
    }

    async fn search(&self, collection: &str, vector: &[f32], k: usize, filter: &AccessFilter) -> Result<Vec<SearchHit>> {
        validate_collection(collection)?;
        filter.validate()?;
        let table = dense_table(collection);
        if k == 0 || self.row_count(&table).await? == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.stored_dim(collection).await? {
            if expected != vector.len() {
                return Err(Error::DimensionMismatch { expected, actual: vector.len() });
            }
        }
        let t = self.conn.open_table(&table).execute().await.map_err(Error::index)?;
        let mut stream = t
            .vector_search(vector.to_vec())
            .map_err(Error::index)?
            .distance_type(DistanceType::Cosine)
            .only_if(role_predicate(filter))
            .limit(k)
            .execute()
            .await
            .map_err(Error::index)?;
        let mut hits = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::index)? {
            let ids = batch.column_by_name("chunk_id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let roles = batch.column_by_name("roles").and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            let (Some(ids), Some(roles), Some(distances)) = (ids, roles, distances) else {
                return Err(Error::IndexUnavailable(format!("unexpected columns in {table}")));
            };
            for i in 0..batch.num_rows() {
                if !filter.permits(&decode_roles(roles.value(i))) {
                    continue;
                }
                hits.push(SearchHit { id: ids.value(i).to_string(), score: 1.0 - distances.value(i), source: SourceKind::Dense });
            }
        }
        Ok(rank_hits(hits, k))
    }

    async fn model_id(&self, collection: &str) -> Result<Option<String>> {
        validate_collection(collection)?;
        if self.row_count(&dense_table(collection)).await? == 0 {
            return Ok(None);
        }
        get_meta(&self.conn, META_TABLE, &model_key(collection)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_round_trip_through_column_encoding() {
        let roles: Roles = ["hr".to_string(), "finance".to_string()].into_iter().collect();
        assert_eq!(encode_roles(&roles), "|finance|hr|");
        assert_eq!(decode_roles(&encode_roles(&roles)), roles);
        assert_eq!(encode_roles(&Roles::new()), "");
    }

    #[test]
    fn role_predicate_matches_delimited_role() {
        assert_eq!(role_predicate(&AccessFilter::public()), "roles = ''");
        assert_eq!(role_predicate(&AccessFilter::for_role("finance")), "roles = '' OR roles LIKE '%|finance|%'");
    }
}

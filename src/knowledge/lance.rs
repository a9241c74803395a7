//! LanceDB Vector Store - 영속 벡터 인덱스
//!
//! 디스크 레이아웃은 LanceDB가 전적으로 소유합니다.
//! 이 모듈은 디렉토리를 생성/재사용하고 레코드를 추가, 검색, 삭제합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase, Select};

use super::chunker::{Chunk, Metadata};
use super::vector::{VectorEntry, VectorHit, VectorStore};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunks";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    db: Connection,
    dimension: i32,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기 (없으면 생성, 있으면 재사용)
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let dimension = i32::try_from(dimension).context("Embedding dimension too large")?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        tracing::debug!("Vector store opened at {:?} (dim={})", path, dimension);

        Ok(Self { db, dimension })
    }

    /// 벡터 테이블 스키마 생성
    fn create_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[VectorEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }

        if let Some(bad) = entries
            .iter()
            .find(|e| e.embedding.len() != self.dimension as usize)
        {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                bad.embedding.len()
            );
        }

        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let sources: Vec<&str> = entries.iter().map(|e| e.source.as_str()).collect();
        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        let metadata: Vec<String> = entries
            .iter()
            .map(|e| serde_json::to_string(&e.metadata))
            .collect::<serde_json::Result<_>>()
            .context("Failed to serialize chunk metadata")?;

        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(self.create_schema()),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(sources)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.iter().any(|n| n == TABLE_NAME))
            .unwrap_or(false)
    }

    /// 기존 테이블 열기 (없으면 None)
    async fn open_table(&self) -> Result<Option<lancedb::table::Table>> {
        if !self.table_exists().await {
            return Ok(None);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table")?;

        Ok(Some(table))
    }

    /// 테이블 삭제 (전체 레코드 제거)
    pub async fn drop_all(&self) -> Result<()> {
        if self.table_exists().await {
            self.db
                .drop_table(TABLE_NAME)
                .await
                .context("Failed to drop table")?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.open_table().await? {
            Some(table) => {
                table
                    .add(batches)
                    .execute()
                    .await
                    .context("Failed to add vectors to table")?;
            }
            None => {
                self.db
                    .create_table(TABLE_NAME, batches)
                    .execute()
                    .await
                    .context("Failed to create table")?;
            }
        }

        Ok(entries.len())
    }

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let results = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = results.try_collect().await?;
        let mut hits = Vec::new();

        for batch in batches {
            let texts = string_column(&batch, "text")?;
            let metadata = string_column(&batch, "metadata")?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                hits.push(VectorHit {
                    chunk: Chunk::new(texts.value(i), parse_metadata(metadata.value(i))?),
                    distance: distances.value(i),
                });
            }
        }

        // 거리 오름차순 (동점은 엔진 반환 순서 유지)
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);

        Ok(hits)
    }

    async fn list_metadata(&self) -> Result<Vec<Metadata>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let total = table.count_rows(None).await.context("Failed to count rows")?;
        if total == 0 {
            return Ok(vec![]);
        }

        let results = table
            .query()
            .select(Select::columns(&["metadata"]))
            .limit(total)
            .execute()
            .await
            .context("Failed to scan metadata")?;

        let batches: Vec<RecordBatch> = results.try_collect().await?;
        let mut all = Vec::with_capacity(total);

        for batch in batches {
            let metadata = string_column(&batch, "metadata")?;
            for i in 0..batch.num_rows() {
                all.push(parse_metadata(metadata.value(i))?);
            }
        }

        Ok(all)
    }

    async fn delete_by_source(&self, source: &str) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let filter = format!("source = {}", sql_string_literal(source));

        let matching = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count rows for source")?;

        if matching == 0 {
            return Ok(0);
        }

        table
            .delete(&filter)
            .await
            .context("Failed to delete vectors")?;

        Ok(matching)
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let list = ids
            .iter()
            .map(|id| sql_string_literal(id))
            .collect::<Vec<_>>()
            .join(", ");
        let filter = format!("id IN ({})", list);

        let matching = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count rows for ids")?;

        if matching > 0 {
            table
                .delete(&filter)
                .await
                .context("Failed to delete vectors by id")?;
        }

        Ok(matching)
    }

    async fn count(&self) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Utf8 컬럼 추출
fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

/// JSON 메타데이터 파싱
fn parse_metadata(raw: &str) -> Result<Metadata> {
    serde_json::from_str(raw).context("Failed to parse chunk metadata")
}

/// SQL 문자열 리터럴 (작은따옴표 이스케이프)
fn sql_string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::source_metadata;
    use tempfile::TempDir;

    const DIM: usize = 8;

    fn create_test_entry(source: &str, index: usize, fill: f32) -> VectorEntry {
        let chunk = Chunk::new(
            format!("Test chunk {} for {}", index, source),
            source_metadata(source),
        );
        let mut embedding = vec![0.0; DIM];
        embedding[index % DIM] = fill;
        VectorEntry::new(&chunk, embedding)
    }

    #[tokio::test]
    async fn test_lance_store_basic() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("test.lance"), DIM)
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.list_metadata().await.unwrap().is_empty());

        let entries = vec![create_test_entry("a.md", 0, 1.0), create_test_entry("a.md", 1, 1.0)];
        assert_eq!(store.insert_batch(&entries).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 2);

        let metadata = store.list_metadata().await.unwrap();
        assert_eq!(metadata.len(), 2);
        assert!(metadata.iter().all(|m| m["source"] == "a.md"));
    }

    #[tokio::test]
    async fn test_lance_search_nearest_first() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("search.lance"), DIM)
            .await
            .unwrap();

        let entries = vec![
            create_test_entry("a.md", 0, 1.0),
            create_test_entry("b.md", 1, 1.0),
            create_test_entry("c.md", 2, 1.0),
        ];
        store.insert_batch(&entries).await.unwrap();

        let mut query = vec![0.0; DIM];
        query[1] = 1.0;
        let hits = store.search(&query, 2).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.source(), "b.md");
        assert!(hits[0].distance <= hits[1].distance);

        // k가 저장 개수보다 크면 전부 반환
        let hits = store.search(&query, 10).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_lance_delete_by_source() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("delete.lance"), DIM)
            .await
            .unwrap();

        let entries = vec![
            create_test_entry("it's.md", 0, 1.0),
            create_test_entry("it's.md", 1, 1.0),
            create_test_entry("b.md", 2, 1.0),
        ];
        store.insert_batch(&entries).await.unwrap();

        assert_eq!(store.delete_by_source("it's.md").await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 1);

        // 없는 source는 no-op
        assert_eq!(store.delete_by_source("missing.md").await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lance_delete_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("ids.lance"), DIM)
            .await
            .unwrap();

        let entries = vec![
            create_test_entry("a.md", 0, 1.0),
            create_test_entry("a.md", 1, 1.0),
            create_test_entry("b.md", 2, 1.0),
        ];
        store.insert_batch(&entries).await.unwrap();

        let ids = vec![entries[0].id.clone(), entries[2].id.clone()];
        assert_eq!(store.delete_ids(&ids).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.list_metadata().await.unwrap()[0]["source"], "a.md");

        assert_eq!(store.delete_ids(&[]).await.unwrap(), 0);
        assert_eq!(store.delete_ids(&ids).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lance_rejects_dimension_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("dim.lance"), DIM)
            .await
            .unwrap();

        let chunk = Chunk::new("short", source_metadata("a.md"));
        let entry = VectorEntry::new(&chunk, vec![1.0; DIM - 1]);
        assert!(store.insert_batch(&[entry]).await.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lance_drop_all() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("drop.lance"), DIM)
            .await
            .unwrap();

        // 빈 저장소에서도 안전
        store.drop_all().await.unwrap();

        store
            .insert_batch(&[create_test_entry("a.md", 0, 1.0)])
            .await
            .unwrap();
        store.drop_all().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn test_sql_string_literal() {
        assert_eq!(sql_string_literal("a.md"), "'a.md'");
        assert_eq!(sql_string_literal("it's"), "'it''s'");
    }
}

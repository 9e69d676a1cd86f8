#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use itertools::Itertools;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{ChunkMetadata, EmbeddingRecord};
use crate::config::Config;
use crate::{RagError, Result};

/// Persistent similarity index backed by a LanceDB table
///
/// Reads share the table lock; `upsert` and `delete` take it exclusively so
/// a search never observes a partially applied write.
pub struct VectorStore {
    connection: Connection,
    location: PathBuf,
    collection_name: String,
    write_batch_size: usize,
    table: RwLock<Option<Table>>,
}

/// Search result from vector similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub content: String,
    pub metadata: ChunkMetadata,
    /// Cosine distance to the query
    pub distance: f32,
    /// `1 - distance`
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Id(String),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub count: usize,
    pub name: String,
    pub location: PathBuf,
}

impl VectorStore {
    /// Open the collection configured in `config`
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_at(
            config.vector_database_path(),
            &config.storage.collection_name,
            config.storage.write_batch_size,
        )
        .await
    }

    /// Open (or prepare) a collection stored under `location`
    ///
    /// The table itself is created lazily by the first upsert, once the
    /// vector dimension is known.
    #[inline]
    pub async fn open_at<P: AsRef<Path>>(
        location: P,
        collection_name: &str,
        write_batch_size: usize,
    ) -> Result<Self> {
        let location = location.as_ref().to_path_buf();
        debug!("Initializing LanceDB at path: {:?}", location);

        std::fs::create_dir_all(&location).map_err(|e| {
            RagError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = location.display().to_string();
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        let table_names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables: {}", e)))?;

        let table = if table_names.iter().any(|name| name == collection_name) {
            debug!("Opening existing collection {}", collection_name);
            Some(
                connection
                    .open_table(collection_name)
                    .execute()
                    .await
                    .map_err(|e| RagError::Database(format!("Failed to open table: {}", e)))?,
            )
        } else {
            None
        };

        info!(
            "Vector store ready: collection {} at {}",
            collection_name,
            location.display()
        );

        Ok(Self {
            connection,
            location,
            collection_name: collection_name.to_string(),
            write_batch_size: write_batch_size.max(1),
            table: RwLock::new(table),
        })
    }

    #[inline]
    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    #[inline]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Insert or replace records by id
    ///
    /// Records are written in batches of `write_batch_size`. Batches written
    /// before a failure stay committed; the error names the failing batch.
    /// Returns the number of distinct records written.
    #[inline]
    pub async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize> {
        let records = dedupe_by_id(records);
        let Some(first) = records.first() else {
            debug!("No embeddings to store");
            return Ok(0);
        };

        let dimension = first.vector.len();
        if dimension == 0 {
            return Err(RagError::IndexWrite {
                batch: 0,
                message: "embedding vectors must not be empty".to_string(),
            });
        }
        if let Some(position) = records.iter().position(|r| r.vector.len() != dimension) {
            return Err(RagError::IndexWrite {
                batch: position / self.write_batch_size,
                message: format!(
                    "record {} has dimension {}, expected {}",
                    records[position].id,
                    records[position].vector.len(),
                    dimension
                ),
            });
        }

        let mut guard = self.table.write().await;
        let table = match guard.as_ref() {
            Some(table) => table.clone(),
            None => {
                info!(
                    "Creating collection {} with {} dimensions",
                    self.collection_name, dimension
                );
                let table = self
                    .connection
                    .create_empty_table(&self.collection_name, create_schema(dimension))
                    .execute()
                    .await
                    .map_err(|e| RagError::IndexWrite {
                        batch: 0,
                        message: format!("Failed to create table: {}", e),
                    })?;
                *guard = Some(table.clone());
                table
            }
        };

        let existing_dimension = vector_dimension(&table).await?;
        if existing_dimension != dimension {
            return Err(RagError::IndexWrite {
                batch: 0,
                message: format!(
                    "collection {} stores {}-dimensional vectors, got {}",
                    self.collection_name, existing_dimension, dimension
                ),
            });
        }

        let was_empty = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?
            == 0;

        for (batch_index, batch) in records.chunks(self.write_batch_size).enumerate() {
            let index_write = |message: String| RagError::IndexWrite {
                batch: batch_index,
                message,
            };

            let record_batch = create_record_batch(batch, dimension).map_err(index_write)?;
            let schema = record_batch.schema();
            let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

            if was_empty {
                // ids are unique within this call, nothing to match against
                table
                    .add(reader)
                    .execute()
                    .await
                    .map_err(|e| index_write(format!("Failed to insert embeddings: {}", e)))?;
            } else {
                let mut merge = table.merge_insert(&["id"]);
                merge
                    .when_matched_update_all(None)
                    .when_not_matched_insert_all();
                merge
                    .execute(Box::new(reader))
                    .await
                    .map_err(|e| index_write(format!("Failed to upsert embeddings: {}", e)))?;
            }

            debug!(
                "Wrote batch {} ({} records) to {}",
                batch_index,
                batch.len(),
                self.collection_name
            );
        }

        info!(
            "Upserted {} embeddings into {}",
            records.len(),
            self.collection_name
        );
        Ok(records.len())
    }

    /// Nearest records to `query_vector` by cosine distance, closest first
    ///
    /// Returns at most `k` results; an empty or missing collection yields none.
    #[inline]
    pub async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        debug!("Searching for similar vectors with limit: {}", k);

        let guard = self.table.read().await;
        let Some(table) = guard.as_ref() else {
            return Ok(Vec::new());
        };
        if k == 0 || row_count(table).await? == 0 {
            return Ok(Vec::new());
        }

        let dimension = vector_dimension(table).await?;
        if query_vector.len() != dimension {
            return Err(RagError::Database(format!(
                "Query vector has dimension {}, collection expects {}",
                query_vector.len(),
                dimension
            )));
        }

        let mut results = table
            .vector_search(query_vector)
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {}", e)))?;

        let mut search_results = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            search_results.extend(parse_search_batch(&batch)?);
        }

        search_results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        search_results.truncate(k);

        debug!("Found {} search results", search_results.len());
        Ok(search_results)
    }

    /// Fetch a record by id
    #[inline]
    pub async fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>> {
        let guard = self.table.read().await;
        let Some(table) = guard.as_ref() else {
            return Ok(None);
        };

        let batches: Vec<RecordBatch> = table
            .query()
            .only_if(id_predicate(id))
            .limit(1)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to query record: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read record: {}", e)))?;

        for batch in &batches {
            if let Some(record) = parse_records(batch)?.into_iter().next() {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Number of records in the collection
    #[inline]
    pub async fn count(&self) -> Result<usize> {
        let guard = self.table.read().await;
        match guard.as_ref() {
            Some(table) => row_count(table).await,
            None => Ok(0),
        }
    }

    /// Remove one record or the whole collection
    ///
    /// Deleting from a collection that does not exist is a no-op.
    #[inline]
    pub async fn delete(&self, target: DeleteTarget) -> Result<()> {
        let mut guard = self.table.write().await;

        match target {
            DeleteTarget::Id(id) => {
                if let Some(table) = guard.as_ref() {
                    debug!("Deleting embedding {}", id);
                    table.delete(&id_predicate(&id)).await.map_err(|e| {
                        RagError::Database(format!("Failed to delete embedding: {}", e))
                    })?;
                }
            }
            DeleteTarget::All => {
                let table_names =
                    self.connection.table_names().execute().await.map_err(|e| {
                        RagError::Database(format!("Failed to list tables for drop: {}", e))
                    })?;

                if table_names.contains(&self.collection_name) {
                    info!("Dropping collection {}", self.collection_name);
                    self.connection
                        .drop_table(&self.collection_name)
                        .await
                        .map_err(|e| RagError::Database(format!("Failed to drop table: {}", e)))?;
                } else {
                    debug!(
                        "Collection {} does not exist, nothing to drop",
                        self.collection_name
                    );
                }
                *guard = None;
            }
        }

        Ok(())
    }

    /// Sorted, deduplicated source names across all records
    #[inline]
    pub async fn list_sources(&self) -> Result<Vec<String>> {
        let guard = self.table.read().await;
        let Some(table) = guard.as_ref() else {
            return Ok(Vec::new());
        };

        let total = row_count(table).await?;
        if total == 0 {
            return Ok(Vec::new());
        }

        let batches: Vec<RecordBatch> = table
            .query()
            .select(Select::columns(&["source"]))
            .limit(total)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to query sources: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read sources: {}", e)))?;

        let mut sources = Vec::with_capacity(total);
        for batch in &batches {
            let column = typed_column::<StringArray>(batch, "source")?;
            sources.extend(column.iter().flatten().map(str::to_string));
        }

        Ok(sources.into_iter().sorted().dedup().collect())
    }

    #[inline]
    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            count: self.count().await?,
            name: self.collection_name.clone(),
            location: self.location.clone(),
        })
    }
}

/// Keep the last occurrence of every id, in first-seen order
fn dedupe_by_id(records: Vec<EmbeddingRecord>) -> Vec<EmbeddingRecord> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<EmbeddingRecord> = Vec::with_capacity(records.len());

    for record in records {
        if let Some(&position) = positions.get(&record.id) {
            warn!("Duplicate record id {} in upsert, keeping the last", record.id);
            unique[position] = record;
        } else {
            positions.insert(record.id.clone(), unique.len());
            unique.push(record);
        }
    }

    unique
}

fn id_predicate(id: &str) -> String {
    format!("id = '{}'", id.replace('\'', "''"))
}

async fn row_count(table: &Table) -> Result<usize> {
    table
        .count_rows(None)
        .await
        .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))
}

async fn vector_dimension(table: &Table) -> Result<usize> {
    let schema = table
        .schema()
        .await
        .map_err(|e| RagError::Database(format!("Failed to get table schema: {}", e)))?;

    let field = schema
        .field_with_name("vector")
        .map_err(|e| RagError::Database(format!("Missing vector column: {}", e)))?;

    match field.data_type() {
        DataType::FixedSizeList(_, size) => usize::try_from(*size)
            .map_err(|e| RagError::Database(format!("Invalid vector dimension: {}", e))),
        other => Err(RagError::Database(format!(
            "Unexpected vector column type: {}",
            other
        ))),
    }
}

fn create_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                i32::try_from(dimension).unwrap_or(i32::MAX),
            ),
            false,
        ),
        Field::new("source", DataType::Utf8, false),
        Field::new("file_path", DataType::Utf8, false),
        Field::new("chunk_index", DataType::UInt32, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("extra", DataType::Utf8, false),
        Field::new("indexed_at", DataType::Utf8, false),
    ]))
}

fn create_record_batch(
    records: &[EmbeddingRecord],
    dimension: usize,
) -> std::result::Result<RecordBatch, String> {
    let len = records.len();
    let indexed_at = chrono::Utc::now().to_rfc3339();

    let mut ids = Vec::with_capacity(len);
    let mut flat_values = Vec::with_capacity(len * dimension);
    let mut sources = Vec::with_capacity(len);
    let mut file_paths = Vec::with_capacity(len);
    let mut chunk_indices = Vec::with_capacity(len);
    let mut contents = Vec::with_capacity(len);
    let mut extras = Vec::with_capacity(len);

    for record in records {
        ids.push(record.id.as_str());
        flat_values.extend_from_slice(&record.vector);
        sources.push(record.metadata.source.as_str());
        file_paths.push(record.metadata.file_path.as_str());
        chunk_indices.push(record.metadata.chunk_index);
        contents.push(record.content.as_str());
        extras.push(
            serde_json::to_string(&record.metadata.extra)
                .map_err(|e| format!("Failed to encode metadata: {}", e))?,
        );
    }

    let field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array = FixedSizeListArray::try_new(
        field,
        i32::try_from(dimension).map_err(|e| e.to_string())?,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| format!("Failed to create vector array: {}", e))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(vector_array),
        Arc::new(StringArray::from(sources)),
        Arc::new(StringArray::from(file_paths)),
        Arc::new(UInt32Array::from(chunk_indices)),
        Arc::new(StringArray::from(contents)),
        Arc::new(StringArray::from(extras)),
        Arc::new(StringArray::from(vec![indexed_at.as_str(); len])),
    ];

    RecordBatch::try_new(create_schema(dimension), arrays)
        .map_err(|e| format!("Failed to create record batch: {}", e))
}

fn typed_column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

/// Metadata and content columns shared by search and lookup results
struct RowColumns<'a> {
    sources: &'a StringArray,
    file_paths: &'a StringArray,
    chunk_indices: &'a UInt32Array,
    contents: &'a StringArray,
    extras: &'a StringArray,
}

impl<'a> RowColumns<'a> {
    fn new(batch: &'a RecordBatch) -> Result<Self> {
        Ok(Self {
            sources: typed_column(batch, "source")?,
            file_paths: typed_column(batch, "file_path")?,
            chunk_indices: typed_column(batch, "chunk_index")?,
            contents: typed_column(batch, "content")?,
            extras: typed_column(batch, "extra")?,
        })
    }

    fn metadata(&self, row: usize) -> ChunkMetadata {
        let extra: BTreeMap<String, String> = serde_json::from_str(self.extras.value(row))
            .unwrap_or_else(|e| {
                warn!("Ignoring unreadable metadata in row {}: {}", row, e);
                BTreeMap::new()
            });

        ChunkMetadata {
            source: self.sources.value(row).to_string(),
            file_path: self.file_paths.value(row).to_string(),
            chunk_index: self.chunk_indices.value(row),
            extra,
        }
    }

    fn content(&self, row: usize) -> String {
        self.contents.value(row).to_string()
    }
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
    let columns = RowColumns::new(batch)?;
    let distances = typed_column::<Float32Array>(batch, "_distance")?;

    Ok((0..batch.num_rows())
        .map(|row| {
            let distance = distances.value(row);
            SearchResult {
                content: columns.content(row),
                metadata: columns.metadata(row),
                distance,
                score: 1.0 - distance,
            }
        })
        .collect())
}

fn parse_records(batch: &RecordBatch) -> Result<Vec<EmbeddingRecord>> {
    let columns = RowColumns::new(batch)?;
    let ids = typed_column::<StringArray>(batch, "id")?;
    let vectors = typed_column::<FixedSizeListArray>(batch, "vector")?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let values = vectors.value(row);
        let vector = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| RagError::Database("Invalid vector values type".to_string()))?
            .values()
            .to_vec();

        records.push(EmbeddingRecord {
            id: ids.value(row).to_string(),
            vector,
            content: columns.content(row),
            metadata: columns.metadata(row),
        });
    }
    Ok(records)
}

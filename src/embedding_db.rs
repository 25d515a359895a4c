use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::Result;

const EMBEDDINGS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("embeddings");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const DIMENSION_KEY: &str = "dimension";

/// Header size: 4 bytes vector dimension.
const HEADER_SIZE: usize = 4;

/// Stores one embedding vector per document id.
///
/// Binary format per entry:
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 values
///
/// The dimension of the embedder that wrote the vectors is kept in a
/// separate `meta` table.
pub struct EmbeddingDb {
    db: Database,
}

fn encode(data: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + size_of_val(data));
    bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(data));
    bytes
}

/// Decode an entry; `None` when the length does not match the header.
fn decode(bytes: &[u8]) -> Option<Vec<f32>> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    let dimension = u32::from_le_bytes(header) as usize;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != dimension * 4 {
        return None;
    }

    // redb gives no alignment guarantee, so copy value by value.
    Some(
        payload
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

impl EmbeddingDb {
    /// Open or create an embeddings database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use archivit::EmbeddingDb;
    ///
    /// let path = tmp.path().join("embeddings.redb");
    /// let db = EmbeddingDb::open(&path).unwrap();
    /// assert!(db.list_ids().unwrap().is_empty());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(EMBEDDINGS)?;
        txn.open_table(META)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Store the vector for a document, replacing any previous one.
    pub fn store(&self, doc_id: &str, data: &[f32]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(EMBEDDINGS)?;
            table.insert(doc_id, encode(data).as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Retrieve the vector for a document.
    pub fn load(&self, doc_id: &str) -> Result<Option<Vec<f32>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;

        let Some(guard) = table.get(doc_id)? else {
            return Ok(None);
        };
        Ok(decode(guard.value()))
    }

    /// Remove a vector entry.
    pub fn remove(&self, doc_id: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(EMBEDDINGS)?;
            table.remove(doc_id)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Remove `removals`, store `entries` and record `dimension`, all in a
    /// single transaction.
    pub fn write_batch(
        &self,
        removals: &[String],
        entries: &[(String, Vec<f32>)],
        dimension: usize,
    ) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(EMBEDDINGS)?;
            for doc_id in removals {
                table.remove(doc_id.as_str())?;
            }
            for (doc_id, data) in entries {
                table.insert(doc_id.as_str(), encode(data).as_slice())?;
            }

            let mut meta = txn.open_table(META)?;
            meta.insert(DIMENSION_KEY, dimension as u64)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Dimension recorded by the last [`EmbeddingDb::write_batch`], if any.
    pub fn dimension(&self) -> Result<Option<usize>> {
        let txn = self.db.begin_read()?;
        let meta = txn.open_table(META)?;
        Ok(meta.get(DIMENSION_KEY)?.map(|guard| guard.value() as usize))
    }

    /// Load multiple vectors in a single transaction, preserving input
    /// order. Missing or malformed entries come back as `None`.
    pub fn batch_load(
        &self,
        doc_ids: &[String],
    ) -> Result<Vec<(String, Option<Vec<f32>>)>> {
        if doc_ids.is_empty() {
            return Ok(Vec::new());
        }

        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;

        let mut results = Vec::with_capacity(doc_ids.len());
        for doc_id in doc_ids {
            let vector = table
                .get(doc_id.as_str())?
                .and_then(|guard| decode(guard.value()));
            results.push((doc_id.clone(), vector));
        }

        Ok(results)
    }

    /// List all stored document ids.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            result.push(k.value().to_string());
        }
        Ok(result)
    }
}

impl std::fmt::Debug for EmbeddingDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingDb").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, EmbeddingDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db =
            EmbeddingDb::open(&tmp.path().join("embeddings.redb")).unwrap();
        (tmp, db)
    }

    #[test]
    fn store_and_load() {
        let (_tmp, db) = test_db();

        let data: Vec<f32> = (0..12).map(|i| i as f32 * 0.1).collect();
        db.store("doc1", &data).unwrap();

        assert_eq!(db.load("doc1").unwrap().unwrap(), data);
    }

    #[test]
    fn load_missing_returns_none() {
        let (_tmp, db) = test_db();
        assert!(db.load("nope").unwrap().is_none());
    }

    #[test]
    fn remove_entry() {
        let (_tmp, db) = test_db();

        db.store("doc1", &[1.0, 2.0]).unwrap();
        assert!(db.remove("doc1").unwrap());
        assert!(db.load("doc1").unwrap().is_none());
        assert!(!db.remove("doc1").unwrap());
    }

    #[test]
    fn write_batch_stores_removes_and_records_dimension() {
        let (_tmp, db) = test_db();
        assert_eq!(db.dimension().unwrap(), None);

        db.store("b", &[2.0]).unwrap();
        db.write_batch(
            &["b".to_string()],
            &[("a".to_string(), vec![1.0]), ("c".to_string(), vec![3.0])],
            1,
        )
        .unwrap();

        let mut ids = db.list_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(db.dimension().unwrap(), Some(1));
    }

    #[test]
    fn batch_load_preserves_order_and_gaps() {
        let (_tmp, db) = test_db();

        db.store("x", &[1.0, 2.0]).unwrap();
        db.store("z", &[5.0, 6.0]).unwrap();

        let ids = ["z".to_string(), "missing".to_string(), "x".to_string()];
        let results = db.batch_load(&ids).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, "z");
        assert_eq!(results[0].1.as_deref(), Some(&[5.0, 6.0][..]));
        assert!(results[1].1.is_none());
        assert_eq!(results[2].1.as_deref(), Some(&[1.0, 2.0][..]));
    }

    #[test]
    fn overwrite_entry() {
        let (_tmp, db) = test_db();

        db.store("doc", &[1.0, 2.0]).unwrap();
        db.store("doc", &[3.0, 4.0, 5.0]).unwrap();

        assert_eq!(db.load("doc").unwrap().unwrap(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("embeddings.redb");

        {
            let db = EmbeddingDb::open(&path).unwrap();
            db.store("doc", &[1.0, 2.0]).unwrap();
        }

        {
            let db = EmbeddingDb::open(&path).unwrap();
            assert_eq!(db.load("doc").unwrap().unwrap(), vec![1.0, 2.0]);
        }
    }

    #[test]
    fn malformed_entry_decodes_to_none() {
        assert!(decode(&[1, 0, 0, 0, 0xaa]).is_none());
        assert!(decode(&[1, 0]).is_none());
        assert_eq!(decode(&encode(&[0.5])).unwrap(), vec![0.5]);
    }
}

//! Append-only flat nearest-neighbour index with a single snapshot file.
//!
//! Positions are assigned in insertion order starting at 0 and are never
//! reused; a position is the link key stored in the lexical index as
//! `embedding_id`. Every successful [`VectorIndex::add`] rewrites the whole
//! snapshot (temp file + rename) before returning.
//!
//! # Snapshot format
//!
//! ```text
//! b"DQVECIDX" | dims: u32 LE | count: u64 LE | count × dims × f32 LE
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{RagError, RagResult};

const MAGIC: &[u8; 8] = b"DQVECIDX";
const HEADER_LEN: usize = 8 + 4 + 8;

/// Result of a k-nearest-neighbour query, ordered by ascending distance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorMatches {
    /// Squared Euclidean distances.
    pub distances: Vec<f32>,
    pub positions: Vec<u64>,
}

impl VectorMatches {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

struct FlatIndex {
    dims: usize,
    /// Row-major, `len * dims` values.
    data: Vec<f32>,
}

impl FlatIndex {
    fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    fn row(&self, position: usize) -> &[f32] {
        &self.data[position * self.dims..(position + 1) * self.dims]
    }
}

pub struct VectorIndex {
    /// Writers hold the lock across append and persist.
    inner: RwLock<FlatIndex>,
    path: PathBuf,
}

impl VectorIndex {
    /// Load the snapshot at `path`, or start empty with `dims` dimensions.
    pub fn open(path: &Path, dims: usize) -> RagResult<Self> {
        let index = if path.exists() {
            let bytes = std::fs::read(path).map_err(|e| {
                RagError::IndexRead(format!("failed to read {}: {}", path.display(), e))
            })?;
            let index = decode_snapshot(&bytes)?;
            if index.dims != dims {
                return Err(RagError::IndexRead(format!(
                    "snapshot {} has {} dimensions, configured {}",
                    path.display(),
                    index.dims,
                    dims
                )));
            }
            tracing::info!(path = %path.display(), vectors = index.len(), "vector index loaded");
            index
        } else {
            FlatIndex {
                dims,
                data: Vec::new(),
            }
        };

        Ok(Self {
            inner: RwLock::new(index),
            path: path.to_path_buf(),
        })
    }

    pub fn dims(&self) -> usize {
        self.inner.read().map(|i| i.dims).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `vectors` in order and persist. Returns the assigned positions.
    ///
    /// If persisting fails the vectors stay in memory (their positions are
    /// consumed) and `IndexWrite` is returned.
    pub fn add(&self, vectors: &[Vec<f32>]) -> RagResult<Vec<u64>> {
        let mut index = self
            .inner
            .write()
            .map_err(|_| RagError::IndexWrite("vector index lock poisoned".to_string()))?;

        if let Some(bad) = vectors.iter().find(|v| v.len() != index.dims) {
            return Err(RagError::InvalidInput(format!(
                "vector has {} dimensions, index expects {}",
                bad.len(),
                index.dims
            )));
        }

        let first = index.len() as u64;
        for v in vectors {
            index.data.extend_from_slice(v);
        }
        let positions: Vec<u64> = (first..first + vectors.len() as u64).collect();

        persist(&self.path, &index)?;
        Ok(positions)
    }

    /// [`add`](Self::add) on the blocking thread pool. The snapshot rewrite
    /// ends in an fsync and must not stall a runtime worker.
    pub async fn add_async(self: &Arc<Self>, vectors: Vec<Vec<f32>>) -> RagResult<Vec<u64>> {
        let index = Arc::clone(self);
        tokio::task::spawn_blocking(move || index.add(&vectors))
            .await
            .map_err(|e| RagError::IndexWrite(format!("vector write task failed: {}", e)))?
    }

    /// [`search`](Self::search) on the blocking thread pool; a reader may
    /// wait for a writer's persist.
    pub async fn search_async(
        self: &Arc<Self>,
        query: Vec<f32>,
        k: usize,
    ) -> RagResult<VectorMatches> {
        let index = Arc::clone(self);
        tokio::task::spawn_blocking(move || index.search(&query, k))
            .await
            .map_err(|e| RagError::IndexRead(format!("vector search task failed: {}", e)))?
    }

    /// The `k` nearest stored vectors by squared Euclidean distance,
    /// ascending, ties broken by smaller position. An empty index yields an
    /// empty result.
    pub fn search(&self, query: &[f32], k: usize) -> RagResult<VectorMatches> {
        let index = self
            .inner
            .read()
            .map_err(|_| RagError::IndexRead("vector index lock poisoned".to_string()))?;

        if query.len() != index.dims {
            return Err(RagError::InvalidInput(format!(
                "query vector has {} dimensions, index expects {}",
                query.len(),
                index.dims
            )));
        }
        if k == 0 || index.len() == 0 {
            return Ok(VectorMatches::default());
        }

        let mut scored: Vec<(f32, u64)> = (0..index.len())
            .map(|pos| (squared_l2(query, index.row(pos)), pos as u64))
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        Ok(VectorMatches {
            distances: scored.iter().map(|(d, _)| *d).collect(),
            positions: scored.iter().map(|(_, p)| *p).collect(),
        })
    }
}

pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn encode_snapshot(index: &FlatIndex) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + index.data.len() * 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&(index.dims as u32).to_le_bytes());
    bytes.extend_from_slice(&(index.len() as u64).to_le_bytes());
    for &v in &index.data {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn decode_snapshot(bytes: &[u8]) -> RagResult<FlatIndex> {
    let corrupt = |why: &str| RagError::IndexRead(format!("corrupt vector snapshot: {}", why));

    if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
        return Err(corrupt("bad header"));
    }
    let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let body = &bytes[HEADER_LEN..];
    let expected = count
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| corrupt("size overflow"))?;
    if dims == 0 || body.len() != expected {
        return Err(corrupt("length does not match header"));
    }

    let data = body
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(FlatIndex { dims, data })
}

fn persist(path: &Path, index: &FlatIndex) -> RagResult<()> {
    let write_err = |e: std::io::Error| {
        RagError::IndexWrite(format!("failed to persist {}: {}", path.display(), e))
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&tmp_path).map_err(write_err)?;
    file.write_all(&encode_snapshot(index)).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    std::fs::rename(&tmp_path, path).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(tmp: &TempDir, dims: usize) -> VectorIndex {
        VectorIndex::open(&tmp.path().join("index.vec"), dims).unwrap()
    }

    #[test]
    fn test_positions_strictly_increase_across_calls() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp, 2);
        let a = index.add(&[vec![0.0, 0.0], vec![1.0, 1.0]]).unwrap();
        let b = index.add(&[vec![2.0, 2.0]]).unwrap();
        let c = index.add(&[]).unwrap();
        let d = index.add(&[vec![3.0, 3.0]]).unwrap();
        assert_eq!(a, vec![0, 1]);
        assert_eq!(b, vec![2]);
        assert!(c.is_empty());
        assert_eq!(d, vec![3]);
    }

    #[test]
    fn test_empty_index_returns_empty_result() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp, 3);
        let matches = index.search(&[0.0, 0.0, 0.0], 5).unwrap();
        assert!(matches.is_empty());
        assert!(matches.distances.is_empty());
    }

    #[test]
    fn test_fewer_than_k_entries() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp, 1);
        index.add(&[vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        let matches = index.search(&[0.0], 10).unwrap();
        assert_eq!(matches.positions.len(), 3);
    }

    #[test]
    fn test_sorted_by_distance_then_position() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp, 2);
        index
            .add(&[
                vec![3.0, 0.0],  // 0: distance 9
                vec![1.0, 0.0],  // 1: distance 1
                vec![0.0, -1.0], // 2: distance 1
                vec![0.0, 2.0],  // 3: distance 4
                vec![-1.0, 0.0], // 4: distance 1
            ])
            .unwrap();

        let matches = index.search(&[0.0, 0.0], 4).unwrap();
        assert_eq!(matches.positions, vec![1, 2, 4, 3]);
        assert_eq!(matches.distances, vec![1.0, 1.0, 1.0, 4.0]);
        for pair in matches.distances.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_dimension_mismatch_rejected_without_append() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp, 2);
        let err = index.add(&[vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
        assert_eq!(index.len(), 0);
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_snapshot_reload_gives_same_results() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("index.vec");
        let vectors: Vec<Vec<f32>> = (0..20)
            .map(|i| vec![i as f32 * 0.5, (i % 7) as f32, -(i as f32)])
            .collect();

        let queries = [vec![1.0, 2.0, -3.0], vec![0.0, 0.0, 0.0], vec![9.5, 6.0, -19.0]];
        let before: Vec<VectorMatches> = {
            let index = VectorIndex::open(&path, 3).unwrap();
            index.add(&vectors).unwrap();
            queries.iter().map(|q| index.search(q, 5).unwrap()).collect()
        };

        let reloaded = VectorIndex::open(&path, 3).unwrap();
        assert_eq!(reloaded.len(), 20);
        let after: Vec<VectorMatches> = queries
            .iter()
            .map(|q| reloaded.search(q, 5).unwrap())
            .collect();
        assert_eq!(before, after);

        // Positions continue after reload.
        assert_eq!(reloaded.add(&[vec![0.0, 0.0, 0.0]]).unwrap(), vec![20]);
    }

    #[test]
    fn test_reload_with_other_dims_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.vec");
        VectorIndex::open(&path, 2).unwrap().add(&[vec![1.0, 1.0]]).unwrap();
        assert!(VectorIndex::open(&path, 3).is_err());
    }

    #[test]
    fn test_corrupt_snapshot_detected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.vec");
        std::fs::write(&path, b"DQVECIDX\x02\x00\x00\x00\x05\x00\x00\x00\x00\x00\x00\x00").unwrap();
        let err = VectorIndex::open(&path, 2).err().unwrap();
        assert!(matches!(err, RagError::IndexRead(_)));
    }

    #[test]
    fn test_persist_failure_keeps_memory_state() {
        let tmp = TempDir::new().unwrap();
        // A directory in place of the snapshot file makes the rename fail.
        let path = tmp.path().join("index.vec");
        std::fs::create_dir_all(path.join("blocker")).unwrap();
        let index = VectorIndex::open(&tmp.path().join("missing.vec"), 1).unwrap();
        let index = VectorIndex {
            inner: index.inner,
            path: path.clone(),
        };

        let err = index.add(&[vec![1.0]]).unwrap_err();
        assert!(matches!(err, RagError::IndexWrite(_)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_concurrent_adds_get_unique_contiguous_positions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.vec");
        let index = Arc::new(VectorIndex::open(&path, 2).unwrap());

        let writers = 8;
        let batch = 3;
        let handles: Vec<_> = (0..writers)
            .map(|w| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    let vectors: Vec<Vec<f32>> =
                        (0..batch).map(|i| vec![w as f32, i as f32]).collect();
                    (w, index.add(&vectors).unwrap())
                })
            })
            .collect();
        let results: Vec<(usize, Vec<u64>)> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let mut all: Vec<u64> = Vec::new();
        for (w, positions) in &results {
            assert_eq!(positions.len(), batch);
            for pair in positions.windows(2) {
                assert_eq!(pair[1], pair[0] + 1, "writer {} interleaved", w);
            }
            // Each batch's rows landed at its own positions.
            for (i, p) in positions.iter().enumerate() {
                let found = index.search(&[*w as f32, i as f32], 1).unwrap();
                assert_eq!(found.positions, vec![*p]);
                assert_eq!(found.distances, vec![0.0]);
            }
            all.extend(positions);
        }
        all.sort_unstable();
        let expected: Vec<u64> = (0..(writers * batch) as u64).collect();
        assert_eq!(all, expected);

        let reloaded = VectorIndex::open(&path, 2).unwrap();
        assert_eq!(reloaded.len(), writers * batch);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_async_adds_from_many_tasks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.vec");
        let index = Arc::new(VectorIndex::open(&path, 1).unwrap());

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let index = Arc::clone(&index);
                tokio::spawn(async move { index.add_async(vec![vec![i as f32]]).await.unwrap() })
            })
            .collect();

        let mut positions = Vec::new();
        for task in tasks {
            positions.extend(task.await.unwrap());
        }
        positions.sort_unstable();
        assert_eq!(positions, (0..16).collect::<Vec<u64>>());

        let found = index.search_async(vec![15.0], 1).await.unwrap();
        assert_eq!(found.distances, vec![0.0]);
        assert_eq!(VectorIndex::open(&path, 1).unwrap().len(), 16);
    }
}

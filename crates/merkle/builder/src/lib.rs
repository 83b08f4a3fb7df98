//! Builds a [`Reference`] Merkle tree from a local content file (§4.8).
//!
//! Leaf hashing is parallelized across a small thread pool, each worker
//! reading a disjoint, contiguous run of chunks via positional reads; the
//! bottom-up internal-node pass that follows is cheap enough to run
//! single-threaded. The whole build runs on a blocking thread via
//! [`tokio::task::spawn_blocking`] so it never stalls the calling runtime,
//! and progress is published on a `watch` channel the caller can observe
//! independently of awaiting the result.

#![forbid(unsafe_code)]

mod config;
mod error;
mod progress;

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use calimero_merkle_shape::Shape;
use calimero_merkle_store::{MerkleHash, TreeFile};
use calimero_merkle_tree::Reference;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

pub use config::BuilderConfig;
pub use error::BuilderError;
pub use progress::{BuildProgress, BuildStage};

/// Entry point for building a Reference tree. Stateless: every call to
/// [`Builder::spawn`] is independent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Builder;

impl Builder {
    /// Spawns a build of a Reference tree for `content_path`, writing the
    /// tree file to `tree_path`. Returns immediately with a [`BuildHandle`]
    /// exposing both live progress and the eventual result.
    #[must_use]
    pub fn spawn(content_path: impl AsRef<Path>, tree_path: impl AsRef<Path>, config: BuilderConfig) -> BuildHandle {
        let content_path = content_path.as_ref().to_path_buf();
        let tree_path = tree_path.as_ref().to_path_buf();
        let (tx, rx) = watch::channel(BuildProgress::initializing(0));

        let task = tokio::task::spawn_blocking(move || build_blocking(&content_path, &tree_path, config, &tx));

        BuildHandle { progress: rx, task }
    }
}

/// A running build: a progress receiver plus the eventual [`Reference`].
#[derive(Debug)]
pub struct BuildHandle {
    progress: watch::Receiver<BuildProgress>,
    task: JoinHandle<Result<Reference, BuilderError>>,
}

impl BuildHandle {
    /// A receiver observing every stage transition this build makes.
    /// Independent of [`BuildHandle::wait`]; cloning it does not affect the
    /// underlying build.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<BuildProgress> {
        self.progress.clone()
    }

    /// Awaits the build's completion.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError`] if the build failed, or
    /// [`BuilderError::WorkerPanic`] if the build task itself panicked.
    pub async fn wait(self) -> Result<Reference, BuilderError> {
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => Err(BuilderError::WorkerPanic(join_err.to_string())),
        }
    }
}

fn build_blocking(
    content_path: &Path,
    tree_path: &PathBuf,
    config: BuilderConfig,
    progress: &watch::Sender<BuildProgress>,
) -> Result<Reference, BuilderError> {
    let content_size = std::fs::metadata(content_path)?.len();
    let shape = Shape::from_content_size(content_size, config.chunk_size)?;
    let _ = progress.send(BuildProgress::initializing(shape.total_chunks()));

    let content_file = File::open(content_path)?;
    let leaf_hashes = hash_leaves_parallel(&content_file, &shape, config.leaf_hash_threads, progress)?;

    let mut tree_file = TreeFile::create(tree_path, &shape)?;
    {
        let mut hashes = tree_file.hashes_mut();
        for (i, hash) in leaf_hashes.into_iter().enumerate() {
            let i = u32::try_from(i).unwrap_or(u32::MAX);
            hashes.set(shape.chunk_index_to_leaf_node(i), hash);
        }
        for v in (shape.leaf_offset() + shape.total_chunks())..shape.node_count() {
            hashes.set(v, MerkleHash::ZERO);
        }

        let _ = progress.send(BuildProgress::internal_hashing(shape.total_chunks()));
        for v in (0..shape.internal_count()).rev() {
            let left = hashes.get(2 * v + 1);
            let right = hashes.get(2 * v + 2);
            hashes.set(v, MerkleHash::combine(&left, &right));
        }
    }

    tree_file.bitset().set_range(0, shape.node_count());
    tree_file.flush()?;
    debug!(total_chunks = shape.total_chunks(), node_count = shape.node_count(), "reference tree built");

    let _ = progress.send(BuildProgress::completed(shape.total_chunks()));
    Ok(Reference::open(tree_path)?)
}

enum WorkerFailure {
    Io(std::io::Error),
    Panic(String),
}

/// Hashes every real leaf's content in parallel across `threads` worker
/// threads, each hashing a contiguous, disjoint run of chunks via
/// positional reads so no synchronization is needed around the file handle
/// itself (concurrent `pread`s on one `File` are safe). Returns hashes
/// indexed by chunk index, `0..shape.total_chunks()`.
fn hash_leaves_parallel(
    file: &File,
    shape: &Shape,
    threads: usize,
    progress: &watch::Sender<BuildProgress>,
) -> Result<Vec<MerkleHash>, BuilderError> {
    let total = shape.total_chunks();
    if total == 0 {
        return Ok(Vec::new());
    }
    let threads = threads.clamp(1, total as usize);
    let per_thread = total.div_ceil(threads as u32) as usize;

    let mut hashes = vec![MerkleHash::ZERO; total as usize];
    let processed = AtomicU32::new(0);

    let failure = std::thread::scope(|scope| {
        let handles: Vec<_> = hashes
            .chunks_mut(per_thread)
            .enumerate()
            .map(|(t, out_chunk)| {
                let base = u32::try_from(t * per_thread).unwrap_or(u32::MAX);
                scope.spawn(move || -> std::io::Result<()> {
                    for (offset, slot) in out_chunk.iter_mut().enumerate() {
                        let i = base + u32::try_from(offset).unwrap_or(u32::MAX);
                        let start = shape.chunk_start(i);
                        let len = shape.actual_chunk_size(i) as usize;
                        let mut buf = vec![0u8; len];
                        file.read_exact_at(&mut buf, start)?;
                        *slot = MerkleHash::sha256(&buf);

                        let done = processed.fetch_add(1, Ordering::AcqRel) + 1;
                        let _ = progress.send(BuildProgress::leaf_hashing(done, total));
                    }
                    Ok(())
                })
            })
            .collect();

        handles.into_iter().find_map(|handle| match handle.join() {
            Ok(Ok(())) => None,
            Ok(Err(io_err)) => Some(WorkerFailure::Io(io_err)),
            Err(panic_payload) => Some(WorkerFailure::Panic(panic_message(&panic_payload))),
        })
    });

    match failure {
        None => Ok(hashes),
        Some(WorkerFailure::Io(err)) => Err(BuilderError::Io(err)),
        Some(WorkerFailure::Panic(msg)) => Err(BuilderError::WorkerPanic(msg)),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker thread panicked".to_owned())
}

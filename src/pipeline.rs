use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ninja_file::{split_into_blocks, BlockParameters, Disk, FileSystem};
use ninja_parse::{
    expand_into_scope, join_task, parse_fragment, parse_target, ChildScheduler, Error,
    ParseHandle, ParseResult, RawTargetMap, ScopeArena, Target,
};
use tracing::debug;

#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

/// Orchestrates loading a tree of ninja files.
///
/// Each file is read, split into blocks on statement boundaries, and the
/// blocks are parsed as independent tasks; included files parse concurrently
/// with their parents (plain include paths are scheduled the moment their
/// statement is parsed). Scope expansion then stitches the per-file results
/// together in source order, and a final parallel pass parses the `build`
/// statements against the settled scopes.
///
/// All task results are awaited in a deterministic order, so the output, and
/// which error wins when several statements are bad, does not depend on task
/// scheduling.
pub struct Pipeline {
    base_path: PathBuf,
    fs: Arc<dyn FileSystem>,
    block_size: Option<usize>,
    interrupted: AtomicBool,
}

impl Pipeline {
    pub fn new(base_path: impl Into<PathBuf>) -> Pipeline {
        Pipeline {
            base_path: base_path.into(),
            fs: Arc::new(Disk),
            block_size: None,
            interrupted: AtomicBool::new(false),
        }
    }

    pub fn with_fs(mut self, fs: Arc<dyn FileSystem>) -> Pipeline {
        self.fs = fs;
        self
    }

    /// Fixes the block size instead of deriving it from file size and core
    /// count. Any size yields identical results; small sizes are useful to
    /// exercise block boundaries.
    pub fn block_size(mut self, block_size: usize) -> Pipeline {
        self.block_size = Some(block_size);
        self
    }

    /// Requests cancellation. In-flight tasks stop at their next suspension
    /// point and the load resolves to [`Error::Interrupted`].
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    pub fn check_interrupted(&self) -> Result<(), Error> {
        if self.interrupted.load(Ordering::Relaxed) {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    /// Loads `main_file` (relative to the base path) and everything it
    /// includes. Returns the settled scope tree and all build edges, in
    /// breadth-first scope order, statement order within each scope.
    pub async fn load(
        self: &Arc<Self>,
        main_file: impl AsRef<Path>,
    ) -> Result<(Arc<ScopeArena>, Vec<Target>), Error> {
        let result = join_task(self.schedule_parsing(self.base_path.join(main_file))).await?;

        let (mut arena, root) = ScopeArena::new();
        let mut raw_targets = RawTargetMap::new();
        let scheduler = Scheduler(Arc::clone(self));
        expand_into_scope(result, root, &mut arena, &mut raw_targets, &scheduler).await?;

        let arena = Arc::new(arena);
        let targets = self.parse_targets(Arc::clone(&arena), raw_targets).await?;
        Ok((arena, targets))
    }

    /// Spawns the parse of one file on the worker pool.
    fn schedule_parsing(self: &Arc<Self>, path: PathBuf) -> ParseHandle {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline
                .parse_file(&path)
                .await
                .map_err(|e| e.with_file(&path))
        })
    }

    // Structural pass for one file: block-parallel parse, merge in byte
    // order. Fail-fast, and because the per-block tasks are awaited in
    // block order the winning error is deterministic too.
    async fn parse_file(self: &Arc<Self>, path: &Path) -> Result<ParseResult, Error> {
        self.check_interrupted()?;
        let file_size = self.fs.file_size(path).await?;
        let params = match self.block_size {
            Some(size) => BlockParameters::with_block_size(size),
            None => BlockParameters::new(file_size),
        };
        let buf: Arc<[u8]> = Arc::from(self.fs.read(path).await?.into_boxed_slice());
        let blocks = split_into_blocks(buf, &params);
        debug!(
            file = %path.display(),
            bytes = file_size,
            blocks = blocks.len(),
            "parsing"
        );

        let mut handles = Vec::with_capacity(blocks.len());
        for block in blocks {
            let scheduler = Scheduler(Arc::clone(self));
            handles.push(tokio::spawn(async move {
                let mut result = ParseResult::default();
                parse_fragment(&block, &scheduler, &mut result)?;
                Ok(result)
            }));
        }
        let mut pieces = Vec::with_capacity(handles.len());
        for handle in handles {
            pieces.push(join_task(handle).await?);
        }
        self.check_interrupted()?;
        let mut merged = ParseResult::merge(pieces);
        merged.file = Some(path.to_owned());
        Ok(merged)
    }

    // Target pass: every raw `build` fragment parses as its own task
    // against the now-immutable scope tree.
    async fn parse_targets(
        self: &Arc<Self>,
        arena: Arc<ScopeArena>,
        mut raw_targets: RawTargetMap,
    ) -> Result<Vec<Target>, Error> {
        let mut handles = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(arena.root());
        while let Some(scope) = queue.pop_front() {
            self.check_interrupted()?;
            for fragment in raw_targets.remove(&scope).unwrap_or_default() {
                let arena = Arc::clone(&arena);
                handles.push(tokio::spawn(async move {
                    parse_target(&fragment, &arena, scope).map_err(|e| {
                        let err = Error::from(e);
                        match arena.file(scope) {
                            Some(file) => err.with_file(file),
                            None => err,
                        }
                    })
                }));
            }
            queue.extend(arena.included_scopes(scope));
            queue.extend(arena.subninja_scopes(scope));
        }
        debug!(edges = handles.len(), scopes = arena.len(), "parsing build edges");

        let mut targets = Vec::with_capacity(handles.len());
        for handle in handles {
            targets.push(join_task(handle).await?);
        }
        Ok(targets)
    }
}

/// The pipeline's child-scheduling capability, handed to the parser and the
/// expansion driver. A separate handle type because tasks need their own
/// clone of the pipeline to spawn from.
struct Scheduler(Arc<Pipeline>);

impl ChildScheduler for Scheduler {
    fn schedule_child(&self, path: &[u8]) -> ParseHandle {
        self.0
            .schedule_parsing(self.0.base_path.join(bytes_to_path(path)))
    }

    fn check_interrupted(&self) -> Result<(), Error> {
        self.0.check_interrupted()
    }
}

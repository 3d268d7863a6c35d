use std::fmt;
use std::path::PathBuf;

use ninja_file::ByteFragment;
use tokio::task::JoinHandle;

use crate::ast::{Expr, Rule};
use crate::error::Error;
use crate::scope::{ScopeArena, ScopeId};

/// Handle to an in-flight file parse running on the worker pool.
pub type ParseHandle = JoinHandle<Result<ParseResult, Error>>;

/// The capability a parser step needs to kick off parsing of a child file.
/// Implemented by the pipeline; test parsers that never see includes use a
/// dummy.
pub trait ChildScheduler: Send + Sync {
    /// Resolves `path` against the base directory and schedules the child
    /// file's parse on the worker pool.
    fn schedule_child(&self, path: &[u8]) -> ParseHandle;

    /// Cooperative cancellation check, consulted at suspension points.
    fn check_interrupted(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Awaits a spawned parse task, propagating panics and mapping abnormal
/// completion (the runtime tore the task down) to interruption.
pub async fn join_task<T>(handle: JoinHandle<Result<T, Error>>) -> Result<T, Error> {
    match handle.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(Error::Interrupted),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    /// `include`: the child shares the including file's scope.
    Include,
    /// `subninja`: the child gets an isolated scope that only inherits a
    /// snapshot of the parent's variables at the statement offset.
    Subninja,
}

/// A deferred "parse this included file" computation, callable exactly once;
/// taking `self` by value makes double resolution unrepresentable.
///
/// Plain-text paths are scheduled the moment the statement is parsed, so the
/// child parse overlaps with everything else; the promise then just awaits
/// the in-flight result. A path with variable references cannot be scheduled
/// until the enclosing scope has been expanded up to the statement, so the
/// promise holds the unexpanded path and does the whole
/// expand-schedule-await dance when resolved.
pub enum ParsePromise {
    Scheduled(ParseHandle),
    Deferred { path: Expr },
}

impl ParsePromise {
    pub fn for_path(path: Expr, scheduler: &dyn ChildScheduler) -> ParsePromise {
        if path.is_plain() {
            ParsePromise::Scheduled(scheduler.schedule_child(&path.raw_text()))
        } else {
            ParsePromise::Deferred { path }
        }
    }

    /// Resolves the promise in the context of `scope`, which must have been
    /// expanded up to `offset`. Empty expanded paths are rejected rather
    /// than silently resolving relative to the base directory.
    pub async fn resolve(
        self,
        offset: usize,
        scheduler: &dyn ChildScheduler,
        arena: &ScopeArena,
        scope: ScopeId,
    ) -> Result<ParseResult, Error> {
        let handle = match self {
            ParsePromise::Scheduled(handle) => handle,
            ParsePromise::Deferred { path } => {
                let expanded = arena.expand(scope, &path, offset);
                if expanded.is_empty() {
                    return Err(Error::EmptyPath { file: None, offset });
                }
                scheduler.schedule_child(&expanded)
            }
        };
        join_task(handle).await
    }
}

impl fmt::Debug for ParsePromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsePromise::Scheduled(_) => write!(f, "ParsePromise::Scheduled"),
            ParsePromise::Deferred { path } => {
                write!(f, "ParsePromise::Deferred({:?})", path)
            }
        }
    }
}

/// A pending `include`/`subninja` statement: where it was, which flavor, and
/// the promise that yields the child file's parse result.
#[derive(Debug)]
pub struct PendingInclude {
    pub kind: IncludeKind,
    pub offset: usize,
    pub promise: ParsePromise,
}

/// A pool definition as parsed; the depth is validated (and the `Pool`
/// constructed) during scope expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDeclaration {
    pub name: Vec<u8>,
    pub depth: Expr,
}

/// Accumulator for one file or one block of a file. Every list is ordered by
/// source offset; merging blocks in byte order keeps it that way, which is
/// what makes later variable definitions unable to satisfy earlier uses.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// File the result came from, attached after the merge; block-level
    /// results do not know it.
    pub file: Option<PathBuf>,
    pub variables: Vec<(usize, Vec<u8>, Expr)>,
    pub rules: Vec<(usize, Rule)>,
    pub pools: Vec<(usize, PoolDeclaration)>,
    pub defaults: Vec<(usize, Vec<Expr>)>,
    pub includes: Vec<PendingInclude>,
    /// Raw, unparsed `build` statements, waiting for the target pass.
    pub targets: Vec<ByteFragment>,
}

impl ParseResult {
    /// Merges per-block results into one file-level result. `pieces` must be
    /// in block (= byte offset) order.
    pub fn merge(pieces: Vec<ParseResult>) -> ParseResult {
        let mut merged = ParseResult::default();
        for mut piece in pieces {
            merged.variables.append(&mut piece.variables);
            merged.rules.append(&mut piece.rules);
            merged.pools.append(&mut piece.pools);
            merged.defaults.append(&mut piece.defaults);
            merged.includes.append(&mut piece.includes);
            merged.targets.append(&mut piece.targets);
        }
        merged
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::Term;

    struct ReadyScheduler;

    impl ChildScheduler for ReadyScheduler {
        fn schedule_child(&self, _path: &[u8]) -> ParseHandle {
            tokio::spawn(async { Ok(ParseResult::default()) })
        }
    }

    fn assignment(offset: usize, name: &str) -> (usize, Vec<u8>, Expr) {
        (
            offset,
            name.as_bytes().to_vec(),
            Expr::new(vec![Term::Literal(b"v".to_vec())]),
        )
    }

    #[test]
    fn test_merge_keeps_block_order() {
        let mut a = ParseResult::default();
        a.variables.push(assignment(0, "a"));
        a.variables.push(assignment(6, "b"));
        let mut b = ParseResult::default();
        b.variables.push(assignment(12, "c"));

        let merged = ParseResult::merge(vec![a, b]);
        let names: Vec<&[u8]> = merged.variables.iter().map(|(_, n, _)| &n[..]).collect();
        assert_eq!(names, vec![&b"a"[..], b"b", b"c"]);
        let offsets: Vec<usize> = merged.variables.iter().map(|(o, _, _)| *o).collect();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_plain_path_schedules_eagerly() {
        let promise = ParsePromise::for_path(
            Expr::new(vec![Term::Literal(b"sub.ninja".to_vec())]),
            &ReadyScheduler,
        );
        assert!(matches!(promise, ParsePromise::Scheduled(_)));

        let (arena, root) = ScopeArena::new();
        let result = promise.resolve(0, &ReadyScheduler, &arena, root).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_variable_path_defers() {
        let promise = ParsePromise::for_path(
            Expr::new(vec![Term::Reference(b"x".to_vec())]),
            &ReadyScheduler,
        );
        assert!(matches!(promise, ParsePromise::Deferred { .. }));

        // Unresolvable reference expands to empty and must not schedule.
        let (arena, root) = ScopeArena::new();
        let err = promise
            .resolve(7, &ReadyScheduler, &arena, root)
            .await
            .unwrap_err();
        match err {
            Error::EmptyPath { offset, .. } => assert_eq!(offset, 7),
            other => panic!("unexpected error {:?}", other),
        }
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, FutureExt};
use ninja_file::ByteFragment;

use crate::ast::{Expr, Pool, Rule};
use crate::error::{Error, ParseError};
use crate::result::{ChildScheduler, IncludeKind, ParseResult, PendingInclude};

/// Index of a scope in its [`ScopeArena`]. The scope tree is an ownership
/// tree (the arena owns everything); parent links are plain indices, so
/// there is no second ownership edge and nothing to cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// One lexical scope: the variables, rules and pools of a single ninja file,
/// plus its child scopes from `include` and `subninja` statements.
///
/// Variables are kept per name as an offset-sorted definition list, because
/// lookup is always "as of offset N": an include path uses only definitions
/// textually before the statement, and a later definition must never satisfy
/// an earlier use, no matter how the blocks were scheduled.
#[derive(Debug, Default)]
struct Scope {
    /// Parent scope and the offset of the statement that created this scope
    /// in the parent. Lookups that fall through to the parent are capped at
    /// that offset, which is exactly the snapshot `subninja` wants.
    parent: Option<(ScopeId, usize)>,
    file: Option<PathBuf>,
    variables: HashMap<Vec<u8>, Vec<(usize, Vec<u8>)>>,
    rules: HashMap<Vec<u8>, (usize, Rule)>,
    pools: HashMap<Vec<u8>, (usize, Pool)>,
    /// `include` children in statement order, with the statement offset.
    included: Vec<(usize, ScopeId)>,
    /// `subninja` children in statement order.
    subninjas: Vec<(usize, ScopeId)>,
    defaults: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl ScopeArena {
    pub fn new() -> (ScopeArena, ScopeId) {
        let arena = ScopeArena {
            scopes: vec![Scope::default()],
        };
        (arena, ScopeId(0))
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    /// Creates a scope whose parent lookups are capped at `offset`; the
    /// child is not visible from the parent until linked.
    pub fn create_child(&mut self, parent: ScopeId, offset: usize) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            parent: Some((parent, offset)),
            ..Scope::default()
        });
        id
    }

    pub fn link_included(&mut self, parent: ScopeId, offset: usize, child: ScopeId) {
        self.scope_mut(parent).included.push((offset, child));
    }

    pub fn link_subninja(&mut self, parent: ScopeId, offset: usize, child: ScopeId) {
        self.scope_mut(parent).subninjas.push((offset, child));
    }

    pub fn included_scopes(&self, id: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        self.scope(id).included.iter().map(|&(_, child)| child)
    }

    pub fn subninja_scopes(&self, id: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        self.scope(id).subninjas.iter().map(|&(_, child)| child)
    }

    pub fn set_file(&mut self, id: ScopeId, file: Option<PathBuf>) {
        self.scope_mut(id).file = file;
    }

    pub fn file(&self, id: ScopeId) -> Option<&Path> {
        self.scope(id).file.as_deref()
    }

    /// Records an already expanded variable definition. Definitions arrive
    /// in offset order (the parse-result lists are offset-sorted), keeping
    /// each per-name list sorted without further work.
    pub fn add_variable(&mut self, id: ScopeId, name: Vec<u8>, offset: usize, value: Vec<u8>) {
        let defs = self.scope_mut(id).variables.entry(name).or_default();
        debug_assert!(defs.last().map_or(true, |&(o, _)| o < offset));
        defs.push((offset, value));
    }

    pub fn add_rule(&mut self, id: ScopeId, offset: usize, rule: Rule) -> Result<(), ParseError> {
        let scope = self.scope_mut(id);
        if scope.rules.contains_key(&rule.name) {
            return Err(ParseError::new(
                offset,
                format!("duplicate rule '{}'", String::from_utf8_lossy(&rule.name)),
            ));
        }
        scope.rules.insert(rule.name.clone(), (offset, rule));
        Ok(())
    }

    pub fn add_pool(&mut self, id: ScopeId, offset: usize, pool: Pool) -> Result<(), ParseError> {
        let scope = self.scope_mut(id);
        if scope.pools.contains_key(&pool.name) {
            return Err(ParseError::new(
                offset,
                format!("duplicate pool '{}'", String::from_utf8_lossy(&pool.name)),
            ));
        }
        scope.pools.insert(pool.name.clone(), (offset, pool));
        Ok(())
    }

    pub fn add_default(&mut self, id: ScopeId, target: Vec<u8>) {
        self.scope_mut(id).defaults.push(target);
    }

    pub fn defaults(&self, id: ScopeId) -> &[Vec<u8>] {
        &self.scope(id).defaults
    }

    // The best definition visible inside this scope before `offset`,
    // considering the scope's own definitions and those of `include`
    // children linked before `offset` (include shares the parent's scope;
    // an include child's final value surfaces at the statement offset).
    // The parent chain is not consulted here.
    fn resolve_local(&self, id: ScopeId, name: &[u8], offset: usize) -> Option<(usize, Vec<u8>)> {
        let scope = self.scope(id);
        let mut best: Option<(usize, Vec<u8>)> = None;
        if let Some(defs) = scope.variables.get(name) {
            let idx = defs.partition_point(|&(o, _)| o < offset);
            if idx > 0 {
                best = Some((defs[idx - 1].0, defs[idx - 1].1.clone()));
            }
        }
        for &(inc_offset, child) in &scope.included {
            if inc_offset >= offset {
                break;
            }
            if best.as_ref().map_or(false, |&(o, _)| o > inc_offset) {
                continue;
            }
            if let Some((_, value)) = self.resolve_local(child, name, usize::MAX) {
                best = Some((inc_offset, value));
            }
        }
        best
    }

    /// Variable lookup as of `offset`, walking up the parent chain (capped
    /// at each inclusion offset) when the scope itself has no definition.
    pub fn lookup_variable(&self, id: ScopeId, name: &[u8], offset: usize) -> Option<Vec<u8>> {
        if let Some((_, value)) = self.resolve_local(id, name, offset) {
            return Some(value);
        }
        let (parent, parent_offset) = self.scope(id).parent?;
        self.lookup_variable(parent, name, parent_offset)
    }

    /// The final value of a variable, as downstream consumers see it.
    pub fn variable(&self, id: ScopeId, name: &[u8]) -> Option<Vec<u8>> {
        self.lookup_variable(id, name, usize::MAX)
    }

    fn resolve_rule_local(
        &self,
        id: ScopeId,
        name: &[u8],
        offset: usize,
    ) -> Option<(usize, &Rule)> {
        let scope = self.scope(id);
        let mut best: Option<(usize, &Rule)> = scope
            .rules
            .get(name)
            .filter(|&&(o, _)| o < offset)
            .map(|&(o, ref rule)| (o, rule));
        for &(inc_offset, child) in &scope.included {
            if inc_offset >= offset {
                break;
            }
            if best.as_ref().map_or(false, |&(o, _)| o > inc_offset) {
                continue;
            }
            if let Some((_, rule)) = self.resolve_rule_local(child, name, usize::MAX) {
                best = Some((inc_offset, rule));
            }
        }
        best
    }

    pub fn lookup_rule(&self, id: ScopeId, name: &[u8], offset: usize) -> Option<&Rule> {
        if let Some((_, rule)) = self.resolve_rule_local(id, name, offset) {
            return Some(rule);
        }
        let (parent, parent_offset) = self.scope(id).parent?;
        self.lookup_rule(parent, name, parent_offset)
    }

    pub fn rule(&self, id: ScopeId, name: &[u8]) -> Option<&Rule> {
        self.lookup_rule(id, name, usize::MAX)
    }

    pub fn lookup_pool(&self, id: ScopeId, name: &[u8], offset: usize) -> Option<&Pool> {
        let scope = self.scope(id);
        if let Some(&(o, ref pool)) = scope.pools.get(name) {
            if o < offset {
                return Some(pool);
            }
        }
        let (parent, parent_offset) = scope.parent?;
        self.lookup_pool(parent, name, parent_offset)
    }

    pub fn pool(&self, id: ScopeId, name: &[u8]) -> Option<&Pool> {
        self.lookup_pool(id, name, usize::MAX)
    }

    /// Expands `expr` in this scope as of `offset`; unknown references
    /// expand to nothing.
    pub fn expand(&self, id: ScopeId, expr: &Expr, offset: usize) -> Vec<u8> {
        expr.expand(|name| self.lookup_variable(id, name, offset))
    }
}

/// Raw `build` fragments collected per scope during expansion, consumed by
/// the target-parsing pass.
pub type RawTargetMap = HashMap<ScopeId, Vec<ByteFragment>>;

fn attach_file(file: &Option<PathBuf>, err: Error) -> Error {
    match file {
        Some(path) => err.with_file(path),
        None => err,
    }
}

/// Expands a merged parse result into `scope`, in source order:
/// definitions first, then each pending inclusion (resolving its promise,
/// expanding the child file into a freshly created child scope, linking it),
/// then `default` declarations, and finally the raw target fragments are
/// recorded against the scope for the second pass.
///
/// Inclusions are processed strictly in statement order, so a variable
/// defined between two `include` statements is visible to the second one
/// and not the first. Recursion is through child files, hence the boxed
/// future.
pub fn expand_into_scope<'a>(
    result: ParseResult,
    id: ScopeId,
    arena: &'a mut ScopeArena,
    raw_targets: &'a mut RawTargetMap,
    scheduler: &'a dyn ChildScheduler,
) -> BoxFuture<'a, Result<(), Error>> {
    async move {
        let file = result.file;
        arena.set_file(id, file.clone());

        for (offset, name, value) in result.variables {
            let expanded = arena.expand(id, &value, offset);
            arena.add_variable(id, name, offset, expanded);
        }
        for (offset, rule) in result.rules {
            arena
                .add_rule(id, offset, rule)
                .map_err(|e| attach_file(&file, e.into()))?;
        }
        for (offset, decl) in result.pools {
            let depth_text = arena.expand(id, &decl.depth, offset);
            let depth = std::str::from_utf8(&depth_text)
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .filter(|&d| d > 0)
                .ok_or_else(|| {
                    attach_file(
                        &file,
                        ParseError::new(offset, "pool depth must be a positive integer").into(),
                    )
                })?;
            arena
                .add_pool(
                    id,
                    offset,
                    Pool {
                        name: decl.name,
                        depth,
                    },
                )
                .map_err(|e| attach_file(&file, e.into()))?;
        }

        for include in result.includes {
            scheduler.check_interrupted()?;
            let PendingInclude {
                kind,
                offset,
                promise,
            } = include;
            let child_result = promise
                .resolve(offset, scheduler, arena, id)
                .await
                .map_err(|e| attach_file(&file, e))?;
            let child = arena.create_child(id, offset);
            expand_into_scope(child_result, child, arena, raw_targets, scheduler).await?;
            match kind {
                IncludeKind::Include => arena.link_included(id, offset, child),
                IncludeKind::Subninja => arena.link_subninja(id, offset, child),
            }
        }

        for (offset, paths) in result.defaults {
            for expr in paths {
                let expanded = arena.expand(id, &expr, offset);
                if expanded.is_empty() {
                    return Err(attach_file(
                        &file,
                        ParseError::new(offset, "default target expanded to an empty path").into(),
                    ));
                }
                arena.add_default(id, expanded);
            }
        }

        raw_targets.entry(id).or_default().extend(result.targets);
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::Term;
    use crate::result::PoolDeclaration;

    fn b(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    fn test_offset_lookup_last_write_wins() {
        let (mut arena, root) = ScopeArena::new();
        arena.add_variable(root, b("x"), 0, b("one"));
        arena.add_variable(root, b("x"), 20, b("two"));

        assert_eq!(arena.lookup_variable(root, b"x", 10), Some(b("one")));
        assert_eq!(arena.lookup_variable(root, b"x", 21), Some(b("two")));
        // A definition is not visible at its own offset, only after it.
        assert_eq!(arena.lookup_variable(root, b"x", 20), Some(b("one")));
        assert_eq!(arena.lookup_variable(root, b"x", 0), None);
        assert_eq!(arena.variable(root, b"x"), Some(b("two")));
    }

    #[test]
    fn test_parent_lookup_is_capped_at_inclusion_offset() {
        let (mut arena, root) = ScopeArena::new();
        arena.add_variable(root, b("x"), 0, b("before"));
        let child = arena.create_child(root, 10);
        arena.add_variable(root, b("x"), 20, b("after"));

        // The child sees the parent as of the statement that created it.
        assert_eq!(arena.lookup_variable(child, b"x", usize::MAX), Some(b("before")));
        // Its own definitions shadow the parent's.
        arena.add_variable(child, b("x"), 5, b("own"));
        assert_eq!(arena.variable(child, b"x"), Some(b("own")));
    }

    #[test]
    fn test_include_child_is_visible_in_parent() {
        let (mut arena, root) = ScopeArena::new();
        let child = arena.create_child(root, 10);
        arena.add_variable(child, b("y"), 0, b("from_include"));
        arena.link_included(root, 10, child);

        // Visible after the include statement, not before.
        assert_eq!(arena.lookup_variable(root, b"y", 11), Some(b("from_include")));
        assert_eq!(arena.lookup_variable(root, b"y", 10), None);

        // A later own definition beats the include.
        arena.add_variable(root, b("y"), 30, b("own"));
        assert_eq!(arena.variable(root, b"y"), Some(b("own")));
    }

    #[test]
    fn test_subninja_child_is_isolated() {
        let (mut arena, root) = ScopeArena::new();
        let child = arena.create_child(root, 10);
        arena.add_variable(child, b("y"), 0, b("secret"));
        arena.link_subninja(root, 10, child);

        assert_eq!(arena.variable(root, b"y"), None);
    }

    #[test]
    fn test_rule_lookup_through_include_and_parent() {
        let (mut arena, root) = ScopeArena::new();
        let rule = Rule {
            name: b("cc"),
            bindings: Default::default(),
        };
        let include_child = arena.create_child(root, 5);
        arena.add_rule(include_child, 0, rule).unwrap();
        arena.link_included(root, 5, include_child);

        assert!(arena.lookup_rule(root, b"cc", 6).is_some());
        assert!(arena.lookup_rule(root, b"cc", 5).is_none());

        // A subninja child sees the parent's rules (including its includes).
        let sub = arena.create_child(root, 40);
        arena.link_subninja(root, 40, sub);
        assert!(arena.rule(sub, b"cc").is_some());
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let (mut arena, root) = ScopeArena::new();
        let rule = Rule {
            name: b("cc"),
            bindings: Default::default(),
        };
        arena.add_rule(root, 0, rule.clone()).unwrap();
        let err = arena.add_rule(root, 7, rule).unwrap_err();
        assert_eq!(err.offset, 7);
        assert!(err.message.contains("duplicate rule 'cc'"));
    }

    struct NoScheduler;
    impl ChildScheduler for NoScheduler {
        fn schedule_child(&self, _path: &[u8]) -> crate::result::ParseHandle {
            unimplemented!("test input has no includes");
        }
    }

    #[tokio::test]
    async fn test_expand_simple_result() {
        let mut result = ParseResult::default();
        result
            .variables
            .push((0, b("x"), Expr::new(vec![Term::Literal(b("foo"))])));
        // y = $x bar, defined after x: sees it.
        result.variables.push((
            10,
            b("y"),
            Expr::new(vec![Term::Reference(b("x")), Term::Literal(b(" bar"))]),
        ));
        // z = $later, defined before later: expands empty.
        result
            .variables
            .push((20, b("z"), Expr::new(vec![Term::Reference(b("later"))])));
        result
            .variables
            .push((30, b("later"), Expr::new(vec![Term::Literal(b("nope"))])));
        result.pools.push((
            40,
            PoolDeclaration {
                name: b("link"),
                depth: Expr::new(vec![Term::Literal(b("4"))]),
            },
        ));
        result
            .defaults
            .push((50, vec![Expr::new(vec![Term::Reference(b("x"))])]));

        let (mut arena, root) = ScopeArena::new();
        let mut raw = RawTargetMap::new();
        expand_into_scope(result, root, &mut arena, &mut raw, &NoScheduler)
            .await
            .unwrap();

        assert_eq!(arena.variable(root, b"y"), Some(b("foo bar")));
        assert_eq!(arena.variable(root, b"z"), Some(b("")));
        assert_eq!(arena.pool(root, b"link").unwrap().depth, 4);
        assert_eq!(arena.defaults(root), &[b("foo")]);
    }

    #[tokio::test]
    async fn test_default_does_not_see_later_definitions() {
        let mut result = ParseResult::default();
        // `default $x` textually before `x = out`: the reference must not
        // resolve, and an all-empty default path is an error.
        result
            .defaults
            .push((5, vec![Expr::new(vec![Term::Reference(b("x"))])]));
        result
            .variables
            .push((10, b("x"), Expr::new(vec![Term::Literal(b("out"))])));

        let (mut arena, root) = ScopeArena::new();
        let mut raw = RawTargetMap::new();
        let err = expand_into_scope(result, root, &mut arena, &mut raw, &NoScheduler)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("default target"), "{}", err);
    }

    #[tokio::test]
    async fn test_expand_bad_pool_depth() {
        let mut result = ParseResult::default();
        result.pools.push((
            3,
            PoolDeclaration {
                name: b("link"),
                depth: Expr::new(vec![Term::Literal(b("soon"))]),
            },
        ));
        let (mut arena, root) = ScopeArena::new();
        let mut raw = RawTargetMap::new();
        let err = expand_into_scope(result, root, &mut arena, &mut raw, &NoScheduler)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("pool depth"));
    }
}

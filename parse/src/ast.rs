use std::collections::HashMap;
use std::fmt;

use crate::scope::ScopeId;

/// One piece of an unexpanded value: a literal byte run or a `$name` /
/// `${name}` variable reference.
#[derive(Clone, PartialEq, Eq)]
pub enum Term {
    Literal(Vec<u8>),
    Reference(Vec<u8>),
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Literal(v) => write!(f, "Literal({:?})", String::from_utf8_lossy(v)),
            Term::Reference(v) => write!(f, "Reference({:?})", String::from_utf8_lossy(v)),
        }
    }
}

/// An unexpanded variable value, as written in the file. Whether it is plain
/// text is a syntactic property, decidable without any scope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Expr(pub Vec<Term>);

impl Expr {
    pub fn new(terms: Vec<Term>) -> Expr {
        Expr(terms)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True iff the value contains no variable references.
    pub fn is_plain(&self) -> bool {
        self.0.iter().all(|t| matches!(t, Term::Literal(_)))
    }

    /// The literal text of a plain value. References contribute nothing, so
    /// this is only meaningful when `is_plain()`.
    pub fn raw_text(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for term in &self.0 {
            if let Term::Literal(v) = term {
                out.extend_from_slice(v);
            }
        }
        out
    }

    /// Expands the value, substituting each reference through `lookup`.
    /// Unknown references expand to nothing, per ninja semantics.
    pub fn expand<F>(&self, lookup: F) -> Vec<u8>
    where
        F: Fn(&[u8]) -> Option<Vec<u8>>,
    {
        let mut out = Vec::new();
        for term in &self.0 {
            match term {
                Term::Literal(v) => out.extend_from_slice(v),
                Term::Reference(name) => {
                    if let Some(v) = lookup(name) {
                        out.extend_from_slice(&v);
                    }
                }
            }
        }
        out
    }
}

/// A rule definition. Bindings stay unexpanded; they are only evaluated much
/// later, against a build edge's in/out lists, which is downstream work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: Vec<u8>,
    pub bindings: HashMap<Vec<u8>, Expr>,
}

/// A pool definition with its (already validated) depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub name: Vec<u8>,
    pub depth: u32,
}

/// One parsed build edge. All paths and local bindings are fully expanded
/// against the owning scope; a target is immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub outputs: Vec<Vec<u8>>,
    pub implicit_outputs: Vec<Vec<u8>>,
    pub rule: Vec<u8>,
    pub inputs: Vec<Vec<u8>>,
    pub implicit_inputs: Vec<Vec<u8>>,
    pub order_inputs: Vec<Vec<u8>>,
    /// Local `var = value` overrides, in statement order, expanded.
    pub bindings: Vec<(Vec<u8>, Vec<u8>)>,
    /// The scope this edge was parsed against.
    pub scope: ScopeId,
    /// Absolute offset of the `build` keyword, for diagnostics.
    pub offset: usize,
}

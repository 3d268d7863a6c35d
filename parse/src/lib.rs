//! Concurrent parsing of ninja build files.
//!
//! A ninja file is parsed in two passes. The structural pass splits the file
//! into blocks on statement boundaries, lexes and parses each block in
//! parallel, and merges the per-block results in byte order; `build`
//! statements are only delimited, not parsed. The merged result is then
//! expanded into a [`scope::ScopeArena`], resolving `include` and `subninja`
//! files recursively (each of which runs its own structural pass). Once all
//! scopes are settled, the target pass parses the raw `build` fragments in
//! parallel against their owning scopes.
//!
//! Offsets make this order-independent: every declaration carries its
//! absolute byte offset, and scope lookup is always "as of offset N", so a
//! parallel parse resolves names exactly like a sequential read would.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod result;
pub mod scope;

pub use ast::{Expr, Pool, Rule, Target, Term};
pub use error::{Error, LexError, ParseError};
pub use parser::{parse_fragment, parse_target};
pub use result::{
    join_task, ChildScheduler, IncludeKind, ParseHandle, ParsePromise, ParseResult,
    PendingInclude, PoolDeclaration,
};
pub use scope::{expand_into_scope, RawTargetMap, ScopeArena, ScopeId};

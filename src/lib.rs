//! Concurrent ninja build-file loader.
//!
//! [`Pipeline`] ties the pieces together: `ninja-file` reads and splits
//! files into statement-aligned blocks, `ninja-parse` parses blocks and
//! expands scopes, and the pipeline schedules all of it on a tokio worker
//! pool. The result of a load is the settled scope tree plus every build
//! edge, identical for any block size or worker count.

mod pipeline;

pub use ninja_file::FileSystem;
pub use ninja_parse::{Error, ScopeArena, ScopeId, Target};
pub use pipeline::Pipeline;

//! File-level plumbing for the concurrent ninja loader: shared byte
//! fragments, statement-safe split points, block sizing and the filesystem
//! boundary.

pub mod block;
pub mod fragment;
pub mod fs;
pub mod separator;

pub use block::{split_into_blocks, BlockParameters};
pub use fragment::ByteFragment;
pub use fs::{Disk, FileSystem};

#[cfg(any(test, feature = "testing"))]
pub use fs::MemFs;

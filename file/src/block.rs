use std::sync::Arc;

use crate::fragment::ByteFragment;
use crate::separator::find_separator;

/// How large the independently parsed blocks of one file should be.
///
/// The default aims at a couple of blocks per core so block parsing saturates
/// the worker pool without drowning it in tiny tasks; tests pin an explicit
/// size to exercise splitting.
#[derive(Debug, Clone, Copy)]
pub struct BlockParameters {
    block_size: usize,
}

const MIN_BLOCK_SIZE: usize = 4096;

impl BlockParameters {
    pub fn new(file_size: u64) -> BlockParameters {
        let per_worker = file_size as usize / (2 * num_cpus::get().max(1));
        BlockParameters {
            block_size: per_worker.max(MIN_BLOCK_SIZE),
        }
    }

    pub fn with_block_size(block_size: usize) -> BlockParameters {
        assert!(block_size > 0);
        BlockParameters { block_size }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

/// Splits a loaded file into fragments of roughly `block_size` bytes, each
/// ending on a statement separator. Fragments are contiguous, in byte-offset
/// order, and cover the whole buffer. A buffer with no separator past the
/// tentative split point ends up in one (final) oversized fragment.
pub fn split_into_blocks(buf: Arc<[u8]>, params: &BlockParameters) -> Vec<ByteFragment> {
    let mut blocks = Vec::new();
    let mut start = 0;
    while start < buf.len() {
        let tentative = start + params.block_size();
        if tentative >= buf.len() {
            blocks.push(ByteFragment::new(Arc::clone(&buf), start, buf.len()));
            break;
        }
        // The separator newline itself belongs to the block it terminates.
        match find_separator(&buf, tentative - 1) {
            Some(nl) => {
                blocks.push(ByteFragment::new(Arc::clone(&buf), start, nl + 1));
                start = nl + 1;
            }
            None => {
                blocks.push(ByteFragment::new(Arc::clone(&buf), start, buf.len()));
                break;
            }
        }
    }
    blocks
}

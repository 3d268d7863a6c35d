use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// A read-only view into a loaded file's byte buffer.
///
/// `start` and `end` are absolute offsets into the original file, so a
/// fragment always knows where its bytes came from; re-lexing a fragment
/// later still reports correct error offsets. The underlying buffer is
/// shared by every fragment derived from one file, nothing is copied.
#[derive(Clone)]
pub struct ByteFragment {
    buf: Arc<[u8]>,
    start: usize,
    end: usize,
}

impl ByteFragment {
    pub fn new(buf: Arc<[u8]>, start: usize, end: usize) -> ByteFragment {
        assert!(start <= end && end <= buf.len());
        ByteFragment { buf, start, end }
    }

    /// One fragment covering the entire buffer.
    pub fn whole(buf: Arc<[u8]>) -> ByteFragment {
        let end = buf.len();
        ByteFragment { buf, start: 0, end }
    }

    /// Absolute offset of the first byte of this fragment in the file.
    pub fn start_offset(&self) -> usize {
        self.start
    }

    /// Absolute offset one past the last byte.
    pub fn end_offset(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Sub-fragment addressed by absolute file offsets. The range must lie
    /// within this fragment.
    pub fn slice_abs(&self, range: Range<usize>) -> ByteFragment {
        assert!(range.start >= self.start && range.end <= self.end);
        ByteFragment::new(Arc::clone(&self.buf), range.start, range.end)
    }
}

impl fmt::Debug for ByteFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ByteFragment({}..{}, {:?})",
            self.start,
            self.end,
            String::from_utf8_lossy(self.as_bytes())
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fragment(data: &str) -> ByteFragment {
        ByteFragment::whole(Arc::from(data.as_bytes().to_vec()))
    }

    #[test]
    fn test_whole() {
        let f = fragment("x = 1\n");
        assert_eq!(f.start_offset(), 0);
        assert_eq!(f.len(), 6);
        assert_eq!(f.as_bytes(), b"x = 1\n");
    }

    #[test]
    fn test_slice_keeps_absolute_offsets() {
        let f = fragment("x = 1\ny = 2\n");
        let sub = f.slice_abs(6..12);
        assert_eq!(sub.start_offset(), 6);
        assert_eq!(sub.as_bytes(), b"y = 2\n");
        // Slicing a slice still addresses the original file.
        let sub2 = sub.slice_abs(6..9);
        assert_eq!(sub2.as_bytes(), b"y =");
    }

    #[test]
    #[should_panic]
    fn test_slice_outside_fragment() {
        let f = fragment("abcdef");
        let sub = f.slice_abs(2..4);
        let _ = sub.slice_abs(0..2);
    }
}

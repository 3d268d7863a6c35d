use std::io;
use std::path::Path;

use async_trait::async_trait;

/// The filesystem surface the pipeline consumes: report a file's size (block
/// parameters are derived from it before the read happens) and read its
/// contents. Everything else about files is someone else's problem.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn file_size(&self, path: &Path) -> io::Result<u64>;
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// The real filesystem.
#[derive(Debug, Default)]
pub struct Disk;

#[async_trait]
impl FileSystem for Disk {
    async fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }
}

#[cfg(any(test, feature = "testing"))]
pub use self::mem::MemFs;

#[cfg(any(test, feature = "testing"))]
mod mem {
    use std::collections::HashMap;
    use std::io;
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;

    use super::FileSystem;

    /// In-memory filesystem for tests.
    #[derive(Debug, Default)]
    pub struct MemFs {
        files: HashMap<PathBuf, Vec<u8>>,
    }

    impl MemFs {
        pub fn new() -> MemFs {
            MemFs::default()
        }

        pub fn add(&mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
            self.files.insert(path.into(), contents.into());
        }

        fn get(&self, path: &Path) -> io::Result<&Vec<u8>> {
            self.files.get(path).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such file: {}", path.display()),
                )
            })
        }
    }

    #[async_trait]
    impl FileSystem for MemFs {
        async fn file_size(&self, path: &Path) -> io::Result<u64> {
            Ok(self.get(path)?.len() as u64)
        }

        async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.get(path).map(|v| v.clone())
        }
    }
}

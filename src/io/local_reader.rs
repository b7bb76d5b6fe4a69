use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Reads a whole local source file into memory
#[derive(Clone)]
pub struct LocalFileReader {
    file_path: PathBuf,
}

impl LocalFileReader {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Read the entire file, pre-sizing the buffer from its metadata
    pub async fn read_all(&self) -> std::io::Result<Vec<u8>> {
        let mut file = File::open(&self.file_path).await?;
        let size = file.metadata().await?.len();

        let mut buffer = Vec::with_capacity(size as usize);
        file.read_to_end(&mut buffer).await?;

        Ok(buffer)
    }
}

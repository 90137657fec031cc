//! The append-only on-disk block log (§1 "append-only block log on disk",
//! §6 "Block log"). The controller writes newly-irreversible blocks to it
//! in number order and reads from it during replay.
//!
//! An `async_trait` storage interface backed by `tokio::fs`, so a
//! production node can swap in a sharded, multi-file store without this
//! crate caring. `FileBlockLog` collapses that down to a single growing
//! file of length-prefixed, SCALE-encoded records — good enough for the
//! moderate block counts this core targets.

use async_trait::async_trait;
use parity_scale_codec::{Decode, Encode};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::block::SignedBlock;

/// Append-only persistence for irreversible blocks.
#[async_trait]
pub trait BlockLog: Send + Sync {
    async fn append(&mut self, block: &SignedBlock) -> std::io::Result<()>;
    /// Reads back every block in number order, oldest first, for replay.
    async fn read_all(&mut self) -> std::io::Result<Vec<SignedBlock>>;
    async fn len(&mut self) -> std::io::Result<usize> {
        Ok(self.read_all().await?.len())
    }
}

/// A single growing file of length-prefixed, SCALE-encoded blocks.
pub struct FileBlockLog {
    path: std::path::PathBuf,
}

impl FileBlockLog {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BlockLog for FileBlockLog {
    async fn append(&mut self, block: &SignedBlock) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let encoded = block.encode();
        file.write_all(&(encoded.len() as u64).to_le_bytes()).await?;
        file.write_all(&encoded).await?;
        file.flush().await
    }

    async fn read_all(&mut self) -> std::io::Result<Vec<SignedBlock>> {
        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;

        let mut blocks = Vec::new();
        let mut cursor = 0usize;
        while cursor + 8 <= buf.len() {
            let len = u64::from_le_bytes(buf[cursor..cursor + 8].try_into().expect("checked width")) as usize;
            cursor += 8;
            if cursor + len > buf.len() {
                break;
            }
            let slice = &buf[cursor..cursor + len];
            cursor += len;
            let block = SignedBlock::decode(&mut &slice[..])
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            blocks.push(block);
        }
        Ok(blocks)
    }
}

/// In-memory block log, used by tests and by replay scenarios that never
/// touch disk.
#[derive(Default)]
pub struct MemoryBlockLog {
    blocks: Vec<SignedBlock>,
}

#[async_trait]
impl BlockLog for MemoryBlockLog {
    async fn append(&mut self, block: &SignedBlock) -> std::io::Result<()> {
        self.blocks.push(block.clone());
        Ok(())
    }

    async fn read_all(&mut self) -> std::io::Result<Vec<SignedBlock>> {
        Ok(self.blocks.clone())
    }
}

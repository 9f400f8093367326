//! Persistence of recorded chains.

mod csv;
mod memory;

pub use csv::CsvChainSink;
pub use memory::{MemoryChainSink, StoredChain};

use anyhow::Result;

use crate::chain::Chain;
use crate::error::LosError;

/// How a chain is written by a [`ChainSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOptions {
    /// Name of the sampled quantity, used for column headers.
    pub label: String,
    /// Compression level between 0 and 9.
    pub compression: u32,
    /// Number of draws written per chunk.
    pub chunk_size: usize,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            label: "x".to_string(),
            compression: 3,
            chunk_size: 500,
        }
    }
}

impl SaveOptions {
    pub fn new<S: Into<String>>(label: S) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_compression(mut self, compression: u32) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), LosError> {
        if self.compression > 9 {
            return Err(LosError::InvalidCompression(self.compression));
        }
        Ok(())
    }
}

/// Destination for finished chains, addressed by a slash-separated group path
/// such as `/pixel 12/los extinction`.
pub trait ChainSink {
    fn save(&mut self, chain: &Chain, path: &str, options: &SaveOptions) -> Result<()>;
}

impl<T: ChainSink + ?Sized> ChainSink for &mut T {
    fn save(&mut self, chain: &Chain, path: &str, options: &SaveOptions) -> Result<()> {
        (**self).save(chain, path, options)
    }
}

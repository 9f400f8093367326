use std::collections::BTreeMap;

use anyhow::Result;

use super::{ChainSink, SaveOptions};
use crate::chain::Chain;

/// A chain kept by [`MemoryChainSink`] together with how it was saved.
#[derive(Debug, Clone)]
pub struct StoredChain {
    pub chain: Chain,
    pub options: SaveOptions,
}

/// Keeps saved chains in memory, keyed by group path.
#[derive(Debug, Clone, Default)]
pub struct MemoryChainSink {
    chains: BTreeMap<String, StoredChain>,
}

impl MemoryChainSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&StoredChain> {
        self.chains.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.chains.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, StoredChain> {
        self.chains
    }
}

impl ChainSink for MemoryChainSink {
    fn save(&mut self, chain: &Chain, path: &str, options: &SaveOptions) -> Result<()> {
        options.validate()?;
        self.chains.insert(
            path.to_string(),
            StoredChain {
                chain: chain.clone(),
                options: options.clone(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryChainSink;
    use crate::chain::Chain;
    use crate::storage::{ChainSink, SaveOptions};

    #[test]
    fn stores_by_path() {
        let mut sink = MemoryChainSink::new();
        let mut chain = Chain::new(2, 1);
        chain.push(&[1., 2.], &[0., 0.]);

        sink.save(&chain, "/a", &SaveOptions::new("x")).unwrap();
        sink.save(&chain, "/b", &SaveOptions::new("y")).unwrap();
        chain.clear();
        sink.save(&chain, "/a", &SaveOptions::new("z")).unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.paths().collect::<Vec<_>>(), vec!["/a", "/b"]);
        let stored = sink.get("/a").unwrap();
        assert!(stored.chain.is_empty());
        assert_eq!(stored.options.label, "z");
        assert_eq!(sink.get("/b").unwrap().chain.len(), 1);

        let bad = SaveOptions::new("x").with_compression(10);
        assert!(sink.save(&chain, "/c", &bad).is_err());
        assert!(sink.get("/c").is_none());
    }
}

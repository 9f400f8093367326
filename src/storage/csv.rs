//! CSV chain sink.
//!
//! Every group path becomes one file below the output directory:
//! `/pixel 12/los extinction` is written to
//! `<output_dir>/pixel 12/los extinction.csv`. The file starts with `#`
//! comment lines describing the chain, followed by a header row and one row
//! per draw:
//!
//! ```text
//! # label: Delta E(B-V)
//! # group: /pixel 12/los extinction
//! # compression: 3
//! # walkers: 30, dim: 3, iterations: 2000
//! iteration,walker,lnp,Delta E(B-V)[0],Delta E(B-V)[1],Delta E(B-V)[2]
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use itertools::Itertools;

use super::{ChainSink, SaveOptions};
use crate::chain::Chain;

/// Writes chains as CSV files below an output directory.
#[derive(Debug, Clone)]
pub struct CsvChainSink {
    output_dir: PathBuf,
    precision: usize,
}

impl CsvChainSink {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            precision: 6,
        }
    }

    /// Set the number of decimal places for floating point values.
    ///
    /// Default is 6 decimal places.
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// The file a group path is written to.
    pub fn file_path(&self, group: &str) -> Result<PathBuf> {
        let parts: Vec<&str> = group.split('/').filter(|p| !p.is_empty()).collect();
        let Some((name, dirs)) = parts.split_last() else {
            bail!("Empty group path: {:?}", group);
        };
        if parts.iter().any(|p| *p == "." || *p == "..") {
            bail!("Group path may not contain relative components: {:?}", group);
        }
        let mut path = self.output_dir.clone();
        path.extend(dirs);
        path.push(format!("{}.csv", name));
        Ok(path)
    }

    fn format_value(&self, v: f64) -> String {
        if v.is_nan() {
            "NA".to_string()
        } else if v == f64::INFINITY {
            "Inf".to_string()
        } else if v == f64::NEG_INFINITY {
            "-Inf".to_string()
        } else {
            format!("{:.prec$}", v, prec = self.precision)
        }
    }

    fn write_chain<W: Write>(
        &self,
        writer: &mut W,
        chain: &Chain,
        group: &str,
        options: &SaveOptions,
    ) -> Result<()> {
        writeln!(writer, "# label: {}", options.label)?;
        writeln!(writer, "# group: {}", group)?;
        writeln!(writer, "# compression: {}", options.compression)?;
        writeln!(
            writer,
            "# walkers: {}, dim: {}, iterations: {}",
            chain.n_walkers(),
            chain.dim(),
            chain.len()
        )?;

        let columns = (0..chain.dim()).map(|i| format!("{}[{}]", options.label, i));
        writeln!(
            writer,
            "{}",
            ["iteration".to_string(), "walker".to_string(), "lnp".to_string()]
                .into_iter()
                .chain(columns)
                .join(",")
        )?;

        let n_walkers = chain.n_walkers().max(1);
        let chunk_size = options.chunk_size.max(1);
        for chunk in &chain.iter().enumerate().chunks(chunk_size) {
            for (idx, (position, lnp)) in chunk {
                write!(
                    writer,
                    "{},{},{}",
                    idx / n_walkers,
                    idx % n_walkers,
                    self.format_value(lnp)
                )?;
                for &x in position {
                    write!(writer, ",{}", self.format_value(x))?;
                }
                writeln!(writer)?;
            }
            writer.flush()?;
        }
        Ok(())
    }
}

impl ChainSink for CsvChainSink {
    fn save(&mut self, chain: &Chain, group: &str, options: &SaveOptions) -> Result<()> {
        options.validate()?;
        let file_path = self.file_path(group)?;
        if let Some(dir) = file_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory: {:?}", dir))?;
        }
        let file = File::create(&file_path)
            .with_context(|| format!("Failed to create CSV file: {:?}", file_path))?;
        let mut writer = BufWriter::new(file);
        self.write_chain(&mut writer, chain, group, options)
            .with_context(|| format!("Failed to write chain to {:?}", file_path))
    }
}

#[cfg(test)]
mod tests {
    use super::CsvChainSink;
    use crate::chain::Chain;
    use crate::storage::{ChainSink, SaveOptions};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn small_chain() -> Chain {
        let mut chain = Chain::new(2, 2);
        chain.push(&[0.1, 0.2, 0.3, 0.4], &[-1.5, f64::NEG_INFINITY]);
        chain.push(&[0.5, 0.6, 0.7, f64::NAN], &[-2., -3.]);
        chain
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("los-sampler-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn group_paths() {
        let sink = CsvChainSink::new("/out");
        assert_eq!(
            sink.file_path("/pixel 12/los extinction").unwrap(),
            PathBuf::from("/out/pixel 12/los extinction.csv")
        );
        assert!(sink.file_path("/").is_err());
        assert!(sink.file_path("/pixel/../escape").is_err());
    }

    #[test]
    fn writes_header_and_rows() {
        let dir = temp_dir("rows");
        let mut sink = CsvChainSink::new(&dir).with_precision(2);
        let options = SaveOptions::new("Delta E(B-V)").with_chunk_size(3);
        sink.save(&small_chain(), "/pixel 3/los extinction", &options).unwrap();

        let text = std::fs::read_to_string(dir.join("pixel 3").join("los extinction.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# label: Delta E(B-V)");
        assert_eq!(lines[2], "# compression: 3");
        assert_eq!(lines[3], "# walkers: 2, dim: 2, iterations: 2");
        assert_eq!(
            lines[4],
            "iteration,walker,lnp,Delta E(B-V)[0],Delta E(B-V)[1]"
        );
        assert_eq!(lines[5], "0,0,-1.50,0.10,0.20");
        assert_eq!(lines[6], "0,1,-Inf,0.30,0.40");
        assert_eq!(lines[8], "1,1,-3.00,0.70,NA");
        assert_eq!(lines.len(), 9);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rejects_bad_compression() {
        let dir = temp_dir("compression");
        let mut sink = CsvChainSink::new(&dir);
        let options = SaveOptions::new("x").with_compression(12);
        assert!(sink.save(&small_chain(), "/chain", &options).is_err());
        assert!(!dir.join("chain.csv").exists());
    }
}

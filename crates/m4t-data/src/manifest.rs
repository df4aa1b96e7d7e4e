//! Line-delimited JSON manifest of paired samples.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use m4t_core::{M4tError, M4tResult, SampleRecord};
use tracing::info;

/// Ordered, randomly indexable collection of sample records.
///
/// Order is manifest order; shuffling and sharding happen in the loader.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    records: Vec<SampleRecord>,
}

impl Manifest {
    /// Parse a manifest file, one JSON object per line.
    ///
    /// Whitespace-only lines are skipped. Any other line that fails to decode
    /// into a [`SampleRecord`] aborts loading with [`M4tError::Manifest`].
    pub fn load(path: impl AsRef<Path>) -> M4tResult<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);

        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: SampleRecord =
                serde_json::from_str(&line).map_err(|e| M4tError::Manifest {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            records.push(record);
        }

        info!("Манифест {:?}: {} сэмплов", path, records.len());
        Ok(Self { records })
    }

    pub fn from_records(records: Vec<SampleRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SampleRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SampleRecord> {
        self.records.iter()
    }
}

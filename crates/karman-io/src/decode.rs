use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use ndarray::{ArrayD, IxDyn, ShapeError};
use serde_json::{Map, Value};
use smallvec::SmallVec;
use thiserror::Error;
use tracing::debug;

use karman_fluids::config::RunMetadata;

use crate::{as_bytes::AsBytes, ATTRIBUTES_FILE, DATASET_EXTENSION};

/// Reads one array written by [`DatasetEncoder`](crate::encode::DatasetEncoder).
pub struct DatasetDecoder<R: Read> {
    reader: BufReader<R>,
}

impl DatasetDecoder<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DecodingError> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<R: Read> DatasetDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    fn read_value<const N: usize, T: AsBytes<N>>(&mut self) -> Result<T, DecodingError> {
        let mut bytes = [0; N];
        self.reader.read_exact(&mut bytes)?;
        Ok(T::from_bytes(bytes))
    }

    fn read_values<const N: usize, T: AsBytes<N>>(&mut self, count: usize) -> Result<Vec<T>, DecodingError> {
        let len = count.checked_mul(N).ok_or(DecodingError::Corrupt("dataset is too large"))?;
        let mut bytes = vec![0; len];
        self.reader.read_exact(&mut bytes)?;

        Ok(bytes
            .chunks_exact(N)
            .map(|b| {
                let mut chunk = [0; N];
                chunk.copy_from_slice(b);
                T::from_bytes(chunk)
            })
            .collect())
    }

    pub fn decode(mut self) -> Result<ArrayD<f64>, DecodingError> {
        let ndim = self.read_value::<1, u8>()?;
        let mut shape: SmallVec<[usize; 4]> = SmallVec::new();

        for _ in 0..ndim {
            let n = self.read_value::<8, u64>()?;
            shape.push(usize::try_from(n).map_err(|_| DecodingError::Corrupt("axis length overflows usize"))?);
        }

        let count = shape
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n))
            .ok_or(DecodingError::Corrupt("dataset is too large"))?;
        let values = self.read_values::<8, f64>(count)?;

        let mut trailing = [0u8; 1];
        if self.reader.read(&mut trailing)? != 0 {
            return Err(DecodingError::Corrupt("trailing bytes after dataset"));
        }

        Ok(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
    }
}

/// One stored run: its named arrays and its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentGroup {
    pub datasets: BTreeMap<String, ArrayD<f64>>,
    pub attributes: Map<String, Value>,
}

impl ExperimentGroup {
    pub fn dataset(&self, name: &str) -> Option<&ArrayD<f64>> {
        self.datasets.get(name)
    }

    /// The run metadata stored with this group.
    pub fn metadata(&self) -> Result<RunMetadata, DecodingError> {
        Ok(serde_json::from_value(Value::Object(self.attributes.clone()))?)
    }
}

/// An experiment read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentFile {
    pub attributes: Map<String, Value>,
    pub groups: BTreeMap<String, ExperimentGroup>,
}

impl ExperimentFile {
    pub fn created_at(&self) -> Option<&str> {
        self.attributes.get("created_at").and_then(Value::as_str)
    }

    pub fn group(&self, name: &str) -> Option<&ExperimentGroup> {
        self.groups.get(name)
    }
}

/// Loads every group of the experiment at `path`.
pub fn load_file(path: impl AsRef<Path>) -> Result<ExperimentFile, DecodingError> {
    let path = path.as_ref();
    let attributes_path = path.join(ATTRIBUTES_FILE);

    if !attributes_path.is_file() {
        return Err(DecodingError::NotAnExperiment(path.to_path_buf()));
    }

    let attributes = read_attributes(&attributes_path)?;
    let mut groups = BTreeMap::new();

    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if !entry.file_type()?.is_dir() || name.starts_with('.') {
            continue;
        }

        let group = load_group(&entry.path())?;
        debug!(group = %name, datasets = group.datasets.len(), "loaded group");
        groups.insert(name, group);
    }

    Ok(ExperimentFile { attributes, groups })
}

fn load_group(path: &Path) -> Result<ExperimentGroup, DecodingError> {
    let attributes = read_attributes(&path.join(ATTRIBUTES_FILE))?;
    let mut datasets = BTreeMap::new();

    for entry in fs::read_dir(path)? {
        let file = entry?.path();
        if file.extension().is_some_and(|ext| ext == DATASET_EXTENSION) {
            if let Some(stem) = file.file_stem() {
                let name = stem.to_string_lossy().into_owned();
                datasets.insert(name, DatasetDecoder::open(&file)?.decode()?);
            }
        }
    }

    Ok(ExperimentGroup { datasets, attributes })
}

fn read_attributes(path: &Path) -> Result<Map<String, Value>, DecodingError> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

#[derive(Debug, Error)]
pub enum DecodingError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error("{0} is not an experiment file")]
    NotAnExperiment(PathBuf),

    #[error("corrupt dataset: {0}")]
    Corrupt(&'static str),
}

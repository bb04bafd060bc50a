use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;
use ndarray::{ArrayBase, Data, Dimension};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use karman_fluids::extract::ExtractedFields;

use crate::{as_bytes::AsBytes, ATTRIBUTES_FILE, DATASET_EXTENSION};

/// Writes one array as `ndim: u8`, `shape: [u64; ndim]`, then the values in row-major order.
pub struct DatasetEncoder<W: Write> {
    writer: BufWriter<W>,
}

impl DatasetEncoder<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, EncodingError> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> DatasetEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    fn encode_values<const N: usize, T, I>(&mut self, values: I) -> Result<(), EncodingError>
    where
        I: Iterator<Item = T>,
        T: AsBytes<N>,
    {
        let bytes: Vec<_> = values.flat_map(|v| v.to_bytes()).collect();
        self.writer.write_all(&bytes)?;

        Ok(())
    }

    pub fn encode<S, D>(mut self, array: &ArrayBase<S, D>) -> Result<(), EncodingError>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        let ndim = u8::try_from(array.ndim()).map_err(|_| EncodingError::TooManyAxes(array.ndim()))?;

        self.encode_values(std::iter::once(ndim))?;
        self.encode_values(array.shape().iter().map(|&n| n as u64))?;
        self.encode_values(array.iter().copied())?;
        self.writer.flush()?;

        Ok(())
    }
}

/// Creates an empty experiment at `path`, replacing any experiment already there.
///
/// The experiment records its creation time in the `created_at` attribute. A path holding
/// something other than an experiment is left untouched and reported as an error.
pub fn create_file(path: impl AsRef<Path>) -> Result<(), EncodingError> {
    let path = path.as_ref();

    if path.exists() {
        if !path.join(ATTRIBUTES_FILE).is_file() {
            return Err(EncodingError::NotAnExperiment(path.to_path_buf()));
        }
        fs::remove_dir_all(path)?;
    }

    fs::create_dir_all(path)?;

    let mut attributes = Map::new();
    attributes.insert("created_at".into(), Value::String(Utc::now().to_rfc3339()));
    write_attributes(&path.join(ATTRIBUTES_FILE), &attributes)?;

    info!(path = %path.display(), "created experiment file");
    Ok(())
}

/// Stores `fields` as group `group` of the experiment at `path`, creating the experiment if it
/// does not exist yet. An existing group of the same name is replaced.
pub fn append_experiment(path: impl AsRef<Path>, group: &str, fields: &ExtractedFields) -> Result<(), EncodingError> {
    let path = path.as_ref();
    validate_group_name(group)?;

    if !path.exists() {
        create_file(path)?;
    } else if !path.join(ATTRIBUTES_FILE).is_file() {
        return Err(EncodingError::NotAnExperiment(path.to_path_buf()));
    }

    // Write the new group beside the old one, then swap, so a failed write never leaves a
    // half-written group under the final name.
    let staging = path.join(format!(".{group}.partial"));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir(&staging)?;

    for (name, array) in fields.datasets() {
        DatasetEncoder::create(staging.join(name).with_extension(DATASET_EXTENSION))?.encode(array)?;
        debug!(group, dataset = name, shape = ?array.shape(), "wrote dataset");
    }

    let mut attributes = match serde_json::to_value(&fields.metadata)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    attributes.insert("slice_index".into(), Value::from(fields.slice_index));
    write_attributes(&staging.join(ATTRIBUTES_FILE), &attributes)?;

    let target = path.join(group);
    let replaced = target.exists();
    if replaced {
        fs::remove_dir_all(&target)?;
    }
    fs::rename(&staging, &target)?;

    info!(path = %path.display(), group, replaced, "stored experiment");
    Ok(())
}

fn write_attributes(path: &Path, attributes: &Map<String, Value>) -> Result<(), EncodingError> {
    let json = serde_json::to_string_pretty(attributes)?;
    fs::write(path, json)?;
    Ok(())
}

fn validate_group_name(group: &str) -> Result<(), EncodingError> {
    let valid = !group.is_empty()
        && !group.starts_with(['.', '_'])
        && group.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(EncodingError::InvalidGroupName(group.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid group name {0:?}")]
    InvalidGroupName(String),

    #[error("{0} exists but is not an experiment file")]
    NotAnExperiment(PathBuf),

    #[error("cannot store an array with {0} axes")]
    TooManyAxes(usize),
}

//! On-disk experiment files.
//!
//! An experiment is a directory with an `_attrs.json` file and one subdirectory per stored run
//! (a group). Each group holds one `<name>.dat` file per array plus its own `_attrs.json`.

pub mod as_bytes;
pub mod decode;
pub mod encode;

pub use decode::{load_file, DecodingError, ExperimentFile, ExperimentGroup};
pub use encode::{append_experiment, create_file, EncodingError};

pub const ATTRIBUTES_FILE: &str = "_attrs.json";
pub const DATASET_EXTENSION: &str = "dat";

/// Group name of a run in a Reynolds-number sweep.
pub fn reynolds_group_name(reynolds_number: f64) -> String {
    format!("NS_{reynolds_number}")
}

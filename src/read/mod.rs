//! Labeled, partitioned datasets.
//!
//! A dataset is a collection of [`Partition`]s, one per data description
//! (spectral window) plus a distinguished "global" partition holding
//! observation-wide metadata. Partitions are only ever read; converting one
//! produces a new partition.

mod error;
pub mod fits;
pub mod ms;
pub mod uvfits;

pub use error::ReadError;

use std::fmt::Display;

use indexmap::IndexMap;
use ndarray::prelude::*;

/// Attribute and data-variable names shared by the readers and the resolvers.
pub mod keys {
    pub const TELESCOPE_NAME: &str = "OBS_TELESCOPE_NAME";
    pub const TIME_RANGE: &str = "OBS_TIME_RANGE";
    pub const TIME: &str = "TIME";
    pub const DATE: &str = "OBS_DATE";
    pub const ANT_NAME: &str = "ANT_NAME";
    pub const ANT_POSITION: &str = "ANT_POSITION";
    pub const FIELD_NAME: &str = "FIELD_NAME";
    pub const PHASE_DIR: &str = "FIELD_PHASE_DIR";
    pub const SRC_DIRECTION: &str = "SRC_DIRECTION";
    pub const DIRECTION_REF: &str = "DIRECTION_REF";
    pub const SRC_SYSVEL: &str = "SRC_SYSVEL";
    pub const SRC_DISTANCE: &str = "SRC_DISTANCE";

    pub const CHAN_FREQ: &str = "chan_freq";
    pub const CHAN_WIDTH: &str = "chan_width";
    pub const MEAS_FREQ_REF: &str = "MEAS_FREQ_REF";
    pub const REF_FREQUENCY: &str = "REF_FREQUENCY";
    pub const SPECTRAL_WINDOW_ID: &str = "SPECTRAL_WINDOW_ID";

    /// The name of the channel dimension.
    pub const CHAN_DIM: &str = "chan";

    // Written to converted partitions.
    pub const FRAME_CONVERSION_FROM: &str = "frame_conversion_from";
    pub const REFERENCE_TIME: &str = "reference_time";
    pub const REFERENCE_LOCATION: &str = "reference_location";
    pub const TARGET_DIRECTION: &str = "target_direction";
    pub const DOPPLER_RATIO: &str = "doppler_ratio";

    /// Appended to a variable's name to label the frame of a converted
    /// variable that `MEAS_FREQ_REF` doesn't describe.
    pub const VARIABLE_FRAME_SUFFIX: &str = "_frame";
}

/// Identifies a partition within a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartitionKey {
    /// Observation-wide metadata.
    Global,

    /// Per data-description (spectral window) data.
    Ddi(usize),
}

impl Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionKey::Global => write!(f, "global"),
            PartitionKey::Ddi(i) => write!(f, "ddi_{i}"),
        }
    }
}

/// A value stored against a key in a partition.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Float(f64),
    Int(i64),
    Floats(ArrayD<f64>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Floats(Array1::from(v).into_dyn())
    }
}

/// An array with named dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct DataVar {
    pub dims: Vec<String>,
    pub values: ArrayD<f64>,
}

impl DataVar {
    pub fn new<S: AsRef<str>>(
        name: &str,
        dims: &[S],
        values: ArrayD<f64>,
    ) -> Result<DataVar, ReadError> {
        if dims.len() != values.ndim() {
            return Err(ReadError::DimMismatch {
                name: name.to_string(),
                ndim: values.ndim(),
                num_dims: dims.len(),
            });
        }
        Ok(DataVar {
            dims: dims.iter().map(|d| d.as_ref().to_string()).collect(),
            values,
        })
    }

    /// The index of the named dimension, if it exists.
    pub fn axis_of(&self, dim: &str) -> Option<Axis> {
        self.dims.iter().position(|d| d == dim).map(Axis)
    }
}

/// A mapping from named attributes and data variables to values.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub key: PartitionKey,
    pub attrs: IndexMap<String, Value>,
    pub data_vars: IndexMap<String, DataVar>,
}

impl Partition {
    pub fn new(key: PartitionKey) -> Partition {
        Partition {
            key,
            attrs: IndexMap::new(),
            data_vars: IndexMap::new(),
        }
    }

    /// Builder-style attribute insertion.
    pub fn with_attr<V: Into<Value>>(mut self, name: &str, value: V) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    /// Builder-style data-variable insertion.
    pub fn with_var<S: AsRef<str>>(
        mut self,
        name: &str,
        dims: &[S],
        values: ArrayD<f64>,
    ) -> Result<Self, ReadError> {
        let var = DataVar::new(name, dims, values)?;
        self.data_vars.insert(name.to_string(), var);
        Ok(self)
    }

    /// Get a string attribute. Integer and float attributes are not coerced.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name) {
            Some(Value::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get a scalar. Single-element arrays (attribute or data variable) are
    /// accepted too.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.attrs.get(name) {
            Some(Value::Float(f)) => Some(*f),
            Some(Value::Int(i)) => Some(*i as f64),
            Some(Value::Floats(a)) if a.len() == 1 => a.iter().next().copied(),
            Some(_) => None,
            None => self
                .data_vars
                .get(name)
                .filter(|v| v.values.len() == 1)
                .and_then(|v| v.values.iter().next().copied()),
        }
    }

    /// Get an array of floats, looking at attributes first and then data
    /// variables.
    pub fn get_floats(&self, name: &str) -> Option<ArrayViewD<f64>> {
        match self.attrs.get(name) {
            Some(Value::Floats(a)) => Some(a.view()),
            Some(_) => None,
            None => self.data_vars.get(name).map(|v| v.values.view()),
        }
    }
}

/// Read access to a partitioned dataset.
pub trait DatasetRead: Sync + Send {
    /// Read a single partition.
    fn read(&self, key: PartitionKey) -> Result<Partition, ReadError>;

    /// All of the partitions available, the global partition included.
    fn partition_keys(&self) -> Vec<PartitionKey>;
}

/// A dataset whose partitions are already in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    partitions: IndexMap<PartitionKey, Partition>,
}

impl InMemoryDataset {
    pub fn new() -> InMemoryDataset {
        InMemoryDataset::default()
    }

    /// Insert a partition, replacing any other with the same key.
    pub fn insert(&mut self, partition: Partition) {
        self.partitions.insert(partition.key, partition);
    }

    pub fn with_partition(mut self, partition: Partition) -> Self {
        self.insert(partition);
        self
    }
}

impl DatasetRead for InMemoryDataset {
    fn read(&self, key: PartitionKey) -> Result<Partition, ReadError> {
        self.partitions
            .get(&key)
            .cloned()
            .ok_or(ReadError::MissingPartition(key))
    }

    fn partition_keys(&self) -> Vec<PartitionKey> {
        self.partitions.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_lookups() {
        let p = Partition::new(PartitionKey::Global)
            .with_attr(keys::TELESCOPE_NAME, "MWA")
            .with_attr(keys::SRC_SYSVEL, 1500.0)
            .with_attr("count", 3_i64)
            .with_var(
                keys::TIME_RANGE,
                &["t"],
                array![4.9e9, 4.9e9 + 120.0].into_dyn(),
            )
            .unwrap()
            .with_var("single", &["x"], array![7.0].into_dyn())
            .unwrap();

        assert_eq!(p.get_str(keys::TELESCOPE_NAME), Some("MWA"));
        assert_eq!(p.get_str(keys::SRC_SYSVEL), None);
        assert_eq!(p.get_f64(keys::SRC_SYSVEL), Some(1500.0));
        assert_eq!(p.get_f64("count"), Some(3.0));
        assert_eq!(p.get_f64("single"), Some(7.0));
        // Two elements can't be a scalar.
        assert_eq!(p.get_f64(keys::TIME_RANGE), None);
        assert_eq!(p.get_floats(keys::TIME_RANGE).unwrap().len(), 2);
        assert!(p.get_floats(keys::TELESCOPE_NAME).is_none());
        assert!(p.get_floats("nothing").is_none());
    }

    #[test]
    fn data_var_dims_must_match() {
        let result = Partition::new(PartitionKey::Ddi(0)).with_var(
            keys::CHAN_FREQ,
            &["time", "chan"],
            array![1.0, 2.0].into_dyn(),
        );
        assert!(matches!(
            result,
            Err(ReadError::DimMismatch {
                ndim: 1,
                num_dims: 2,
                ..
            })
        ));
    }

    #[test]
    fn in_memory_dataset_reads_partitions() {
        let dataset = InMemoryDataset::new()
            .with_partition(Partition::new(PartitionKey::Global))
            .with_partition(Partition::new(PartitionKey::Ddi(3)));

        assert_eq!(
            dataset.partition_keys(),
            vec![PartitionKey::Global, PartitionKey::Ddi(3)]
        );
        assert_eq!(
            dataset.read(PartitionKey::Ddi(3)).unwrap().key,
            PartitionKey::Ddi(3)
        );
        assert!(matches!(
            dataset.read(PartitionKey::Ddi(0)),
            Err(ReadError::MissingPartition(PartitionKey::Ddi(0)))
        ));
        assert_eq!(PartitionKey::Ddi(3).to_string(), "ddi_3");
        assert_eq!(PartitionKey::Global.to_string(), "global");
    }
}

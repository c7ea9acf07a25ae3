use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Malformed template path {path:?}: {reason}")]
    MalformedPath { path: String, reason: String },
    #[error("Pattern {pattern:?} has {expected} variadic wildcards but only {given} identifiers were given")]
    MissingIdentifiers {
        pattern: String,
        expected: usize,
        given: usize,
    },
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Could not find NXDL definition {0} in any of the definition directories")]
    DefinitionNotFound(String),
    #[error("Failed to parse NXDL file {0:?}: {1}")]
    BadXml(PathBuf, String),
    #[error("NXDL file {0:?} does not have a definition root element")]
    NoDefinition(PathBuf),
    #[error("Definition {0} has an unknown category {1}")]
    UnknownCategory(String, String),
    #[error("Node {path} in definition {definition} declares unknown type {nx_type}")]
    UnknownType {
        definition: String,
        path: String,
        nx_type: String,
    },
    #[error("Node {path} in definition {definition} has an unparsable occurrence value {value}")]
    BadOccurrence {
        definition: String,
        path: String,
        value: String,
    },
    #[error("Node {path} in definition {definition} has minOccurs {min} larger than maxOccurs {max}")]
    ContradictoryOccurrence {
        definition: String,
        path: String,
        min: u32,
        max: u32,
    },
    #[error("Node in definition {definition} is missing both name and type")]
    UnnamedNode { definition: String },
    #[error("Inheritance cycle detected in definitions: {}", .0.join(" -> "))]
    InheritanceCycle(Vec<String>),
    #[error("Failed to parse definitions version file: {0}")]
    VersionFile(#[from] serde_yaml::Error),
    #[error("Schema loading failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("Array is not rectangular; rows have differing lengths")]
    Ragged,
    #[error("Compression strength {0} is outside of the allowed range 1-9")]
    BadStrength(i64),
    #[error("Compressed array descriptor at {0} does not hold an array")]
    NotAnArray(String),
    #[error("Failed to build array: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

#[derive(Debug, Error)]
pub enum FlattenError {
    #[error("Flattener failed due to path error: {0}")]
    PathError(#[from] PathError),
    #[error("Flattener failed due to value error: {0}")]
    ValueError(#[from] ValueError),
    #[error("Flattener can only flatten mappings with string keys; found key {0:?}")]
    NonStringKey(String),
    #[error("The string at {0} starts with @link: and would read back as a link")]
    LinkSentinelString(String),
    #[error("Flattener expected a mapping at the top level")]
    NotAMapping,
    #[error("Could not read ELN file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("ELN file {0:?} has an unsupported extension; expected .yaml, .yml or .json")]
    UnsupportedFormat(PathBuf),
    #[error("Flattener failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Flattener failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Flattener failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("The required field or group {0} is missing")]
    MissingRequired(String),
    #[error("The value at {path} should be one of {expected}; found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },
    #[error("The value at {path} should be one of the following: {allowed:?}; found {found}")]
    EnumViolation {
        path: String,
        allowed: Vec<String>,
        found: String,
    },
    #[error("The value at {path} is not a timezone-aware ISO 8601 date: {found:?}")]
    DateFormatError { path: String, found: String },
    #[error("The value at {path} should be a strictly positive integer; found {found}")]
    PosIntViolation { path: String, found: String },
    #[error("The optional group {group} is partially filled; missing required children: {missing:?}")]
    OptionalParentInconsistency { group: String, missing: Vec<String> },
    #[error("The concept {concept} appears {count} times below {parent}; allowed range is {min}..{max}")]
    OccurrenceViolation {
        parent: String,
        concept: String,
        count: usize,
        min: u32,
        max: String,
    },
    #[error("The value at {path} has rank {found} but the definition declares rank {expected}")]
    DimensionMismatch {
        path: String,
        expected: usize,
        found: usize,
    },
    #[error("The unit {unit:?} at {path} is not a unit of category {category}")]
    UnitMismatch {
        path: String,
        unit: String,
        category: String,
    },
    #[error("The units attribute {0} was given without its field")]
    UnitsWithoutField(String),
    #[error("Malformed key in template: {0}")]
    BadKey(#[from] PathError),
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("Writer was given a dict it does not know how to write at {0}")]
    InvalidDictProvided(String),
    #[error("Writer failed because {0} is not a valid path: {1}")]
    BadPath(String, PathError),
    #[error("Writer could not place {0}: a dataset or link already exists where a group is needed")]
    NotAGroup(String),
    #[error("Writer could not attach attribute {0} because its parent object was never created")]
    OrphanAttribute(String),
    #[error("Writer cannot write the {1} at {0}")]
    UnsupportedValue(String, String),
    #[error("Writer failed to shape an array: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
    #[error("Writer failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Writer failed to encode a string for HDF5: {0}")]
    StringError(#[from] hdf5::types::StringError),
    #[error("Writer failed to format the file time: {0}")]
    TimeError(#[from] time::error::Format),
    #[error("Writer failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("No reader named {0} is registered")]
    UnknownReader(String),
    #[error("Reader {reader} does not support the application definition {nxdl}")]
    UnsupportedDefinition { reader: String, nxdl: String },
    #[error("Reader {reader} does not know how to read file {path:?}")]
    UnsupportedFile { reader: String, path: PathBuf },
    #[error("Reader {0} requires at least one input file")]
    NoInputFiles(String),
    #[error("Reader json_map did not receive a mapping file (*.mapping.json or *.mapping.yaml)")]
    NoMappingFile,
    #[error("The mapping entry {key} refers to {data_path} which is not in the data file")]
    MissingData { key: String, data_path: String },
    #[error("Reader failed due to path error: {0}")]
    PathError(#[from] PathError),
    #[error("Reader failed due to flattener error: {0}")]
    FlattenError(#[from] FlattenError),
    #[error("Reader failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Reader failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Reader failed due to value error: {0}")]
    ValueError(#[from] ValueError),
    #[error("Reader failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has an invalid value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("Conversion failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Conversion failed due to Schema error: {0}")]
    SchemaError(#[from] SchemaError),
    #[error("Conversion failed due to Reader error: {0}")]
    ReaderError(#[from] ReaderError),
    #[error("Conversion failed due to Flattener error: {0}")]
    FlattenError(#[from] FlattenError),
    #[error("Conversion failed due to Validation error: {0}")]
    ValidationError(#[from] ValidationError),
    #[error("Conversion failed due to Writer error: {0}")]
    WriterError(#[from] WriterError),
}

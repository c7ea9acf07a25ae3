// Shared names and defaults used throughout the converter

/// Environment variable pointing at a NeXus definitions checkout
pub const DEFINITIONS_ENV_VAR: &str = "NEXUS_DEFINITIONS";
/// Sub-directories of a definitions checkout searched for NXDL files, in order
pub const DEFINITION_SUBDIRS: [&str; 3] = ["applications", "contributed_definitions", "base_classes"];
pub const NXDL_SUFFIX: &str = ".nxdl.xml";
/// Version/provenance file expected at the root of a definitions checkout
pub const DEFINITIONS_VERSION_FILE: &str = "nexus_version.yml";
pub const NEXUS_REPOSITORY_URL: &str = "https://github.com/nexusformat/definitions";

pub const NX_CLASS_ATTR: &str = "NX_class";
pub const UNITS_ATTR: &str = "units";
pub const DEFAULT_ATTR: &str = "default";
pub const ROOT_NX_CLASS: &str = "NXroot";
pub const ENTRY_NX_CLASS: &str = "NXentry";
pub const DATA_NX_CLASS: &str = "NXdata";

// Root level provenance attributes, always owned by the writer
pub const FILE_NAME_ATTR: &str = "file_name";
pub const FILE_TIME_ATTR: &str = "file_time";
pub const FILE_UPDATE_TIME_ATTR: &str = "file_update_time";
pub const NEXUS_VERSION_ATTR: &str = "NeXus_version";
pub const NEXUS_REPOSITORY_ATTR: &str = "NeXus_repository";
pub const HDF5_VERSION_ATTR: &str = "HDF5_version";
pub const CREATOR_ATTR: &str = "creator";
pub const CREATOR_VERSION_ATTR: &str = "creator_version";

/// String values starting with this sentinel become link descriptors in the flattener
pub const LINK_SENTINEL: &str = "@link:";
/// Values in a json_map mapping starting with this sentinel are looked up in the data file
pub const DATA_SENTINEL: &str = "@data:";

pub const DEFAULT_ELN_PARENT_KEY: &str = "/ENTRY[entry]";
pub const DEFAULT_COMPRESSION_STRENGTH: u8 = 9;
pub const MIN_COMPRESSION_STRENGTH: u8 = 1;
pub const MAX_COMPRESSION_STRENGTH: u8 = 9;

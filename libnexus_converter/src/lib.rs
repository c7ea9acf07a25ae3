//! # nexus_converter
//!
//! nexus_converter turns experimental data into NeXus/HDF5 files, written in Rust. Given
//! the name of an application definition (an NXDL schema), it builds a *template*: a flat
//! map from every location the definition allows to an empty value. A reader fills the
//! template from the input files, the template is validated against the definition, and
//! the result is written to an HDF5 file.
//!
//! ## Installation
//!
//! Currently the only method of install is from source.
//!
//! ### HDF5
//!
//! Before building and running nexus_converter, HDF5 must be installed. Typically this
//! will be installed using a package manager (homebrew, apt, etc), and the Rust libraries
//! will auto detect the location of the HDF install. If HDF5 lives in a custom location,
//! write the following snippet into the file `.cargo/config.toml` in the repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./nexus_converter_cli` from the
//! top level repository.
//!
//! ## Definitions
//!
//! Application definitions and base classes are looked up in a NeXus definitions
//! checkout (the `applications`, `contributed_definitions` and `base_classes`
//! directories). The checkout is taken from the `definitions_path` of the configuration,
//! else from the `NEXUS_DEFINITIONS` environment variable, else from the small set bundled
//! in `libnexus_converter/definitions`. A `nexus_version.yml` at the root of the checkout
//! records the version written to the output file.
//!
//! ## Template Paths
//!
//! Template keys are pseudo-XPaths. A segment is either a concrete name (`program_name`),
//! a variadic concept bound to an instance name (`ENTRY[my_entry]`), or an attribute
//! (`@units`):
//!
//! ```text
//! /ENTRY[my_entry]/NXODD_name/int_value
//! /ENTRY[my_entry]/NXODD_name/int_value/@units
//! /ENTRY[my_entry]/USER[user1]/name
//! ```
//!
//! In the HDF5 file the instance name is used, so the paths above become
//! `/my_entry/NXODD_name/int_value` and so on.
//!
//! ## Configuration
//!
//! A conversion is described by a YAML file:
//!
//! ```yml
//! nxdl: NXtest
//! reader: eln
//! input_files: []
//! output: output.nxs
//! eln_path: null
//! definitions_path: null
//! convert_dict: {}
//! replace_nested: {}
//! eln_parent_key: /ENTRY[entry]
//! skip_validation: false
//! ```
//!
//! - nxdl: Name of the application definition
//! - reader: `eln` (nested YAML/JSON metadata) or `json_map` (a `*.mapping.json` file
//! binding template paths to values in a data file)
//! - eln_path: Optional ELN file whose values override the reader's
//! - convert_dict / replace_nested / eln_parent_key: Key renames, path rewrites and the
//! path prefix used when flattening the ELN file and the input files of the `eln` reader
//!
//! ## Output
//!
//! The output file carries the usual NeXus root attributes (`NX_class`, `file_name`,
//! `file_time`, `NeXus_version`, `HDF5_version`, `creator`, ...). Every group is tagged with
//! its `NX_class`, and `@default` attributes point at the first entry and its first
//! `NXdata` group.
pub mod config;
pub mod constants;
pub mod convert;
pub mod eln_reader;
pub mod error;
pub mod flatten;
pub mod generator;
pub mod json_map_reader;
pub mod nxdl;
pub mod path;
pub mod reader;
pub mod template;
pub mod units;
pub mod validation;
pub mod value;
pub mod writer;

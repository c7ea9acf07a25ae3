use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::eln_reader::ElnReader;
use super::error::ReaderError;
use super::flatten::FlattenRules;
use super::json_map_reader::JsonMapReader;
use super::template::Template;
use super::value::Value;

/// Marker in `supported_nxdls` for readers that fill any application definition
pub const ANY_NXDL: &str = "*";

/// A format-specific parser that fills a generated template.
///
/// Readers never write outside the template: everything they produce lands as a path key.
pub trait Reader {
    fn name(&self) -> &'static str;

    /// Application definitions this reader can fill
    fn supported_nxdls(&self) -> &'static [&'static str];

    /// Populate a copy of the template from the input files and in-memory objects
    fn read(
        &self,
        template: &Template,
        file_paths: &[PathBuf],
        objects: &[Value],
    ) -> Result<Template, ReaderError>;

    fn supports(&self, nxdl: &str) -> bool {
        self.supported_nxdls()
            .iter()
            .any(|supported| *supported == ANY_NXDL || *supported == nxdl)
    }
}

/// The readers shipped with the library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderKind {
    Eln,
    JsonMap,
}

impl ReaderKind {
    pub const ALL: [ReaderKind; 2] = [ReaderKind::Eln, ReaderKind::JsonMap];

    pub fn reader(&self) -> Box<dyn Reader> {
        match self {
            ReaderKind::Eln => Box::new(ElnReader::default()),
            ReaderKind::JsonMap => Box::new(JsonMapReader),
        }
    }

    /// The reader with the flattening rules of a conversion. Only the eln reader flattens.
    pub fn configured(&self, rules: FlattenRules) -> Box<dyn Reader> {
        match self {
            ReaderKind::Eln => Box::new(ElnReader::new(rules)),
            ReaderKind::JsonMap => Box::new(JsonMapReader),
        }
    }
}

impl Display for ReaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReaderKind::Eln => write!(f, "eln"),
            ReaderKind::JsonMap => write!(f, "json_map"),
        }
    }
}

impl FromStr for ReaderKind {
    type Err = ReaderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.to_string() == s)
            .ok_or_else(|| ReaderError::UnknownReader(s.to_string()))
    }
}

/// Look a reader up by name
pub fn get_reader(name: &str) -> Result<Box<dyn Reader>, ReaderError> {
    Ok(name.parse::<ReaderKind>()?.reader())
}

/// Look a reader up by name, set it up with the flattening rules and check it can fill
/// the given definition
pub fn get_reader_for(
    name: &str,
    nxdl: &str,
    rules: FlattenRules,
) -> Result<Box<dyn Reader>, ReaderError> {
    let reader = name.parse::<ReaderKind>()?.configured(rules);
    if !reader.supports(nxdl) {
        return Err(ReaderError::UnsupportedDefinition {
            reader: name.to_string(),
            nxdl: nxdl.to_string(),
        });
    }
    Ok(reader)
}

/// Lowercase extension of a file, if any
pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        assert_eq!(get_reader("eln").unwrap().name(), "eln");
        assert_eq!(get_reader("json_map").unwrap().name(), "json_map");
        assert!(matches!(
            get_reader("xps"),
            Err(ReaderError::UnknownReader(name)) if name == "xps"
        ));
        for kind in ReaderKind::ALL {
            assert_eq!(kind.to_string().parse::<ReaderKind>().unwrap(), kind);
            assert!(kind.reader().supports("NXtest"));
        }
    }
}

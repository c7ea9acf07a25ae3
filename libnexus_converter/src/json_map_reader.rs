use serde_yaml::{Mapping, Value as YamlValue};
use std::path::{Path, PathBuf};

use super::constants::DATA_SENTINEL;
use super::error::ReaderError;
use super::path;
use super::reader::{extension_of, Reader, ANY_NXDL};
use super::template::Template;
use super::value::Value;

const MAPPING_SUFFIXES: [&str; 3] = [".mapping.json", ".mapping.yaml", ".mapping.yml"];

/// Fills a template through a mapping file.
///
/// The mapping binds template paths to values. A value of the form `@data:a/b/0` is looked
/// up in the data files (mapping keys, then sequence indices); anything else is taken as
/// a literal:
///
/// ```json
/// {
///   "/ENTRY[entry]/NXODD_name/int_value": "@data:measurement/counts",
///   "/ENTRY[entry]/NXODD_name/int_value/@units": "eV"
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMapReader;

fn is_mapping_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    MAPPING_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

fn read_tree(path: &Path) -> Result<YamlValue, ReaderError> {
    let text = std::fs::read_to_string(path)?;
    match extension_of(path).as_deref() {
        Some("json") => {
            let json = serde_json::from_str::<serde_json::Value>(&text)?;
            Ok(serde_yaml::to_value(json)?)
        }
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str::<YamlValue>(&text)?),
        _ => Err(ReaderError::UnsupportedFile {
            reader: String::from("json_map"),
            path: path.to_path_buf(),
        }),
    }
}

/// Merge the top-level keys of several data trees; later trees win
fn merge_into(target: &mut Mapping, tree: YamlValue) {
    if let YamlValue::Mapping(map) = tree {
        for (key, value) in map {
            target.insert(key, value);
        }
    }
}

/// Follow a slash path through nested mappings and sequences
fn lookup<'a>(data: &'a YamlValue, data_path: &str) -> Option<&'a YamlValue> {
    data_path
        .split('/')
        .filter(|s| !s.is_empty())
        .try_fold(data, |node, part| match node {
            YamlValue::Mapping(map) => map.get(YamlValue::String(part.to_string())),
            YamlValue::Sequence(seq) => part.parse::<usize>().ok().and_then(|i| seq.get(i)),
            _ => None,
        })
}

impl Reader for JsonMapReader {
    fn name(&self) -> &'static str {
        "json_map"
    }

    fn supported_nxdls(&self) -> &'static [&'static str] {
        &[ANY_NXDL]
    }

    fn read(
        &self,
        template: &Template,
        file_paths: &[PathBuf],
        objects: &[Value],
    ) -> Result<Template, ReaderError> {
        let mut mapping: Option<YamlValue> = None;
        let mut data = Mapping::new();
        for path in file_paths.iter() {
            if is_mapping_file(path) {
                log::info!("Reading mapping file {}", path.display());
                mapping = Some(read_tree(path)?);
            } else {
                log::info!("Reading data file {}", path.display());
                merge_into(&mut data, read_tree(path)?);
            }
        }
        for object in objects.iter() {
            merge_into(&mut data, object.to_yaml());
        }
        let Some(YamlValue::Mapping(mapping)) = mapping else {
            return Err(ReaderError::NoMappingFile);
        };
        let data = YamlValue::Mapping(data);

        let mut filled = template.clone();
        for (key, entry) in mapping.iter() {
            let Some(key) = key.as_str() else {
                log::warn!("Skipping non-string mapping key {key:?}");
                continue;
            };
            path::parse(key)?;
            let value = match entry.as_str().and_then(|s| s.strip_prefix(DATA_SENTINEL)) {
                Some(data_path) => {
                    let found = lookup(&data, data_path).ok_or_else(|| ReaderError::MissingData {
                        key: key.to_string(),
                        data_path: data_path.to_string(),
                    })?;
                    Value::from_yaml(found)?
                }
                None => Value::from_yaml(entry)?,
            };
            filled.set(key, value)?;
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_mapping_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = write(
            dir.path(),
            "run.mapping.json",
            r#"{
                "/ENTRY[entry]/NXODD_name/int_value": "@data:measurement/counts",
                "/ENTRY[entry]/NXODD_name/float_value": "@data:measurement/energies",
                "/ENTRY[entry]/NXODD_name/char_value": "@data:meta/labels/1",
                "/ENTRY[entry]/NXODD_name/int_value/@units": "eV",
                "/ENTRY[entry]/definition": "NXtest"
            }"#,
        );
        let data = write(
            dir.path(),
            "run.yaml",
            "measurement:\n  counts: 7\n  energies: [1.5, 2.5]\nmeta:\n  labels: [a, b]\n",
        );

        let filled = JsonMapReader
            .read(&Template::new(), &[mapping, data], &[])
            .unwrap();
        let get = |key: &str| filled.get(key).cloned().unwrap_or_default();
        assert_eq!(get("/ENTRY[entry]/NXODD_name/int_value"), Value::from(7));
        assert_eq!(
            get("/ENTRY[entry]/NXODD_name/float_value"),
            Value::from(vec![1.5, 2.5])
        );
        assert_eq!(get("/ENTRY[entry]/NXODD_name/char_value"), Value::from("b"));
        assert_eq!(get("/ENTRY[entry]/NXODD_name/int_value/@units"), Value::from("eV"));
        assert_eq!(get("/ENTRY[entry]/definition"), Value::from("NXtest"));
    }

    #[test]
    fn test_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let data = write(dir.path(), "run.json", r#"{"a": 1}"#);
        let result = JsonMapReader.read(&Template::new(), &[data.clone()], &[]);
        assert!(matches!(result, Err(ReaderError::NoMappingFile)));

        let mapping = write(dir.path(), "run.mapping.yaml", "/ENTRY[entry]/x: '@data:b'\n");
        let result = JsonMapReader.read(&Template::new(), &[mapping, data], &[]);
        assert!(matches!(
            result,
            Err(ReaderError::MissingData { data_path, .. }) if data_path == "b"
        ));
    }
}

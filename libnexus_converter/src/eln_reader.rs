use serde_yaml::Value as YamlValue;
use std::path::PathBuf;

use super::constants::DEFAULT_ELN_PARENT_KEY;
use super::error::ReaderError;
use super::flatten::{flatten, read_eln_file, FlattenRules};
use super::reader::{extension_of, Reader, ANY_NXDL};
use super::template::Template;
use super::value::Value;

/// Fills a template straight from nested YAML/JSON metadata files.
///
/// Keys are placed below the parent key of the flattening rules, `/ENTRY[entry]` unless
/// configured otherwise. Mapping objects passed in memory are flattened the same way.
#[derive(Debug, Clone)]
pub struct ElnReader {
    rules: FlattenRules,
}

impl Default for ElnReader {
    fn default() -> Self {
        Self::new(FlattenRules {
            parent_key: DEFAULT_ELN_PARENT_KEY.to_string(),
            ..Default::default()
        })
    }
}

impl ElnReader {
    pub fn new(rules: FlattenRules) -> Self {
        Self { rules }
    }

    fn fill(&self, template: &mut Template, tree: &YamlValue) -> Result<(), ReaderError> {
        for (key, value) in flatten(tree, &self.rules)? {
            template.set(&key, value)?;
        }
        Ok(())
    }
}

impl Reader for ElnReader {
    fn name(&self) -> &'static str {
        "eln"
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
        if file_paths.is_empty() && objects.is_empty() {
            return Err(ReaderError::NoInputFiles(self.name().to_string()));
        }
        let mut filled = template.clone();
        for path in file_paths.iter() {
            match extension_of(path).as_deref() {
                Some("yaml") | Some("yml") | Some("json") => (),
                _ => {
                    return Err(ReaderError::UnsupportedFile {
                        reader: self.name().to_string(),
                        path: path.clone(),
                    })
                }
            }
            log::info!("Reading ELN file {}", path.display());
            let tree = read_eln_file(path)?;
            self.fill(&mut filled, &tree)?;
        }
        for object in objects.iter() {
            match object {
                Value::Dict(_) => self.fill(&mut filled, &object.to_yaml())?,
                other => log::warn!(
                    "The eln reader only accepts mappings as objects; ignoring a {}",
                    other.type_name()
                ),
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Optionality;
    use std::collections::BTreeMap;

    #[test]
    fn test_read_files_and_objects() {
        let dir = tempfile::tempdir().unwrap();
        let eln = dir.path().join("eln.yaml");
        std::fs::write(
            &eln,
            "title: My run\nNXODD_name:\n  int_value: {value: 2, unit: eV}\n",
        )
        .unwrap();

        let mut template = Template::new();
        template.register("/ENTRY/NXODD_name/int_value", Optionality::Required);
        let mut object = BTreeMap::new();
        object.insert(String::from("program_name"), Value::from("converter"));

        let filled = ElnReader::default()
            .read(&template, &[eln], &[Value::Dict(object)])
            .unwrap();
        assert_eq!(
            filled.get("/ENTRY[entry]/NXODD_name/int_value"),
            Some(&Value::from(2))
        );
        assert_eq!(
            filled.optionality_of("/ENTRY[entry]/NXODD_name/int_value"),
            Some(Optionality::Required)
        );
        assert_eq!(
            filled.get("/ENTRY[entry]/NXODD_name/int_value/@units"),
            Some(&Value::from("eV"))
        );
        assert_eq!(filled.get("/ENTRY[entry]/title"), Some(&Value::from("My run")));
        assert_eq!(
            filled.get("/ENTRY[entry]/program_name"),
            Some(&Value::from("converter"))
        );
        // the input template is left untouched
        assert!(template.populated().is_empty());
    }

    #[test]
    fn test_rejects_other_formats() {
        let template = Template::new();
        let result = ElnReader::default().read(&template, &[PathBuf::from("scan.h5")], &[]);
        assert!(matches!(result, Err(ReaderError::UnsupportedFile { .. })));
        let result = ElnReader::default().read(&template, &[], &[]);
        assert!(matches!(result, Err(ReaderError::NoInputFiles(_))));
    }

    #[test]
    fn test_configured_rules() {
        let reader = ElnReader::new(FlattenRules {
            convert_dict: BTreeMap::from([(String::from("title"), String::from("experiment_title"))]),
            replace_nested: BTreeMap::new(),
            parent_key: String::from("/ENTRY[scan]"),
        });
        let mut object = BTreeMap::new();
        object.insert(String::from("title"), Value::from("My run"));
        let filled = reader
            .read(&Template::new(), &[], &[Value::Dict(object)])
            .unwrap();
        assert_eq!(
            filled.get("/ENTRY[scan]/experiment_title"),
            Some(&Value::from("My run"))
        );
        assert_eq!(filled.get("/ENTRY[entry]/title"), None);
    }
}

//! Flattening of nested ELN metadata into template paths.
//!
//! ```yaml
//! ENTRY[entry]:
//!   USER[user]:
//!     - name: Jane
//!     - name: John
//!   temperature: {value: 300, unit: K}
//! ```
//!
//! flattens to `/ENTRY[entry]/USER[user]/name`, `/ENTRY[entry]/USER[user1]/name`,
//! `/ENTRY[entry]/temperature` and `/ENTRY[entry]/temperature/@units`.
use serde_yaml::{Mapping, Value as YamlValue};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::constants::LINK_SENTINEL;
use super::error::FlattenError;
use super::path::{expand_short_form_pair, has_short_form};
use super::value::Value;

const VALUE_KEY: &str = "value";
const UNIT_KEY: &str = "unit";
const UNITS_SUFFIX: &str = "/@units";
const VALUE_SUFFIX: &str = "/value";

/// Rewrites applied while flattening
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlattenRules {
    /// Key renames, applied to each key before it is appended
    pub convert_dict: BTreeMap<String, String>,
    /// Substring rewrites applied to every finished path
    pub replace_nested: BTreeMap<String, String>,
    /// Prefix of every produced path, e.g. `/ENTRY[entry]`
    pub parent_key: String,
}

/// Flatten a nested mapping into template paths and values
pub fn flatten(tree: &YamlValue, rules: &FlattenRules) -> Result<BTreeMap<String, Value>, FlattenError> {
    let YamlValue::Mapping(map) = tree else {
        return Err(FlattenError::NotAMapping);
    };
    let mut flattener = Flattener {
        rules,
        out: BTreeMap::new(),
        collapsed: BTreeSet::new(),
    };
    let prefix = rules.parent_key.trim_end_matches('/').to_string();
    flattener.mapping(map, &prefix)?;
    Ok(flattener.out)
}

/// Read an ELN file: `.yaml`/`.yml` with serde_yaml, `.json` with serde_json
pub fn read_eln_file(path: &Path) -> Result<YamlValue, FlattenError> {
    if !path.exists() {
        return Err(FlattenError::BadFilePath(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str::<YamlValue>(&text)?),
        Some("json") => {
            let json = serde_json::from_str::<serde_json::Value>(&text)?;
            Ok(serde_yaml::to_value(json)?)
        }
        _ => Err(FlattenError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Read and flatten an ELN file in one go
pub fn flatten_file(path: &Path, rules: &FlattenRules) -> Result<BTreeMap<String, Value>, FlattenError> {
    let tree = read_eln_file(path)?;
    flatten(&tree, rules)
}

/// Rebuild a nested mapping from flat paths.
///
/// A field that carries only a `@units` attribute becomes `{value, unit}`; a field with
/// other attributes becomes a mapping holding `value` next to its `@attr` keys. A concrete
/// `unit` child of a field is written as `unit/value` so it does not read back as `@units`.
///
/// Plain strings starting with `@link:` have no nested spelling and are refused.
pub fn unflatten(flat: &BTreeMap<String, Value>) -> Result<YamlValue, FlattenError> {
    #[derive(Default)]
    struct Node {
        value: Option<YamlValue>,
        children: BTreeMap<String, Node>,
    }

    fn to_yaml(node: Node) -> YamlValue {
        let units_only = node.children.len() == 1 && node.children.contains_key("@units");
        match (node.value, node.children.is_empty()) {
            (Some(value), true) => value,
            (Some(value), false) if units_only => {
                let mut map = Mapping::new();
                map.insert(VALUE_KEY.into(), value);
                let unit = node
                    .children
                    .into_values()
                    .next()
                    .and_then(|n| n.value)
                    .unwrap_or(YamlValue::Null);
                map.insert(UNIT_KEY.into(), unit);
                YamlValue::Mapping(map)
            }
            (value, _) => {
                let mut map = Mapping::new();
                let unit_clash = value.is_some() && node.children.len() == 1;
                if let Some(value) = value {
                    map.insert(VALUE_KEY.into(), value);
                }
                for (key, child) in node.children {
                    let key = if unit_clash && key == UNIT_KEY && child.children.is_empty() {
                        format!("{key}{VALUE_SUFFIX}")
                    } else {
                        key
                    };
                    map.insert(YamlValue::String(key), to_yaml(child));
                }
                YamlValue::Mapping(map)
            }
        }
    }

    let mut root = Node::default();
    for (path, value) in flat.iter() {
        if value.as_str().is_some_and(|s| s.starts_with(LINK_SENTINEL)) {
            return Err(FlattenError::LinkSentinelString(path.clone()));
        }
        let mut node = &mut root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.value = Some(value.to_yaml());
    }
    Ok(to_yaml(root))
}

struct Flattener<'a> {
    rules: &'a FlattenRules,
    out: BTreeMap<String, Value>,
    collapsed: BTreeSet<String>,
}

impl Flattener<'_> {
    fn mapping(&mut self, map: &Mapping, prefix: &str) -> Result<(), FlattenError> {
        for (key, value) in map.iter() {
            let key = match key {
                YamlValue::String(s) => s.clone(),
                YamlValue::Number(n) => n.to_string(),
                other => return Err(FlattenError::NonStringKey(format!("{other:?}"))),
            };
            let key = self
                .rules
                .convert_dict
                .get(&key)
                .cloned()
                .unwrap_or(key);

            if has_short_form(&key) {
                for (expanded_key, expanded_value) in expand_short_form_pair(&key, value.as_str()) {
                    match expanded_value {
                        Some(v) => self.entry(&expanded_key, &YamlValue::String(v), prefix)?,
                        None => self.entry(&expanded_key, value, prefix)?,
                    }
                }
            } else {
                self.entry(&key, value, prefix)?;
            }
        }
        Ok(())
    }

    fn entry(&mut self, key: &str, value: &YamlValue, prefix: &str) -> Result<(), FlattenError> {
        let path = format!("{prefix}/{key}");
        match value {
            YamlValue::Mapping(map) => {
                let get = |k: &str| map.get(YamlValue::String(k.to_string()));
                if let (2, Some(field), Some(unit)) = (map.len(), get(VALUE_KEY), get(UNIT_KEY)) {
                    if unit.is_mapping() {
                        // a `unit` child carrying its own attributes
                        return self.mapping(map, &path);
                    }
                    self.emit(&path, Value::from_yaml(field)?);
                    self.emit(&format!("{path}{UNITS_SUFFIX}"), Value::from_yaml(unit)?);
                    return Ok(());
                }
                match Value::from_yaml(value)? {
                    Value::Dict(_) => self.mapping(map, &path),
                    descriptor => {
                        self.emit(&path, descriptor);
                        Ok(())
                    }
                }
            }
            YamlValue::Sequence(seq) if !seq.is_empty() && seq.iter().all(|v| v.is_mapping()) => {
                for (idx, item) in seq.iter().enumerate() {
                    let item_key = match idx {
                        0 => key.to_string(),
                        n => indexed_key(key, n),
                    };
                    self.entry(&item_key, item, prefix)?;
                }
                Ok(())
            }
            YamlValue::String(s) => {
                match s.strip_prefix(LINK_SENTINEL) {
                    Some(target) => self.emit(&path, Value::link(target.trim())),
                    None => self.emit(&path, Value::from(s.as_str())),
                }
                Ok(())
            }
            other => {
                self.emit(&path, Value::from_yaml(other)?);
                Ok(())
            }
        }
    }

    fn emit(&mut self, path: &str, value: Value) {
        let mut path = path.to_string();
        for (old, new) in self.rules.replace_nested.iter() {
            path = path.replace(old.as_str(), new.as_str());
        }

        let collapsed = if let Some(parent) = path.strip_suffix(VALUE_SUFFIX) {
            Some(parent.to_string())
        } else {
            path.strip_suffix(&format!("{VALUE_SUFFIX}{UNITS_SUFFIX}"))
                .map(|parent| format!("{parent}{UNITS_SUFFIX}"))
        };
        let (path, was_collapsed) = match collapsed {
            Some(parent) if !parent.is_empty() && !parent.ends_with('/') => (parent, true),
            _ => (path, false),
        };

        if self.out.contains_key(&path) && (was_collapsed || self.collapsed.contains(&path)) {
            log::warn!(
                "Collapsing a /value key onto {} clashes with an existing entry; the later value is kept",
                path
            );
        }
        if was_collapsed {
            self.collapsed.insert(path.clone());
        }
        self.out.insert(path, value);
    }
}

/// `USER[user]` -> `USER[user2]`, `name` -> `name2`
fn indexed_key(key: &str, index: usize) -> String {
    match key.strip_suffix(']') {
        Some(body) if body.contains('[') => format!("{body}{index}]"),
        _ => format!("{key}{index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> YamlValue {
        serde_yaml::from_str(s).unwrap()
    }

    fn no_prefix() -> FlattenRules {
        FlattenRules::default()
    }

    #[test]
    fn test_short_form_keys_and_values() {
        let flat = flatten(&yaml(r#""*{psi,delta}": "axis_*""#), &no_prefix()).unwrap();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat["/psi"], Value::from("axis_psi"));
        assert_eq!(flat["/delta"], Value::from("axis_delta"));
    }

    #[test]
    fn test_units_links_and_renames() {
        let rules = FlattenRules {
            convert_dict: BTreeMap::from([(String::from("temp"), String::from("temperature"))]),
            replace_nested: BTreeMap::from([(
                String::from("/SAMPLE[sample]/env"),
                String::from("/SAMPLE[sample]"),
            )]),
            parent_key: String::from("/ENTRY[entry]"),
        };
        let tree = yaml(
            r#"
SAMPLE[sample]:
  env:
    temp: {value: 300.5, unit: K}
  name: Si
links:
  data: "@link:/entry/data/x"
"#,
        );
        let flat = flatten(&tree, &rules).unwrap();
        assert_eq!(
            flat["/ENTRY[entry]/SAMPLE[sample]/temperature"],
            Value::from(300.5)
        );
        assert_eq!(
            flat["/ENTRY[entry]/SAMPLE[sample]/temperature/@units"],
            Value::from("K")
        );
        assert_eq!(flat["/ENTRY[entry]/SAMPLE[sample]/name"], Value::from("Si"));
        assert_eq!(
            flat["/ENTRY[entry]/links/data"],
            Value::link("/entry/data/x")
        );
    }

    #[test]
    fn test_sections_are_indexed() {
        let tree = yaml(
            r#"
USER[user]:
  - name: Jane
  - name: John
  - name: Jo
operator:
  - name: Max
  - name: Erika
"#,
        );
        let flat = flatten(&tree, &no_prefix()).unwrap();
        assert_eq!(flat["/USER[user]/name"], Value::from("Jane"));
        assert_eq!(flat["/USER[user1]/name"], Value::from("John"));
        assert_eq!(flat["/USER[user2]/name"], Value::from("Jo"));
        assert_eq!(flat["/operator/name"], Value::from("Max"));
        assert_eq!(flat["/operator1/name"], Value::from("Erika"));
    }

    #[test]
    fn test_value_suffix_collapse() {
        let tree = yaml(
            r#"
energy:
  value: 12
  description: incident
count: 3
"#,
        );
        let flat = flatten(&tree, &no_prefix()).unwrap();
        assert_eq!(flat["/energy"], Value::from(12));
        assert_eq!(flat["/energy/description"], Value::from("incident"));

        // the later value wins on a clash
        let tree = yaml("{x: 1, x/value: 2}");
        let flat = flatten(&tree, &no_prefix()).unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat["/x"], Value::from(2));
    }

    #[test]
    fn test_arrays_and_descriptors() {
        let tree = yaml("{data: [[1, 2], [3, 4]], big: {compress: [1.0, 2.0], strength: 3}}");
        let flat = flatten(&tree, &no_prefix()).unwrap();
        assert!(matches!(&flat["/data"], Value::Array(a) if a.shape() == [2, 2]));
        assert!(matches!(flat["/big"], Value::Compressed { strength: 3, .. }));
        assert!(matches!(
            flatten(&yaml("[1, 2]"), &no_prefix()),
            Err(FlattenError::NotAMapping)
        ));
    }

    #[test]
    fn test_unflatten_round_trip() {
        let flat = BTreeMap::from([
            (String::from("/ENTRY[entry]/title"), Value::from("run 12")),
            (String::from("/ENTRY[entry]/energy"), Value::from(2.5)),
            (String::from("/ENTRY[entry]/energy/@units"), Value::from("eV")),
            (String::from("/ENTRY[entry]/DATA[data]/x"), Value::from(vec![1i64, 2, 3])),
            (String::from("/ENTRY[entry]/DATA[data]/x/@long_name"), Value::from("x")),
            (String::from("/ENTRY[entry]/DATA[data]/@signal"), Value::from("x")),
            (String::from("/ENTRY[entry]/linked"), Value::link("/ENTRY[entry]/title")),
            (String::from("/ENTRY[entry]/source"), Value::from(3)),
            (String::from("/ENTRY[entry]/source/unit"), Value::from("eV")),
            (String::from("/ENTRY[entry]/lamp"), Value::from(1)),
            (String::from("/ENTRY[entry]/lamp/unit"), Value::from("W")),
            (String::from("/ENTRY[entry]/lamp/unit/@note"), Value::from("nominal")),
        ]);
        let nested = unflatten(&flat).unwrap();
        assert_eq!(flatten(&nested, &no_prefix()).unwrap(), flat);

        let sentinel = BTreeMap::from([(String::from("/ENTRY[entry]/s"), Value::from("@link:/x"))]);
        assert!(matches!(
            unflatten(&sentinel),
            Err(FlattenError::LinkSentinelString(path)) if path == "/ENTRY[entry]/s"
        ));
    }

    #[test]
    fn test_read_eln_file_formats() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("eln.json");
        std::fs::write(&json_path, r#"{"sample": {"name": "Si", "mass": 1.5}}"#).unwrap();
        let flat = flatten_file(&json_path, &no_prefix()).unwrap();
        assert_eq!(flat["/sample/mass"], Value::from(1.5));

        let txt_path = dir.path().join("eln.txt");
        std::fs::write(&txt_path, "sample: x").unwrap();
        assert!(matches!(
            read_eln_file(&txt_path),
            Err(FlattenError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            read_eln_file(&dir.path().join("missing.yaml")),
            Err(FlattenError::BadFilePath(_))
        ));
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use super::error::PathError;
use super::path::{self, NexusPath};
use super::value::Value;

/// How strongly the application definition asks for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Optionality {
    Required,
    Recommended,
    Optional,
    Undocumented,
}

impl Optionality {
    pub const ALL: [Optionality; 4] = [
        Optionality::Required,
        Optionality::Recommended,
        Optionality::Optional,
        Optionality::Undocumented,
    ];
}

impl Display for Optionality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Optionality::Required => write!(f, "required"),
            Optionality::Recommended => write!(f, "recommended"),
            Optionality::Optional => write!(f, "optional"),
            Optionality::Undocumented => write!(f, "undocumented"),
        }
    }
}

/// The flat path -> value container readers fill in.
///
/// Values live in one of four partitions. The generator registers every schema-form path
/// under its optionality; a later assignment of an instance path is routed to the partition
/// its schema form was registered in, and to `undocumented` if the schema does not know it.
/// A path is only ever stored in one partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    required: BTreeMap<String, Value>,
    recommended: BTreeMap<String, Value>,
    optional: BTreeMap<String, Value>,
    undocumented: BTreeMap<String, Value>,
    registry: BTreeMap<String, Optionality>,
    lone_groups: BTreeSet<String>,
    groups: BTreeSet<String>,
    group_classes: BTreeMap<String, String>,
    enumerations: BTreeMap<String, Vec<String>>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partition(&self, class: Optionality) -> &BTreeMap<String, Value> {
        match class {
            Optionality::Required => &self.required,
            Optionality::Recommended => &self.recommended,
            Optionality::Optional => &self.optional,
            Optionality::Undocumented => &self.undocumented,
        }
    }

    fn partition_mut(&mut self, class: Optionality) -> &mut BTreeMap<String, Value> {
        match class {
            Optionality::Required => &mut self.required,
            Optionality::Recommended => &mut self.recommended,
            Optionality::Optional => &mut self.optional,
            Optionality::Undocumented => &mut self.undocumented,
        }
    }

    /// Record a schema-form path under its optionality with an empty value
    pub fn register(&mut self, schema_path: &str, class: Optionality) {
        if let Some(previous) = self.registry.insert(schema_path.to_string(), class) {
            if previous != class {
                self.partition_mut(previous).remove(schema_path);
            }
        }
        self.partition_mut(class)
            .entry(schema_path.to_string())
            .or_default();
    }

    /// The partition a path currently lives in
    pub fn optionality_of(&self, path: &str) -> Option<Optionality> {
        Optionality::ALL
            .into_iter()
            .find(|class| self.partition(*class).contains_key(path))
    }

    /// The optionality the schema registered for a path, matching instance names to concepts
    pub fn registered_optionality(&self, path: &NexusPath) -> Option<Optionality> {
        let schema = path.schema_form().to_string();
        if let Some(class) = self.registry.get(&schema) {
            return Some(*class);
        }
        let instance = path.to_string();
        self.registry
            .iter()
            .find(|(schema_path, _)| path::matches(schema_path, &instance))
            .map(|(_, class)| *class)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        Optionality::ALL
            .into_iter()
            .find_map(|class| self.partition(class).get(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Assign a value, returning the partition it was placed in
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<Optionality, PathError> {
        let parsed = path::parse(path)?;
        let class = match self.optionality_of(path) {
            Some(class) => class,
            None => match self.registered_optionality(&parsed) {
                Some(class) => class,
                None => {
                    log::warn!(
                        "The path {} is not part of the application definition; it is stored as undocumented",
                        path
                    );
                    Optionality::Undocumented
                }
            },
        };
        self.partition_mut(class).insert(path.to_string(), value.into());
        Ok(class)
    }

    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let class = self.optionality_of(path)?;
        self.partition_mut(class).remove(path)
    }

    /// Empty every partition. Schema registrations and side tables are kept, so later
    /// assignments still route to the right partition.
    pub fn clear(&mut self) {
        for class in Optionality::ALL {
            self.partition_mut(class).clear();
        }
        self.groups.clear();
    }

    /// Merge another template partition by partition.
    ///
    /// Entries of `other` win, except that its empty values never erase a value already
    /// held here.
    pub fn update(&mut self, other: &Template) {
        for (schema_path, class) in other.registry.iter() {
            self.registry.entry(schema_path.clone()).or_insert(*class);
        }
        for class in Optionality::ALL {
            for (path, value) in other.partition(class).iter() {
                if value.is_none() && self.get(path).is_some_and(|v| !v.is_none()) {
                    continue;
                }
                if let Some(current) = self.optionality_of(path) {
                    if current != class {
                        self.partition_mut(current).remove(path);
                    }
                }
                self.partition_mut(class).insert(path.clone(), value.clone());
            }
        }
        self.lone_groups.extend(other.lone_groups.iter().cloned());
        self.groups.extend(other.groups.iter().cloned());
        for (path, class) in other.group_classes.iter() {
            self.group_classes.insert(path.clone(), class.clone());
        }
        for (path, items) in other.enumerations.iter() {
            self.enumerations.insert(path.clone(), items.clone());
        }
    }

    /// Every entry with its partition, partitions in optionality order
    pub fn iter(&self) -> impl Iterator<Item = (Optionality, &String, &Value)> {
        Optionality::ALL.into_iter().flat_map(move |class| {
            self.partition(class)
                .iter()
                .map(move |(path, value)| (class, path, value))
        })
    }

    pub fn iter_partition(&self, class: Optionality) -> impl Iterator<Item = (&String, &Value)> {
        self.partition(class).iter()
    }

    /// The union of all partitions without empty values, in path order
    pub fn populated(&self) -> BTreeMap<&str, &Value> {
        self.iter()
            .filter(|(_, _, value)| !value.is_none())
            .map(|(_, path, value)| (path.as_str(), value))
            .collect()
    }

    pub fn len(&self) -> usize {
        Optionality::ALL
            .into_iter()
            .map(|class| self.partition(class).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_lone_group(&mut self, schema_path: &str) {
        self.lone_groups.insert(schema_path.to_string());
    }

    /// Required groups that carry no required leaf of their own
    pub fn lone_groups(&self) -> &BTreeSet<String> {
        &self.lone_groups
    }

    /// Ask the writer to create a group even if nothing is written below it
    pub fn add_group(&mut self, path: &str) -> Result<(), PathError> {
        let parsed = path::parse(path)?;
        if parsed.is_attribute() {
            return Err(PathError::MalformedPath {
                path: path.to_string(),
                reason: String::from("a group path cannot end in an attribute"),
            });
        }
        self.groups.insert(parsed.to_string());
        Ok(())
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    pub fn set_group_class(&mut self, schema_path: &str, nx_class: &str) {
        self.group_classes
            .insert(schema_path.to_string(), nx_class.to_string());
    }

    /// The NX class the schema declares for a group path in either form
    pub fn group_class(&self, path: &NexusPath) -> Option<&str> {
        let schema = path.schema_form().to_string();
        if let Some(class) = self.group_classes.get(&schema) {
            return Some(class);
        }
        let instance = path.to_string();
        self.group_classes
            .iter()
            .find(|(schema_path, _)| path::matches(schema_path, &instance))
            .map(|(_, class)| class.as_str())
    }

    pub fn set_enumeration(&mut self, schema_path: &str, items: Vec<String>) {
        self.enumerations.insert(schema_path.to_string(), items);
    }

    pub fn enumeration(&self, path: &NexusPath) -> Option<&[String]> {
        self.enumerations
            .get(&path.schema_form().to_string())
            .map(Vec::as_slice)
    }
}

//! Loading of NeXus definition language (NXDL) files.
//!
//! An application definition is parsed into a tree of [`SchemaNode`]s. Two kinds of
//! inheritance are resolved while loading:
//!
//! - the `extends` chain of the definition itself, merged child-list by child-list with the
//!   derived definition winning. Cycles in this chain are fatal.
//! - base classes referenced by group types (`<group type="NXentry">`). Every base class
//!   reachable from the definition is loaded once into a class table, and its children are
//!   contributed to referencing groups on lookup (see [`Definition::children_of`]).
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use super::constants::{
    DEFINITIONS_ENV_VAR, DEFINITIONS_VERSION_FILE, DEFINITION_SUBDIRS, NXDL_SUFFIX,
};
use super::error::SchemaError;
use super::path::{NexusPath, Segment};
use super::template::Optionality;
use super::units::UnitCategory;

static DEFINITIONS_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Configure the definitions directory for the whole process. Only the first call wins.
pub fn set_definitions_root(path: &Path) -> bool {
    match DEFINITIONS_ROOT.set(path.to_path_buf()) {
        Ok(()) => true,
        Err(_) => {
            if DEFINITIONS_ROOT.get().map(PathBuf::as_path) != Some(path) {
                log::warn!(
                    "Definitions root is already set to {}; ignoring {}",
                    definitions_root().display(),
                    path.display()
                );
            }
            false
        }
    }
}

/// The definitions directory: the configured root, else $NEXUS_DEFINITIONS, else the bundled set
pub fn definitions_root() -> PathBuf {
    if let Some(root) = DEFINITIONS_ROOT.get() {
        return root.clone();
    }
    match std::env::var_os(DEFINITIONS_ENV_VAR) {
        Some(root) => PathBuf::from(root),
        None => bundled_definitions(),
    }
}

/// The small set of definitions shipped with the crate
pub fn bundled_definitions() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("definitions")
}

/// Version and provenance of a definitions checkout, from its `nexus_version.yml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionsInfo {
    pub version: String,
    pub commit: Option<String>,
}

impl Default for DefinitionsInfo {
    fn default() -> Self {
        Self {
            version: String::from("unknown"),
            commit: None,
        }
    }
}

impl DefinitionsInfo {
    pub fn read(root: &Path) -> Result<Self, SchemaError> {
        let path = root.join(DEFINITIONS_VERSION_FILE);
        if !path.exists() {
            log::warn!(
                "No {} found in {}; NeXus version is unknown",
                DEFINITIONS_VERSION_FILE,
                root.display()
            );
            return Ok(Self::default());
        }
        let yaml_str = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Group,
    Field,
    Attribute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Base,
    Application,
    Contributed,
}

impl FromStr for Category {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(Category::Base),
            "application" => Ok(Category::Application),
            "contributed" => Ok(Category::Contributed),
            other => Err(other.to_string()),
        }
    }
}

/// NeXus primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NxType {
    Char,
    Int,
    UInt,
    PosInt,
    Float,
    Number,
    Boolean,
    DateTime,
    Binary,
    CharOrNumber,
    Complex,
}

impl FromStr for NxType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NX_CHAR" => Ok(NxType::Char),
            "NX_INT" => Ok(NxType::Int),
            "NX_UINT" => Ok(NxType::UInt),
            "NX_POSINT" => Ok(NxType::PosInt),
            "NX_FLOAT" | "NX_QUATERNION" => Ok(NxType::Float),
            "NX_NUMBER" => Ok(NxType::Number),
            "NX_BOOLEAN" => Ok(NxType::Boolean),
            "NX_DATE_TIME" | "ISO8601" => Ok(NxType::DateTime),
            "NX_BINARY" => Ok(NxType::Binary),
            "NX_CHAR_OR_NUMBER" => Ok(NxType::CharOrNumber),
            "NX_COMPLEX" | "NX_CCOMPLEX" | "NX_PCOMPLEX" => Ok(NxType::Complex),
            other => Err(other.to_string()),
        }
    }
}

impl Display for NxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NxType::Char => "NX_CHAR",
            NxType::Int => "NX_INT",
            NxType::UInt => "NX_UINT",
            NxType::PosInt => "NX_POSINT",
            NxType::Float => "NX_FLOAT",
            NxType::Number => "NX_NUMBER",
            NxType::Boolean => "NX_BOOLEAN",
            NxType::DateTime => "NX_DATE_TIME",
            NxType::Binary => "NX_BINARY",
            NxType::CharOrNumber => "NX_CHAR_OR_NUMBER",
            NxType::Complex => "NX_COMPLEX",
        };
        write!(f, "{name}")
    }
}

/// Occurrence bounds; a `max` of None is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub min: u32,
    pub max: Option<u32>,
}

impl Occurrence {
    pub fn max_str(&self) -> String {
        match self.max {
            Some(max) => max.to_string(),
            None => String::from("unbounded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub kind: NodeKind,
    /// The name in the NXDL file (for unnamed groups, the concept)
    pub name: String,
    /// The segment of this node in schema-form paths
    pub concept: String,
    /// Whether readers bind an instance name to this node (`CONCEPT[instance]`)
    pub variadic: bool,
    /// Base class of a group, e.g. NXentry
    pub nx_class: Option<String>,
    /// Primitive type of fields and attributes
    pub nx_type: Option<NxType>,
    pub units: Option<UnitCategory>,
    pub enumeration: Option<Vec<String>>,
    pub rank: Option<usize>,
    pub occurrence: Occurrence,
    pub optionality: Optionality,
    pub deprecated: Option<String>,
    pub doc: Option<String>,
    /// Contributed by a base class rather than declared by the definition
    pub inherited: bool,
    pub children: Vec<SchemaNode>,
}

impl SchemaNode {
    pub fn is_group(&self) -> bool {
        self.kind == NodeKind::Group
    }

    pub fn is_required(&self) -> bool {
        self.optionality == Optionality::Required
    }

    /// A group that may be entirely absent
    pub fn is_optional_parent(&self) -> bool {
        self.is_group() && self.occurrence.min == 0
    }

    pub fn segment(&self) -> Segment {
        match self.kind {
            NodeKind::Attribute => Segment::attribute(&self.concept),
            _ => Segment::new(&self.concept),
        }
    }

    /// Does this node carry a units attribute in a template?
    pub fn takes_units(&self) -> bool {
        self.kind == NodeKind::Field
            && self.nx_type != Some(NxType::Char)
            && !matches!(self.units, None | Some(UnitCategory::Unitless))
    }

    fn mark_inherited(&mut self) {
        self.inherited = true;
        self.optionality = Optionality::Optional;
        self.occurrence.min = 0;
        for child in self.children.iter_mut() {
            child.mark_inherited();
        }
    }

    fn referenced_classes(&self, out: &mut Vec<String>) {
        for child in self.children.iter() {
            if let Some(class) = &child.nx_class {
                out.push(class.clone());
            }
            child.referenced_classes(out);
        }
    }
}

/// A loaded application definition together with the base classes it references
#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    pub category: Category,
    pub extends: Option<String>,
    pub root: SchemaNode,
    classes: FxHashMap<String, SchemaNode>,
}

impl Definition {
    /// Declared children of a node followed by the children its base class contributes.
    /// A declared child shadows a base-class child of the same kind and concept.
    pub fn children_of<'a>(&'a self, node: &'a SchemaNode) -> Vec<&'a SchemaNode> {
        let mut children: Vec<&SchemaNode> = node.children.iter().collect();
        let class = match &node.nx_class {
            Some(class) if node.kind == NodeKind::Group && class != &self.name => {
                self.classes.get(class)
            }
            _ => None,
        };
        if let Some(class) = class {
            for child in class.children.iter() {
                if !children
                    .iter()
                    .any(|c| c.kind == child.kind && c.concept == child.concept)
                {
                    children.push(child);
                }
            }
        }
        children
    }

    /// Find the node a schema-form path points at
    pub fn find_node(&self, schema_path: &NexusPath) -> Option<&SchemaNode> {
        let mut node = &self.root;
        for segment in schema_path.segments.iter() {
            node = self.children_of(node).into_iter().find(|child| {
                child.concept == segment.concept
                    && (child.kind == NodeKind::Attribute) == segment.is_attribute
            })?;
        }
        Some(node)
    }

    /// The base class table, keyed by class name
    pub fn base_class(&self, name: &str) -> Option<&SchemaNode> {
        self.classes.get(name)
    }
}

struct ParsedDefinition {
    category: Category,
    extends: Option<String>,
    root: SchemaNode,
}

/// Finds and parses NXDL files below a definitions directory
#[derive(Debug, Clone)]
pub struct NxdlLoader {
    root: PathBuf,
}

impl Default for NxdlLoader {
    fn default() -> Self {
        Self::new(&definitions_root())
    }
}

impl NxdlLoader {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Locate `<name>.nxdl.xml` in the definition sub-directories
    pub fn find(&self, name: &str) -> Result<PathBuf, SchemaError> {
        let file_name = format!("{name}{NXDL_SUFFIX}");
        DEFINITION_SUBDIRS
            .iter()
            .map(|dir| self.root.join(dir).join(&file_name))
            .chain(std::iter::once(self.root.join(&file_name)))
            .find(|candidate| candidate.exists())
            .ok_or_else(|| SchemaError::DefinitionNotFound(name.to_string()))
    }

    /// Load a definition with its inheritance chain and every base class it references
    pub fn load(&self, name: &str) -> Result<Definition, SchemaError> {
        let definition = self.resolve(name, &mut Vec::new())?;

        let mut classes: FxHashMap<String, SchemaNode> = FxHashMap::default();
        let mut queue = VecDeque::new();
        let mut referenced = Vec::new();
        definition.root.referenced_classes(&mut referenced);
        queue.extend(referenced);
        while let Some(class) = queue.pop_front() {
            if classes.contains_key(&class) || class == name {
                continue;
            }
            let mut base = self.resolve(&class, &mut Vec::new())?.root;
            base.mark_inherited();
            let mut referenced = Vec::new();
            base.referenced_classes(&mut referenced);
            queue.extend(referenced);
            classes.insert(class, base);
        }
        log::debug!(
            "Loaded definition {} with {} base classes",
            name,
            classes.len()
        );

        Ok(Definition {
            name: name.to_string(),
            category: definition.category,
            extends: definition.extends,
            root: definition.root,
            classes,
        })
    }

    /// Parse a definition and merge in the children of everything it extends
    fn resolve(&self, name: &str, stack: &mut Vec<String>) -> Result<ParsedDefinition, SchemaError> {
        if stack.iter().any(|n| n == name) {
            let mut cycle = stack.clone();
            cycle.push(name.to_string());
            return Err(SchemaError::InheritanceCycle(cycle));
        }
        stack.push(name.to_string());
        let mut parsed = parse_definition_file(&self.find(name)?)?;
        if let Some(parent_name) = parsed.extends.clone() {
            let mut parent = self.resolve(&parent_name, stack)?;
            if parent.category == Category::Base {
                for child in parent.root.children.iter_mut() {
                    child.mark_inherited();
                }
            }
            merge_children(&mut parsed.root.children, parent.root.children);
        }
        stack.pop();
        Ok(parsed)
    }
}

/// Union by kind and concept; entries already in `derived` win
fn merge_children(derived: &mut Vec<SchemaNode>, inherited: Vec<SchemaNode>) {
    for child in inherited {
        if !derived
            .iter()
            .any(|d| d.kind == child.kind && d.concept == child.concept)
        {
            derived.push(child);
        }
    }
}

fn parse_definition_file(path: &Path) -> Result<ParsedDefinition, SchemaError> {
    let text = std::fs::read_to_string(path)?;
    parse_definition_str(&text, path)
}

fn parse_definition_str(text: &str, path: &Path) -> Result<ParsedDefinition, SchemaError> {
    let doc = roxmltree::Document::parse(text)
        .map_err(|e| SchemaError::BadXml(path.to_path_buf(), e.to_string()))?;
    let root = doc.root_element();
    if root.tag_name().name() != "definition" {
        return Err(SchemaError::NoDefinition(path.to_path_buf()));
    }
    let name = root
        .attribute("name")
        .ok_or_else(|| SchemaError::NoDefinition(path.to_path_buf()))?
        .to_string();
    let category_str = root.attribute("category").unwrap_or("base");
    let category = Category::from_str(category_str)
        .map_err(|c| SchemaError::UnknownCategory(name.clone(), c))?;
    let extends = root
        .attribute("extends")
        .filter(|parent| *parent != name)
        .map(String::from);

    let context = ParseContext {
        definition: &name,
        category,
    };
    let mut children = Vec::new();
    for child in root.children().filter(|n| n.is_element()) {
        if let Some(node) = parse_node(child, &context, "")? {
            children.push(node);
        }
    }

    Ok(ParsedDefinition {
        category,
        extends,
        root: SchemaNode {
            kind: NodeKind::Group,
            name: name.clone(),
            concept: String::new(),
            variadic: false,
            nx_class: Some(name.clone()),
            nx_type: None,
            units: None,
            enumeration: None,
            rank: None,
            occurrence: Occurrence {
                min: 1,
                max: Some(1),
            },
            optionality: Optionality::Required,
            deprecated: None,
            doc: doc_of(&root),
            inherited: false,
            children,
        },
    })
}

struct ParseContext<'a> {
    definition: &'a str,
    category: Category,
}

fn doc_of(node: &roxmltree::Node) -> Option<String> {
    node.children()
        .find(|n| n.has_tag_name("doc"))
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// NeXus marks names readers must choose by writing them without lowercase letters
fn is_variadic_name(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase()) && !name.chars().any(|c| c.is_ascii_lowercase())
}

fn parse_occurs(
    value: Option<&str>,
    context: &ParseContext,
    path: &str,
) -> Result<Option<Option<u32>>, SchemaError> {
    match value {
        None => Ok(None),
        Some("unbounded") => Ok(Some(None)),
        Some(v) => v
            .trim()
            .parse::<u32>()
            .map(|n| Some(Some(n)))
            .map_err(|_| SchemaError::BadOccurrence {
                definition: context.definition.to_string(),
                path: path.to_string(),
                value: v.to_string(),
            }),
    }
}

fn parse_node(
    node: roxmltree::Node,
    context: &ParseContext,
    parent_path: &str,
) -> Result<Option<SchemaNode>, SchemaError> {
    let kind = match node.tag_name().name() {
        "group" => NodeKind::Group,
        "field" => NodeKind::Field,
        "attribute" => NodeKind::Attribute,
        _ => return Ok(None),
    };

    let nx_class = match kind {
        NodeKind::Group => node.attribute("type").map(String::from),
        _ => None,
    };
    let (name, concept, variadic) = match (node.attribute("name"), &nx_class) {
        (Some(name), _) => (name.to_string(), name.to_string(), is_variadic_name(name)),
        (None, Some(class)) => {
            let concept = class.trim_start_matches("NX").to_uppercase();
            (concept.clone(), concept, true)
        }
        (None, None) => {
            return Err(SchemaError::UnnamedNode {
                definition: context.definition.to_string(),
            })
        }
    };
    let path = match kind {
        NodeKind::Attribute => format!("{parent_path}/@{concept}"),
        _ => format!("{parent_path}/{concept}"),
    };

    let nx_type = match kind {
        NodeKind::Group => None,
        _ => {
            let raw = node.attribute("type").unwrap_or("NX_CHAR");
            Some(NxType::from_str(raw).map_err(|t| SchemaError::UnknownType {
                definition: context.definition.to_string(),
                path: path.clone(),
                nx_type: t,
            })?)
        }
    };

    // Occurrence defaults depend on the definition category and node kind
    let mut occurrence = match (context.category, kind) {
        (Category::Base, NodeKind::Group) => Occurrence { min: 0, max: None },
        (Category::Base, _) => Occurrence {
            min: 0,
            max: Some(1),
        },
        (_, NodeKind::Group) => Occurrence { min: 1, max: None },
        (_, _) => Occurrence {
            min: 1,
            max: Some(1),
        },
    };
    if variadic {
        occurrence.max = None;
    }
    let flag = |attr: &str| node.attribute(attr).map(|v| v.trim() == "true");
    let mut recommended = false;
    if flag("optional") == Some(true) || flag("required") == Some(false) {
        occurrence.min = 0;
    }
    if flag("recommended") == Some(true) {
        occurrence.min = 0;
        recommended = true;
    }
    if flag("required") == Some(true) || flag("optional") == Some(false) {
        occurrence.min = occurrence.min.max(1);
    }
    if let Some(min) = parse_occurs(node.attribute("minOccurs"), context, &path)? {
        occurrence.min = min.unwrap_or(0);
    }
    if let Some(max) = parse_occurs(node.attribute("maxOccurs"), context, &path)? {
        occurrence.max = max;
    }
    if let Some(max) = occurrence.max {
        if occurrence.min > max {
            return Err(SchemaError::ContradictoryOccurrence {
                definition: context.definition.to_string(),
                path,
                min: occurrence.min,
                max,
            });
        }
    }
    let optionality = if recommended {
        Optionality::Recommended
    } else if occurrence.min >= 1 {
        Optionality::Required
    } else {
        Optionality::Optional
    };

    let enumeration = node
        .children()
        .find(|n| n.has_tag_name("enumeration"))
        .map(|e| {
            e.children()
                .filter(|n| n.has_tag_name("item"))
                .filter_map(|n| n.attribute("value").map(String::from))
                .collect::<Vec<_>>()
        });
    let rank = node
        .children()
        .find(|n| n.has_tag_name("dimensions"))
        .and_then(|d| d.attribute("rank"))
        .and_then(|r| r.trim().parse::<usize>().ok());
    let units = node
        .attribute("units")
        .map(|u| UnitCategory::from_str(u).unwrap_or(UnitCategory::Any));

    let mut children = Vec::new();
    for child in node.children().filter(|n| n.is_element()) {
        if let Some(parsed) = parse_node(child, context, &path)? {
            children.push(parsed);
        }
    }

    Ok(Some(SchemaNode {
        kind,
        name,
        concept,
        variadic,
        nx_class,
        nx_type,
        units,
        enumeration,
        rank,
        occurrence,
        optionality,
        deprecated: node.attribute("deprecated").map(String::from),
        doc: doc_of(&node),
        inherited: false,
        children,
    }))
}

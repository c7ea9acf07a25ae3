//! Checks a filled template against its application definition.
//!
//! The populated paths are arranged into a tree which is walked together with the schema
//! tree. Every instance node is matched to the schema node describing it (concrete names
//! first, then variadic concepts), its value is checked against the node, and for every
//! group the schema children are checked for presence and occurrence.
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::OffsetDateTime;

use super::constants::UNITS_ATTR;
use super::error::ValidationError;
use super::generator::has_required_leaf;
use super::nxdl::{Definition, NodeKind, NxType, SchemaNode};
use super::path::{self, NexusPath, Segment};
use super::template::Template;
use super::value::{Array, Scalar, Value};

#[derive(Debug, Default)]
struct InstanceNode<'t> {
    value: Option<&'t Value>,
    explicit: bool,
    children: Vec<(Segment, InstanceNode<'t>)>,
}

impl<'t> InstanceNode<'t> {
    fn child_mut(&mut self, segment: &Segment) -> &mut InstanceNode<'t> {
        let idx = match self.children.iter().position(|(s, _)| s == segment) {
            Some(idx) => idx,
            None => {
                self.children
                    .push((segment.clone(), InstanceNode::default()));
                self.children.len() - 1
            }
        };
        &mut self.children[idx].1
    }

    fn child(&self, segment: &Segment) -> Option<&InstanceNode<'t>> {
        self.children
            .iter()
            .find(|(s, _)| s == segment)
            .map(|(_, node)| node)
    }

    /// Holds a value somewhere at or below this node
    fn is_populated(&self) -> bool {
        self.value.is_some() || self.children.iter().any(|(_, c)| c.is_populated())
    }

    fn is_present(&self) -> bool {
        self.explicit || self.is_populated()
    }
}

/// Validates one template against one definition
pub struct Validator<'a> {
    definition: &'a Definition,
    template: &'a Template,
}

impl<'a> Validator<'a> {
    pub fn new(definition: &'a Definition, template: &'a Template) -> Self {
        Self {
            definition,
            template,
        }
    }

    /// Every violation, at most one per offending path, in path order
    pub fn check(&self) -> Vec<ValidationError> {
        let mut errors: Vec<(String, ValidationError)> = Vec::new();
        let mut root = InstanceNode::default();

        for (key, value) in self.template.populated() {
            match path::parse(key) {
                Ok(parsed) => {
                    let mut node = &mut root;
                    for segment in parsed.segments.iter() {
                        node = node.child_mut(segment);
                    }
                    node.value = Some(value);
                }
                Err(e) => errors.push((key.to_string(), ValidationError::BadKey(e))),
            }
        }
        for group in self.template.groups() {
            match path::parse(group) {
                Ok(parsed) => {
                    let mut node = &mut root;
                    for segment in parsed.segments.iter() {
                        node = node.child_mut(segment);
                    }
                    node.explicit = true;
                }
                Err(e) => errors.push((group.clone(), ValidationError::BadKey(e))),
            }
        }

        self.check_children(&self.definition.root, &root, &NexusPath::root(), &mut errors);

        errors.sort_by(|a, b| a.0.cmp(&b.0));
        errors.dedup_by(|a, b| a.0 == b.0);
        errors.into_iter().map(|(_, error)| error).collect()
    }

    /// Log every violation and fail with the first one
    pub fn validate(&self) -> Result<(), ValidationError> {
        let errors = self.check();
        for error in errors.iter() {
            log::error!("{}", error);
        }
        match errors.into_iter().next() {
            Some(first) => Err(first),
            None => {
                log::info!("Template is valid against {}", self.definition.name);
                Ok(())
            }
        }
    }

    fn check_node(
        &self,
        schema: &SchemaNode,
        instance: &InstanceNode,
        path: &NexusPath,
        errors: &mut Vec<(String, ValidationError)>,
    ) {
        match schema.kind {
            NodeKind::Group => {
                if let Some(value) = instance.value {
                    if !matches!(value, Value::Link(_)) {
                        errors.push((
                            path.to_string(),
                            ValidationError::TypeMismatch {
                                path: path.to_string(),
                                expected: format!("[{}]", schema.nx_class.as_deref().unwrap_or("group")),
                                found: value.type_name().to_string(),
                            },
                        ));
                    }
                    return;
                }
                self.check_children(schema, instance, path, errors);
            }
            NodeKind::Field | NodeKind::Attribute => {
                if let Some(value) = instance.value {
                    if let Err(e) = self.check_value(schema, value, path) {
                        errors.push((path.to_string(), e));
                    }
                    let has_units = instance.child(&Segment::attribute(UNITS_ATTR)).is_some();
                    if schema.takes_units() && !has_units && !matches!(value, Value::Link(_)) {
                        log::warn!(
                            "The field {} has no units attribute; {} expects units of category {}",
                            path,
                            self.definition.name,
                            schema.units.as_ref().map(|u| u.to_string()).unwrap_or_default()
                        );
                    }
                }
                if schema.kind == NodeKind::Field {
                    self.check_children(schema, instance, path, errors);
                }
            }
        }
    }

    fn check_children(
        &self,
        schema: &SchemaNode,
        instance: &InstanceNode,
        path: &NexusPath,
        errors: &mut Vec<(String, ValidationError)>,
    ) {
        let candidates = self.definition.children_of(schema);
        let mut counts = vec![0usize; candidates.len()];

        for (segment, child) in instance.children.iter() {
            let child_path = path.child(segment.clone());
            let declares_units = candidates
                .iter()
                .any(|c| c.kind == NodeKind::Attribute && c.concept == UNITS_ATTR);
            if schema.kind == NodeKind::Field
                && segment.is_attribute
                && segment.concept == UNITS_ATTR
                && !declares_units
            {
                if let Err(e) = check_units(schema, instance, child, &child_path) {
                    errors.push((child_path.to_string(), e));
                }
                continue;
            }

            let Some(idx) = find_match(&candidates, segment) else {
                log::warn!(
                    "The path {} is not documented in {}",
                    child_path,
                    self.definition.name
                );
                continue;
            };
            let node = candidates[idx];
            if child.is_present() {
                counts[idx] += 1;
                if let Some(message) = &node.deprecated {
                    log::warn!("The path {} uses a deprecated concept: {}", child_path, message);
                }
            }
            self.check_node(node, child, &child_path, errors);
        }

        // An optional group nobody wrote into may be absent as a whole
        let is_optional_parent = !path.is_root() && schema.is_optional_parent();
        if is_optional_parent && !instance.is_populated() {
            return;
        }
        if schema.kind != NodeKind::Group && instance.value.is_none() {
            return;
        }

        let mut missing = Vec::new();
        for (node, count) in candidates.iter().zip(counts.iter()) {
            if *count == 0 {
                if node.is_required() {
                    self.collect_missing(node, &path.child(node.segment()), &mut missing);
                }
                continue;
            }
            let over = node.occurrence.max.is_some_and(|max| *count > max as usize);
            let under = *count < node.occurrence.min as usize;
            if over || under {
                errors.push((
                    path.child(node.segment()).to_string(),
                    ValidationError::OccurrenceViolation {
                        parent: path.to_string(),
                        concept: node.concept.clone(),
                        count: *count,
                        min: node.occurrence.min,
                        max: node.occurrence.max_str(),
                    },
                ));
            }
        }

        if missing.is_empty() {
            return;
        }
        if is_optional_parent {
            errors.push((
                path.to_string(),
                ValidationError::OptionalParentInconsistency {
                    group: path.to_string(),
                    missing,
                },
            ));
        } else {
            for path in missing {
                errors.push((path.clone(), ValidationError::MissingRequired(path)));
            }
        }
    }

    /// Paths to report for a required node that is absent. Groups with required leaves
    /// report those leaves; lone groups report themselves.
    fn collect_missing(&self, node: &SchemaNode, path: &NexusPath, missing: &mut Vec<String>) {
        if node.kind != NodeKind::Group {
            missing.push(path.to_string());
            return;
        }
        let schema_path = path.schema_form().to_string();
        if self.template.lone_groups().contains(&schema_path) || !has_required_leaf(node) {
            missing.push(path.to_string());
            return;
        }
        for child in self
            .definition
            .children_of(node)
            .into_iter()
            .filter(|c| c.is_required())
        {
            self.collect_missing(child, &path.child(child.segment()), missing);
        }
    }

    fn check_value(&self, node: &SchemaNode, value: &Value, path: &NexusPath) -> Result<(), ValidationError> {
        let nx_type = node.nx_type.unwrap_or(NxType::Char);
        let type_error = || ValidationError::TypeMismatch {
            path: path.to_string(),
            expected: expected_types(nx_type),
            found: value.type_name().to_string(),
        };
        let accepts_arrays = node.rank != Some(0);

        match value {
            Value::None | Value::Link(_) | Value::Compressed { .. } => return Ok(()),
            Value::Dict(_) => {
                log::debug!("Leaving the dict at {} to the writer", path);
                return Ok(());
            }
            Value::Scalar(scalar) => {
                if !scalar_accepted(nx_type, scalar) {
                    return Err(type_error());
                }
            }
            Value::Array(array) => {
                if !accepts_arrays || !array_accepted(nx_type, array) {
                    return Err(type_error());
                }
                if let Some(rank) = node.rank {
                    if array.ndim() != rank {
                        return Err(ValidationError::DimensionMismatch {
                            path: path.to_string(),
                            expected: rank,
                            found: array.ndim(),
                        });
                    }
                }
            }
            Value::List(items) => {
                let all_accepted = items.iter().all(|item| match item {
                    Value::Scalar(s) => scalar_accepted(nx_type, s),
                    _ => false,
                });
                if !accepts_arrays || !all_accepted {
                    return Err(type_error());
                }
                if let Some(rank) = node.rank.filter(|r| *r != 1) {
                    return Err(ValidationError::DimensionMismatch {
                        path: path.to_string(),
                        expected: rank,
                        found: 1,
                    });
                }
            }
        }

        let elements = elements(value);
        match nx_type {
            NxType::PosInt => {
                if let Some(bad) = elements.iter().find(|e| matches!(e, Scalar::Int(i) if *i <= 0)) {
                    return Err(ValidationError::PosIntViolation {
                        path: path.to_string(),
                        found: bad.to_string(),
                    });
                }
            }
            NxType::UInt => {
                if let Some(bad) = elements.iter().find(|e| matches!(e, Scalar::Int(i) if *i < 0)) {
                    return Err(ValidationError::TypeMismatch {
                        path: path.to_string(),
                        expected: expected_types(nx_type),
                        found: format!("negative int {bad}"),
                    });
                }
            }
            NxType::DateTime => {
                if let Some(bad) = elements
                    .iter()
                    .find(|e| !matches!(e, Scalar::Str(s) if is_valid_date(s)))
                {
                    return Err(ValidationError::DateFormatError {
                        path: path.to_string(),
                        found: bad.to_string(),
                    });
                }
            }
            _ => (),
        }

        let allowed = node
            .enumeration
            .as_deref()
            .or_else(|| self.template.enumeration(path));
        if let Some(allowed) = allowed {
            if let Some(bad) = elements
                .iter()
                .map(|e| e.to_string())
                .find(|e| !allowed.contains(e))
            {
                return Err(ValidationError::EnumViolation {
                    path: path.to_string(),
                    allowed: allowed.to_vec(),
                    found: bad,
                });
            }
        }
        Ok(())
    }
}

/// Validate a template, failing with the first violation
pub fn validate(definition: &Definition, template: &Template) -> Result<(), ValidationError> {
    Validator::new(definition, template).validate()
}

/// Concrete names win over variadic concepts
fn find_match(candidates: &[&SchemaNode], segment: &Segment) -> Option<usize> {
    let same_kind = |c: &SchemaNode| (c.kind == NodeKind::Attribute) == segment.is_attribute;
    candidates
        .iter()
        .position(|c| same_kind(*c) && !c.variadic && c.concept == segment.name())
        .or_else(|| {
            candidates
                .iter()
                .position(|c| same_kind(*c) && c.variadic && c.concept == segment.concept)
        })
}

fn check_units(
    field: &SchemaNode,
    field_instance: &InstanceNode,
    units: &InstanceNode,
    path: &NexusPath,
) -> Result<(), ValidationError> {
    let Some(value) = units.value else {
        return Ok(());
    };
    if field_instance.value.is_none() {
        return Err(ValidationError::UnitsWithoutField(path.to_string()));
    }
    let Some(unit) = value.as_str() else {
        return Err(ValidationError::TypeMismatch {
            path: path.to_string(),
            expected: String::from("[str]"),
            found: value.type_name().to_string(),
        });
    };
    match field.units.as_ref().map(|category| (category, category.accepts(unit))) {
        Some((category, Some(false))) => Err(ValidationError::UnitMismatch {
            path: path.to_string(),
            unit: unit.to_string(),
            category: category.to_string(),
        }),
        Some((category, None)) => {
            log::debug!("Cannot decide whether {:?} is a unit of {}", unit, category);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn scalar_accepted(nx_type: NxType, scalar: &Scalar) -> bool {
    matches!(
        (nx_type, scalar),
        (NxType::Char | NxType::DateTime, Scalar::Str(_))
            | (NxType::Int | NxType::UInt | NxType::PosInt | NxType::Binary, Scalar::Int(_))
            | (NxType::Float | NxType::Number | NxType::Complex, Scalar::Int(_) | Scalar::Float(_))
            | (NxType::Boolean, Scalar::Bool(_))
            | (NxType::CharOrNumber, Scalar::Str(_) | Scalar::Int(_) | Scalar::Float(_))
    )
}

fn array_accepted(nx_type: NxType, array: &Array) -> bool {
    matches!(
        (nx_type, array),
        (NxType::Char | NxType::DateTime, Array::Str(_))
            | (NxType::Int | NxType::UInt | NxType::PosInt | NxType::Binary, Array::Int(_))
            | (NxType::Float | NxType::Number | NxType::Complex, Array::Int(_) | Array::Float(_))
            | (NxType::Boolean, Array::Bool(_))
            | (NxType::CharOrNumber, Array::Str(_) | Array::Int(_) | Array::Float(_))
    )
}

fn expected_types(nx_type: NxType) -> String {
    let names: &[&str] = match nx_type {
        NxType::Char => &["str", "str-array"],
        NxType::DateTime => &["str"],
        NxType::Int | NxType::UInt | NxType::PosInt => &["int", "int-array"],
        NxType::Binary => &["int", "int-array"],
        NxType::Float | NxType::Number | NxType::Complex => {
            &["float", "int", "float-array", "int-array"]
        }
        NxType::Boolean => &["bool", "bool-array"],
        NxType::CharOrNumber => &["str", "int", "float", "str-array", "int-array", "float-array"],
    };
    format!("[{}] for {}", names.join(", "), nx_type)
}

/// The scalars making up a value
fn elements(value: &Value) -> Vec<Scalar> {
    match value {
        Value::Scalar(s) => vec![s.clone()],
        Value::Array(Array::Int(a)) => a.iter().map(|v| Scalar::Int(*v)).collect(),
        Value::Array(Array::Float(a)) => a.iter().map(|v| Scalar::Float(*v)).collect(),
        Value::Array(Array::Bool(a)) => a.iter().map(|v| Scalar::Bool(*v)).collect(),
        Value::Array(Array::Str(a)) => a.iter().map(|v| Scalar::Str(v.clone())).collect(),
        Value::List(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Scalar(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// A timezone-aware ISO 8601 date whose offset is not the unknown-local `-00:00`
pub fn is_valid_date(date: &str) -> bool {
    let date = date.trim();
    let parsed = OffsetDateTime::parse(date, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(date, &Iso8601::DEFAULT));
    match parsed {
        Ok(parsed) => !(parsed.offset().is_utc() && has_minus_offset(date)),
        Err(_) => false,
    }
}

/// The offset after the time is written with a minus sign (`-00:00`, `-0000`, `-00`)
fn has_minus_offset(date: &str) -> bool {
    date.split_once(['T', 't'])
        .is_some_and(|(_, time)| time.contains('-'))
}

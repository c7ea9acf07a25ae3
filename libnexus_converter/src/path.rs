//! Template keys are pseudo-XPath strings. Every segment names a concept and, when the
//! concept is variadic, the instance chosen for it:
//!
//! ```text
//! /ENTRY[my_entry]/NXODD_name/int_value/@units
//! ```
//!
//! The *schema form* of a path drops the instance names (`/ENTRY/NXODD_name/int_value/@units`)
//! and is what the template generator emits. The *instance form* is what readers write.
use regex::Regex;
use std::fmt::{Display, Write};
use std::str::FromStr;
use std::sync::OnceLock;

use super::error::PathError;

const SEPARATOR: char = '/';
const ATTRIBUTE_MARKER: char = '@';
const WILDCARD: char = '*';

fn short_form_regex() -> &'static Regex {
    static SHORT_FORM: OnceLock<Regex> = OnceLock::new();
    SHORT_FORM.get_or_init(|| Regex::new(r"\*\{([^{}]*)\}").expect("short form pattern is valid"))
}

/// A single `/`-separated piece of a template path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    pub concept: String,
    pub instance: Option<String>,
    pub is_attribute: bool,
}

impl Segment {
    pub fn new(concept: &str) -> Self {
        Self {
            concept: concept.to_string(),
            instance: None,
            is_attribute: false,
        }
    }

    pub fn with_instance(concept: &str, instance: &str) -> Self {
        Self {
            concept: concept.to_string(),
            instance: Some(instance.to_string()),
            is_attribute: false,
        }
    }

    pub fn attribute(name: &str) -> Self {
        Self {
            concept: name.to_string(),
            instance: None,
            is_attribute: true,
        }
    }

    /// The name this segment takes in the HDF5 file
    pub fn name(&self) -> &str {
        self.instance.as_deref().unwrap_or(&self.concept)
    }

    /// Concept-only segments follow the NeXus convention of having no lowercase letters
    pub fn is_concept_only(&self) -> bool {
        self.instance.is_none()
            && self.concept.chars().any(|c| c.is_ascii_uppercase())
            && !self.concept.chars().any(|c| c.is_ascii_lowercase())
    }

    /// The segment with its instance name removed
    pub fn schema_form(&self) -> Segment {
        Segment {
            concept: self.concept.clone(),
            instance: None,
            is_attribute: self.is_attribute,
        }
    }

    /// Does a schema-side segment describe this instance segment?
    pub fn matched_by(&self, schema: &Segment) -> bool {
        if self.is_attribute != schema.is_attribute {
            return false;
        }
        if let Some(schema_instance) = &schema.instance {
            return self.instance.as_ref() == Some(schema_instance) && self.concept == schema.concept;
        }
        self.concept == schema.concept || self.instance.as_deref() == Some(schema.concept.as_str())
    }

    fn parse(raw: &str, full_path: &str) -> Result<Self, PathError> {
        let malformed = |reason: &str| PathError::MalformedPath {
            path: full_path.to_string(),
            reason: reason.to_string(),
        };
        let (is_attribute, body) = match raw.strip_prefix(ATTRIBUTE_MARKER) {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        if body.is_empty() {
            return Err(malformed("empty concept"));
        }
        let opens = body.matches('[').count();
        let closes = body.matches(']').count();
        if opens != closes || opens > 1 {
            return Err(malformed("unbalanced brackets"));
        }
        if opens == 0 {
            return Ok(Self {
                concept: body.to_string(),
                instance: None,
                is_attribute,
            });
        }
        let open = body.find('[').unwrap_or_default();
        if !body.ends_with(']') || body.find(']').unwrap_or_default() < open {
            return Err(malformed("unbalanced brackets"));
        }
        let concept = &body[..open];
        let instance = &body[open + 1..body.len() - 1];
        if concept.is_empty() {
            return Err(malformed("empty concept"));
        }
        if instance.is_empty() {
            return Err(malformed("empty instance name"));
        }
        Ok(Self {
            concept: concept.to_string(),
            instance: Some(instance.to_string()),
            is_attribute,
        })
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_attribute {
            f.write_char(ATTRIBUTE_MARKER)?;
        }
        match &self.instance {
            Some(instance) => write!(f, "{}[{}]", self.concept, instance),
            None => write!(f, "{}", self.concept),
        }
    }
}

/// A parsed template path. The empty path is the file root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NexusPath {
    pub segments: Vec<Segment>,
}

impl NexusPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn is_attribute(&self) -> bool {
        self.last().is_some_and(|s| s.is_attribute)
    }

    /// The path without its final segment; the root is its own parent
    pub fn parent(&self) -> NexusPath {
        let mut segments = self.segments.clone();
        segments.pop();
        NexusPath { segments }
    }

    pub fn child(&self, segment: Segment) -> NexusPath {
        let mut segments = self.segments.clone();
        segments.push(segment);
        NexusPath { segments }
    }

    /// Segment-wise prefix test
    pub fn starts_with(&self, prefix: &NexusPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments.iter().zip(prefix.segments.iter()).all(|(a, b)| a == b)
    }

    pub fn schema_form(&self) -> NexusPath {
        NexusPath {
            segments: self.segments.iter().map(Segment::schema_form).collect(),
        }
    }

    /// The location in the HDF5 file, attribute segment included as `@name`
    pub fn hdf5_path(&self) -> String {
        let mut out = String::new();
        for segment in self.segments.iter() {
            out.push(SEPARATOR);
            if segment.is_attribute {
                out.push(ATTRIBUTE_MARKER);
            }
            out.push_str(segment.name());
        }
        if out.is_empty() {
            out.push(SEPARATOR);
        }
        out
    }

    /// Split an attribute path into the owning object path and the attribute name
    pub fn split_attribute(&self) -> Option<(NexusPath, &str)> {
        match self.last() {
            Some(last) if last.is_attribute => Some((self.parent(), last.name())),
            _ => None,
        }
    }
}

impl Display for NexusPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return f.write_char(SEPARATOR);
        }
        for segment in self.segments.iter() {
            write!(f, "{}{}", SEPARATOR, segment)?;
        }
        Ok(())
    }
}

impl FromStr for NexusPath {
    type Err = PathError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Parse a template path into its segments
pub fn parse(path: &str) -> Result<NexusPath, PathError> {
    let malformed = |reason: &str| PathError::MalformedPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    let Some(body) = path.strip_prefix(SEPARATOR) else {
        return Err(malformed("paths must start with /"));
    };
    if body.is_empty() {
        return Ok(NexusPath::root());
    }
    let mut segments = Vec::new();
    let raw_segments: Vec<&str> = body.split(SEPARATOR).collect();
    for (idx, raw) in raw_segments.iter().enumerate() {
        if raw.is_empty() {
            return Err(malformed("empty segment"));
        }
        let segment = Segment::parse(raw, path)?;
        if segment.is_attribute && idx + 1 != raw_segments.len() {
            return Err(malformed("attributes may only appear as the last segment"));
        }
        segments.push(segment);
    }
    Ok(NexusPath { segments })
}

/// Bind instance names to the concept-only segments of a schema path, in order.
///
/// Concepts without a given name fall back to their lowercase concept name, the same
/// default the NeXus tools use (`ENTRY` becomes `ENTRY[entry]`).
pub fn to_instance_form(schema_path: &str, instance_names: &[&str]) -> Result<String, PathError> {
    let parsed = parse(schema_path)?;
    let mut names = instance_names.iter();
    let segments = parsed
        .segments
        .into_iter()
        .map(|segment| {
            if segment.is_concept_only() {
                let instance = match names.next() {
                    Some(name) => name.to_string(),
                    None => segment.concept.to_lowercase(),
                };
                Segment {
                    instance: Some(instance),
                    ..segment
                }
            } else {
                segment
            }
        })
        .collect();
    Ok(NexusPath { segments }.to_string())
}

/// Remove every instance name from a path
pub fn to_schema_form(instance_path: &str) -> Result<String, PathError> {
    Ok(parse(instance_path)?.schema_form().to_string())
}

/// Does the schema path describe the instance path? Malformed paths never match.
pub fn matches(schema_path: &str, instance_path: &str) -> bool {
    match (parse(schema_path), parse(instance_path)) {
        (Ok(schema), Ok(instance)) => {
            schema.len() == instance.len()
                && instance
                    .segments
                    .iter()
                    .zip(schema.segments.iter())
                    .all(|(i, s)| i.matched_by(s))
        }
        _ => false,
    }
}

/// Substitute identifiers into the `*` wildcards of instance names, one per segment.
///
/// `/A[a*]/B[b*]/x` with `[3, 7]` becomes `/A[a3]/B[b7]/x`.
pub fn expand_variadic<T: Display>(pattern: &str, identifiers: &[T]) -> Result<String, PathError> {
    let mut parsed = parse(pattern)?;
    let expected = parsed
        .segments
        .iter()
        .filter(|s| s.instance.as_ref().is_some_and(|i| i.contains(WILDCARD)))
        .count();
    if identifiers.len() < expected {
        return Err(PathError::MissingIdentifiers {
            pattern: pattern.to_string(),
            expected,
            given: identifiers.len(),
        });
    }
    let mut ids = identifiers.iter();
    for segment in parsed.segments.iter_mut() {
        if let Some(instance) = segment.instance.as_mut() {
            if instance.contains(WILDCARD) {
                if let Some(id) = ids.next() {
                    *instance = instance.replace(WILDCARD, &id.to_string());
                }
            }
        }
    }
    Ok(parsed.to_string())
}

/// Expand every `*{a,b,...}` multiplexer in a path into the Cartesian product of paths
pub fn expand_short_form(path: &str) -> Vec<String> {
    expand_short_form_pair(path, None)
        .into_iter()
        .map(|(key, _)| key)
        .collect()
}

/// Expand a key and its string value in tandem.
///
/// Each `*` in the value is replaced, left to right, by the names chosen for the key's
/// multiplexers; the last name is reused when the value has more `*` than the key has
/// multiplexers. `("*{psi,delta}", "axis_*")` yields `psi -> axis_psi` and `delta -> axis_delta`.
pub fn expand_short_form_pair(key: &str, value: Option<&str>) -> Vec<(String, Option<String>)> {
    let re = short_form_regex();
    let groups: Vec<Vec<String>> = re
        .captures_iter(key)
        .map(|caps| {
            caps[1]
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect()
        })
        .collect();
    if groups.is_empty() || groups.iter().any(|g| g.is_empty()) {
        return vec![(key.to_string(), value.map(String::from))];
    }

    let mut combinations: Vec<Vec<String>> = vec![Vec::new()];
    for names in groups.iter() {
        combinations = combinations
            .into_iter()
            .flat_map(|combination| {
                names.iter().map(move |name| {
                    let mut next = combination.clone();
                    next.push(name.clone());
                    next
                })
            })
            .collect();
    }

    combinations
        .into_iter()
        .map(|combination| {
            let mut expanded = String::with_capacity(key.len());
            let mut last = 0;
            for (found, name) in re.find_iter(key).zip(combination.iter()) {
                expanded.push_str(&key[last..found.start()]);
                expanded.push_str(name);
                last = found.end();
            }
            expanded.push_str(&key[last..]);

            let expanded_value = value.map(|v| {
                let mut out = String::with_capacity(v.len());
                let mut idx = 0;
                for ch in v.chars() {
                    if ch == WILDCARD {
                        out.push_str(&combination[idx.min(combination.len() - 1)]);
                        idx += 1;
                    } else {
                        out.push(ch);
                    }
                }
                out
            });
            (expanded, expanded_value)
        })
        .collect()
}

/// Whether a string carries a `*{...}` multiplexer
pub fn has_short_form(s: &str) -> bool {
    short_form_regex().is_match(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instance_path() {
        let path = parse("/ENTRY[my_entry]/NXODD_name/int_value/@units").unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(path.segments[0], Segment::with_instance("ENTRY", "my_entry"));
        assert_eq!(path.segments[1], Segment::new("NXODD_name"));
        assert_eq!(path.segments[3], Segment::attribute("units"));
        assert!(path.is_attribute());
        assert_eq!(path.to_string(), "/ENTRY[my_entry]/NXODD_name/int_value/@units");
        assert_eq!(path.hdf5_path(), "/my_entry/NXODD_name/int_value/@units");
    }

    #[test]
    fn test_malformed_paths() {
        for bad in [
            "ENTRY[entry]/x",
            "/ENTRY[entry/x",
            "/ENTRYentry]/x",
            "/[entry]/x",
            "/ENTRY[]/x",
            "/ENTRY[entry]//x",
            "/x/@units/y",
            "/@",
        ] {
            assert!(
                matches!(parse(bad), Err(PathError::MalformedPath { .. })),
                "{bad} should be malformed"
            );
        }
        assert!(parse("/").unwrap().is_root());
    }

    #[test]
    fn test_schema_and_instance_forms() {
        assert_eq!(
            to_schema_form("/ENTRY[my_entry]/DATA[data]/@signal").unwrap(),
            "/ENTRY/DATA/@signal"
        );
        assert_eq!(
            to_instance_form("/ENTRY/NXODD_name/DATA/x", &["my_entry"]).unwrap(),
            "/ENTRY[my_entry]/NXODD_name/DATA[data]/x"
        );
    }

    #[test]
    fn test_matches() {
        assert!(matches(
            "/ENTRY/NXODD_name/int_value",
            "/ENTRY[my_entry]/NXODD_name/int_value"
        ));
        assert!(matches("/ENTRY/NXODD_name", "/ENTRY[my_entry]/DATA[NXODD_name]"));
        assert!(!matches("/ENTRY/NXODD_name/int_value", "/ENTRY[my_entry]/NXODD_name"));
        assert!(!matches("/ENTRY/x/@units", "/ENTRY[e]/x/units"));
        assert!(!matches("/ENTRY/x", "not a path"));
    }

    #[test]
    fn test_expand_variadic() {
        assert_eq!(
            expand_variadic("/A[a*]/B[b*]/x", &[3, 7]).unwrap(),
            "/A[a3]/B[b7]/x"
        );
        assert!(matches!(
            expand_variadic("/A[a*]/B[b*]/x", &[3]),
            Err(PathError::MissingIdentifiers {
                expected: 2,
                given: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_expand_short_form() {
        assert_eq!(
            expand_short_form("/ENTRY[entry]/*{x,y}/*{a,b}"),
            vec![
                "/ENTRY[entry]/x/a",
                "/ENTRY[entry]/x/b",
                "/ENTRY[entry]/y/a",
                "/ENTRY[entry]/y/b",
            ]
        );
        assert_eq!(expand_short_form("/plain"), vec!["/plain"]);
        let pairs = expand_short_form_pair("*{psi,delta}", Some("axis_*"));
        assert_eq!(
            pairs,
            vec![
                ("psi".to_string(), Some("axis_psi".to_string())),
                ("delta".to_string(), Some("axis_delta".to_string())),
            ]
        );
    }
}

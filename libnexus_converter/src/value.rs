use ndarray::{ArrayD, IxDyn};
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;
use std::fmt::Display;

use super::constants::{
    DEFAULT_COMPRESSION_STRENGTH, MAX_COMPRESSION_STRENGTH, MIN_COMPRESSION_STRENGTH,
};
use super::error::ValueError;

const LINK_KEY: &str = "link";
const COMPRESS_KEY: &str = "compress";
const STRENGTH_KEY: &str = "strength";

/// A single primitive value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Str(_) => "str",
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Bool(_) => "bool",
        }
    }

    fn to_yaml(&self) -> YamlValue {
        match self {
            Scalar::Str(s) => YamlValue::String(s.clone()),
            Scalar::Int(i) => YamlValue::Number((*i).into()),
            Scalar::Float(f) => YamlValue::Number((*f).into()),
            Scalar::Bool(b) => YamlValue::Bool(*b),
        }
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Str(s) => write!(f, "{s}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A homogeneous n-dimensional array
#[derive(Debug, Clone, PartialEq)]
pub enum Array {
    Int(ArrayD<i64>),
    Float(ArrayD<f64>),
    Bool(ArrayD<bool>),
    Str(ArrayD<String>),
}

impl Array {
    pub fn shape(&self) -> &[usize] {
        match self {
            Array::Int(a) => a.shape(),
            Array::Float(a) => a.shape(),
            Array::Bool(a) => a.shape(),
            Array::Str(a) => a.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Array::Int(_) => "int-array",
            Array::Float(_) => "float-array",
            Array::Bool(_) => "bool-array",
            Array::Str(_) => "str-array",
        }
    }

    /// Build an array from a (possibly nested) YAML sequence.
    ///
    /// All leaves must share a kind (ints may mix with floats) and nested sequences must
    /// be rectangular.
    pub fn from_nested(value: &YamlValue) -> Result<Self, ValueError> {
        let mut shape = Vec::new();
        let mut cursor = value;
        while let YamlValue::Sequence(seq) = cursor {
            shape.push(seq.len());
            match seq.first() {
                Some(first) => cursor = first,
                None => break,
            }
        }
        if shape.is_empty() {
            return Err(ValueError::NotAnArray(format!("{value:?}")));
        }
        let mut leaves = Vec::new();
        collect_leaves(value, 0, &shape, &mut leaves)?;

        let dim = IxDyn(&shape);
        if !leaves.is_empty() && leaves.iter().all(|v| v.is_bool()) {
            let data = leaves.iter().filter_map(|v| v.as_bool()).collect();
            Ok(Array::Bool(ArrayD::from_shape_vec(dim, data)?))
        } else if leaves.iter().all(|v| v.is_i64()) {
            let data = leaves.iter().filter_map(|v| v.as_i64()).collect();
            Ok(Array::Int(ArrayD::from_shape_vec(dim, data)?))
        } else if leaves.iter().all(|v| v.is_number()) {
            let data = leaves.iter().filter_map(|v| v.as_f64()).collect();
            Ok(Array::Float(ArrayD::from_shape_vec(dim, data)?))
        } else if leaves.iter().all(|v| v.is_string()) {
            let data = leaves
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect();
            Ok(Array::Str(ArrayD::from_shape_vec(dim, data)?))
        } else {
            Err(ValueError::NotAnArray(format!("{value:?}")))
        }
    }

    fn to_yaml(&self) -> YamlValue {
        fn nest<T, F: Fn(&T) -> YamlValue>(array: &ArrayD<T>, convert: F) -> YamlValue {
            fn build<T, F: Fn(&T) -> YamlValue>(
                flat: &[&T],
                shape: &[usize],
                convert: &F,
            ) -> YamlValue {
                match shape.split_first() {
                    None => flat.first().map(|v| convert(*v)).unwrap_or(YamlValue::Null),
                    Some((_, [])) => YamlValue::Sequence(flat.iter().map(|v| convert(*v)).collect()),
                    Some((&n, rest)) => {
                        let stride = rest.iter().product::<usize>();
                        YamlValue::Sequence(
                            (0..n)
                                .map(|i| build(&flat[i * stride..(i + 1) * stride], rest, convert))
                                .collect(),
                        )
                    }
                }
            }
            let flat: Vec<&T> = array.iter().collect();
            build(&flat, array.shape(), &convert)
        }
        match self {
            Array::Int(a) => nest(a, |v| YamlValue::Number((*v).into())),
            Array::Float(a) => nest(a, |v| YamlValue::Number((*v).into())),
            Array::Bool(a) => nest(a, |v| YamlValue::Bool(*v)),
            Array::Str(a) => nest(a, |v| YamlValue::String(v.clone())),
        }
    }
}

fn collect_leaves<'a>(
    value: &'a YamlValue,
    depth: usize,
    shape: &[usize],
    leaves: &mut Vec<&'a YamlValue>,
) -> Result<(), ValueError> {
    match value {
        YamlValue::Sequence(seq) => {
            if depth >= shape.len() || seq.len() != shape[depth] {
                return Err(ValueError::Ragged);
            }
            for item in seq.iter() {
                collect_leaves(item, depth + 1, shape, leaves)?;
            }
            Ok(())
        }
        leaf => {
            if depth != shape.len() {
                return Err(ValueError::Ragged);
            }
            leaves.push(leaf);
            Ok(())
        }
    }
}

/// Everything a template slot can hold.
///
/// `Dict` only ever comes out of converting YAML/JSON mappings that are neither link nor
/// compression descriptors; the writer refuses to write it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Scalar(Scalar),
    Array(Array),
    List(Vec<Value>),
    Link(String),
    Compressed { data: Array, strength: u8 },
    Dict(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// A link to `/internal/path` or to `file.h5:/internal/path`
    pub fn link(target: &str) -> Self {
        Value::Link(target.to_string())
    }

    /// An array to be written with gzip compression at the given strength (1-9)
    pub fn compressed(data: impl Into<Array>, strength: u8) -> Result<Self, ValueError> {
        if !(MIN_COMPRESSION_STRENGTH..=MAX_COMPRESSION_STRENGTH).contains(&strength) {
            return Err(ValueError::BadStrength(strength as i64));
        }
        Ok(Value::Compressed {
            data: data.into(),
            strength,
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Short description of the value's kind, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Scalar(s) => s.type_name(),
            Value::Array(a) => a.type_name(),
            Value::List(_) => "list",
            Value::Link(_) => "link",
            Value::Compressed { .. } => "compressed-array",
            Value::Dict(_) => "dict",
        }
    }

    /// Convert a parsed YAML (or JSON) tree, recognising link and compression descriptors
    pub fn from_yaml(value: &YamlValue) -> Result<Self, ValueError> {
        Ok(match value {
            YamlValue::Null => Value::None,
            YamlValue::Bool(b) => Value::Scalar(Scalar::Bool(*b)),
            YamlValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Scalar(Scalar::Int(i)),
                None => Value::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            YamlValue::String(s) => Value::Scalar(Scalar::Str(s.clone())),
            YamlValue::Sequence(seq) => match Array::from_nested(value) {
                Ok(array) => Value::Array(array),
                Err(_) => Value::List(
                    seq.iter()
                        .map(Value::from_yaml)
                        .collect::<Result<Vec<_>, _>>()?,
                ),
            },
            YamlValue::Mapping(map) => {
                let get = |key: &str| map.get(YamlValue::String(key.to_string()));
                if let (1, Some(YamlValue::String(target))) = (map.len(), get(LINK_KEY)) {
                    return Ok(Value::Link(target.clone()));
                }
                if let Some(data) = get(COMPRESS_KEY) {
                    let strength_given = get(STRENGTH_KEY);
                    if map.len() == 1 || (map.len() == 2 && strength_given.is_some()) {
                        let strength = match strength_given.and_then(|s| s.as_i64()) {
                            Some(s) if (MIN_COMPRESSION_STRENGTH as i64..=MAX_COMPRESSION_STRENGTH as i64).contains(&s) => {
                                s as u8
                            }
                            Some(s) => return Err(ValueError::BadStrength(s)),
                            None => DEFAULT_COMPRESSION_STRENGTH,
                        };
                        let data = Array::from_nested(data)
                            .map_err(|_| ValueError::NotAnArray(format!("{data:?}")))?;
                        return Ok(Value::Compressed { data, strength });
                    }
                }
                let mut dict = BTreeMap::new();
                for (key, item) in map.iter() {
                    let key = match key {
                        YamlValue::String(s) => s.clone(),
                        other => serde_yaml::to_string(other)
                            .unwrap_or_default()
                            .trim()
                            .to_string(),
                    };
                    dict.insert(key, Value::from_yaml(item)?);
                }
                Value::Dict(dict)
            }
            YamlValue::Tagged(tagged) => Value::from_yaml(&tagged.value)?,
        })
    }

    /// The inverse of `from_yaml`
    pub fn to_yaml(&self) -> YamlValue {
        match self {
            Value::None => YamlValue::Null,
            Value::Scalar(s) => s.to_yaml(),
            Value::Array(a) => a.to_yaml(),
            Value::List(items) => YamlValue::Sequence(items.iter().map(Value::to_yaml).collect()),
            Value::Link(target) => {
                let mut map = serde_yaml::Mapping::new();
                map.insert(LINK_KEY.into(), YamlValue::String(target.clone()));
                YamlValue::Mapping(map)
            }
            Value::Compressed { data, strength } => {
                let mut map = serde_yaml::Mapping::new();
                map.insert(COMPRESS_KEY.into(), data.to_yaml());
                map.insert(STRENGTH_KEY.into(), YamlValue::Number((*strength as i64).into()));
                YamlValue::Mapping(map)
            }
            Value::Dict(dict) => YamlValue::Mapping(
                dict.iter()
                    .map(|(k, v)| (YamlValue::String(k.clone()), v.to_yaml()))
                    .collect(),
            ),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Scalar(s) => write!(f, "{s} ({})", s.type_name()),
            Value::Array(a) => write!(f, "{} of shape {:?}", a.type_name(), a.shape()),
            Value::List(items) => write!(f, "list of {} items", items.len()),
            Value::Link(target) => write!(f, "link to {target}"),
            Value::Compressed { data, strength } => write!(
                f,
                "compressed {} of shape {:?} (strength {strength})",
                data.type_name(),
                data.shape()
            ),
            Value::Dict(dict) => write!(f, "dict with keys {:?}", dict.keys().collect::<Vec<_>>()),
        }
    }
}

macro_rules! scalar_from {
    ($($t:ty => $variant:ident as $target:ty),* $(,)?) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Scalar(Scalar::$variant(v as $target))
            }
        })*
    };
}

scalar_from!(
    i64 => Int as i64,
    i32 => Int as i64,
    u32 => Int as i64,
    f64 => Float as f64,
    f32 => Float as f64,
);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Scalar(Scalar::Bool(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Scalar(Scalar::Str(v.to_string()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Scalar(Scalar::Str(v))
    }
}

impl From<Scalar> for Value {
    fn from(v: Scalar) -> Self {
        Value::Scalar(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Value::Array(v)
    }
}

macro_rules! array_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<ArrayD<$t>> for Array {
            fn from(v: ArrayD<$t>) -> Self {
                Array::$variant(v)
            }
        }

        impl From<Vec<$t>> for Array {
            fn from(v: Vec<$t>) -> Self {
                Array::$variant(ndarray::Array1::from(v).into_dyn())
            }
        }

        impl From<ArrayD<$t>> for Value {
            fn from(v: ArrayD<$t>) -> Self {
                Value::Array(Array::$variant(v))
            }
        }

        impl From<Vec<$t>> for Value {
            fn from(v: Vec<$t>) -> Self {
                Value::Array(Array::from(v))
            }
        })*
    };
}

array_from!(i64 => Int, f64 => Float, bool => Bool, String => Str);

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::from(v.into_iter().map(String::from).collect::<Vec<_>>())
    }
}

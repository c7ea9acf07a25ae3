use hdf5::types::VarLenUnicode;
use hdf5::{File, Group, H5Type, Location};
use ndarray::ArrayD;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::constants::{
    CREATOR_ATTR, CREATOR_VERSION_ATTR, DATA_NX_CLASS, DEFAULT_ATTR, ENTRY_NX_CLASS,
    FILE_NAME_ATTR, FILE_TIME_ATTR, FILE_UPDATE_TIME_ATTR, HDF5_VERSION_ATTR,
    NEXUS_REPOSITORY_ATTR, NEXUS_REPOSITORY_URL, NEXUS_VERSION_ATTR, NX_CLASS_ATTR,
    ROOT_NX_CLASS,
};
use super::error::WriterError;
use super::nxdl::DefinitionsInfo;
use super::path::{self, NexusPath};
use super::template::Template;
use super::value::{Array, Scalar, Value};

// Structure
// / - NX_class=NXroot, file_name, file_time, ..., default
// |---- entry (NXentry) - default
// |    |---- group (NX_class from the definition, or NX<concept>)
// |    |    |---- field(dset) - units, ...
// |    |    |---- link -> /entry/... or file.h5:/...

/// Writes a filled template out as a NeXus HDF5 file.
///
/// Groups are created on demand along each populated path and tagged with their NX class.
/// Objects are written first, attributes second, and the root provenance attributes last so
/// that they always win over template values of the same name.
#[derive(Debug)]
pub struct NexusWriter {
    file_handle: File,
    path: PathBuf,
    definitions: DefinitionsInfo,
    /// NX class of every group created so far, keyed by HDF5 path
    written_classes: BTreeMap<String, String>,
    /// NX_class values the template supplies itself
    supplied_classes: BTreeMap<NexusPath, String>,
}

impl NexusWriter {
    /// Create the writer, truncating any file at path
    pub fn new(path: &Path) -> Result<Self, WriterError> {
        let file_handle = File::create(path)?;
        Ok(Self {
            file_handle,
            path: path.to_path_buf(),
            definitions: DefinitionsInfo::default(),
            written_classes: BTreeMap::new(),
            supplied_classes: BTreeMap::new(),
        })
    }

    /// Provenance of the definitions used, recorded in the root attributes
    pub fn with_definitions(mut self, definitions: DefinitionsInfo) -> Self {
        self.definitions = definitions;
        self
    }

    /// Write every populated entry of the template
    pub fn write(&mut self, template: &Template) -> Result<(), WriterError> {
        let mut objects: Vec<(&str, NexusPath, &Value)> = Vec::new();
        let mut attributes: BTreeMap<NexusPath, BTreeMap<String, (&str, &Value)>> =
            BTreeMap::new();

        for (key, value) in template.populated() {
            let parsed =
                path::parse(key).map_err(|e| WriterError::BadPath(key.to_string(), e))?;
            match parsed.split_attribute() {
                Some((owner, name)) => {
                    if name == NX_CLASS_ATTR {
                        if let Some(class) = value.as_str() {
                            self.supplied_classes.insert(owner.clone(), class.to_string());
                        }
                    }
                    attributes
                        .entry(owner)
                        .or_default()
                        .insert(name.to_string(), (key, value));
                }
                None if parsed.is_root() => {
                    return Err(WriterError::UnsupportedValue(
                        key.to_string(),
                        value.type_name().to_string(),
                    ))
                }
                None => objects.push((key, parsed, value)),
            }
        }

        for (key, object_path, value) in objects.iter() {
            let parent = self.require_group(&object_path.parent(), template)?;
            let name = object_path.last().map(|s| s.name()).unwrap_or_default();
            if parent.link_exists(name) {
                log::warn!("{key} was already written through another path; skipping it");
                continue;
            }
            write_object(&parent, name, key, value)?;
        }

        for key in template.groups() {
            let group_path =
                path::parse(key).map_err(|e| WriterError::BadPath(key.to_string(), e))?;
            self.require_group(&group_path, template)?;
        }

        let root_attributes = attributes.remove(&NexusPath::root()).unwrap_or_default();
        for (owner, owner_attributes) in attributes.iter() {
            // HDF5 resolves a link to its target, so attributes would land on the target
            if let Some(Value::Link(target)) = template.get(&owner.to_string()) {
                log::warn!("{owner} is a link to {target}; its attributes are not written");
                continue;
            }
            let location = self.require_owner(owner, template, owner_attributes)?;
            for (name, (key, value)) in owner_attributes.iter() {
                write_attribute(&location, name, key, value)?;
            }
        }

        self.write_default_plot(&attributes)?;
        self.write_root_attributes(root_attributes)?;

        log::info!(
            "Wrote {} objects and {} groups to {}",
            objects.len(),
            self.written_classes.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Close the file, reporting its final size
    pub fn close(self) -> Result<(), WriterError> {
        self.file_handle.close()?;
        let size = human_bytes::human_bytes(self.path.metadata()?.len() as f64);
        log::info!("Closed {} ({})", self.path.display(), size);
        Ok(())
    }

    /// Open the group at path, creating and tagging any missing group along the way
    fn require_group(
        &mut self,
        group_path: &NexusPath,
        template: &Template,
    ) -> Result<Group, WriterError> {
        let mut group = self.file_handle.group("/")?;
        let mut prefix = NexusPath::root();
        for segment in group_path.segments.iter() {
            prefix = prefix.child(segment.clone());
            let name = segment.name();
            group = if group.link_exists(name) {
                group
                    .group(name)
                    .map_err(|_| WriterError::NotAGroup(prefix.to_string()))?
            } else {
                let created = group.create_group(name)?;
                let class = match self.supplied_classes.get(&prefix) {
                    Some(class) => class.clone(),
                    None => {
                        let class = template
                            .group_class(&prefix)
                            .map(String::from)
                            .unwrap_or_else(|| format!("NX{}", segment.concept.to_lowercase()));
                        set_attr_str(&created, NX_CLASS_ATTR, &class)?;
                        class
                    }
                };
                self.written_classes.insert(prefix.hdf5_path(), class);
                created
            };
        }
        Ok(group)
    }

    /// The object an attribute hangs off. Groups holding nothing but attributes are created;
    /// a field that was never written is an orphan.
    fn require_owner(
        &mut self,
        owner: &NexusPath,
        template: &Template,
        owner_attributes: &BTreeMap<String, (&str, &Value)>,
    ) -> Result<Location, WriterError> {
        let hdf5_path = owner.hdf5_path();
        if let Ok(dataset) = self.file_handle.dataset(&hdf5_path) {
            return Ok(Location::clone(&dataset));
        }
        if self.file_handle.link_exists(&hdf5_path) || !template.contains(&owner.to_string()) {
            let group = self.require_group(owner, template)?;
            return Ok(Location::clone(&group));
        }
        let key = owner_attributes
            .values()
            .next()
            .map(|(key, _)| key.to_string())
            .unwrap_or_else(|| owner.to_string());
        Err(WriterError::OrphanAttribute(key))
    }

    /// Point `/@default` at the first entry and each entry's `@default` at its first NXdata
    /// group, unless the template already did
    fn write_default_plot(
        &self,
        attributes: &BTreeMap<NexusPath, BTreeMap<String, (&str, &Value)>>,
    ) -> Result<(), WriterError> {
        let has_default = |hdf5_path: &str| {
            attributes
                .iter()
                .any(|(owner, attrs)| owner.hdf5_path() == hdf5_path && attrs.contains_key(DEFAULT_ATTR))
        };
        let entries: Vec<&String> = self
            .written_classes
            .iter()
            .filter(|(p, class)| class.as_str() == ENTRY_NX_CLASS && depth(p) == 1)
            .map(|(p, _)| p)
            .collect();

        for entry in entries.iter() {
            if has_default(entry.as_str()) {
                continue;
            }
            let plot = self.written_classes.iter().find(|(p, class)| {
                class.as_str() == DATA_NX_CLASS
                    && depth(p) == 2
                    && p.starts_with(&format!("{entry}/"))
            });
            if let Some((data_path, _)) = plot {
                let group = self.file_handle.group(entry)?;
                set_attr_str(&group, DEFAULT_ATTR, base_name(data_path))?;
            }
        }
        Ok(())
    }

    fn write_root_attributes(
        &self,
        mut supplied: BTreeMap<String, (&str, &Value)>,
    ) -> Result<(), WriterError> {
        let now = OffsetDateTime::now_local()
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
            .format(&Rfc3339)?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let repository = match &self.definitions.commit {
            Some(commit) => format!("{NEXUS_REPOSITORY_URL}/blob/{commit}"),
            None => NEXUS_REPOSITORY_URL.to_string(),
        };
        let (major, minor, patch) = hdf5::library_version();
        let owned = [
            (NX_CLASS_ATTR, ROOT_NX_CLASS.to_string()),
            (FILE_NAME_ATTR, file_name),
            (FILE_TIME_ATTR, now.clone()),
            (FILE_UPDATE_TIME_ATTR, now),
            (NEXUS_VERSION_ATTR, self.definitions.version.clone()),
            (NEXUS_REPOSITORY_ATTR, repository),
            (HDF5_VERSION_ATTR, format!("{major}.{minor}.{patch}")),
            (CREATOR_ATTR, env!("CARGO_PKG_NAME").to_string()),
            (CREATOR_VERSION_ATTR, env!("CARGO_PKG_VERSION").to_string()),
        ];

        let root = self.file_handle.group("/")?;
        for (name, value) in owned.iter() {
            if let Some((key, _)) = supplied.remove(*name) {
                log::warn!("{key} is set by the writer; the template value is overwritten");
            }
            set_attr_str(&root, name, value)?;
        }

        if !supplied.contains_key(DEFAULT_ATTR) {
            let first_entry = self
                .written_classes
                .iter()
                .find(|(p, class)| class.as_str() == ENTRY_NX_CLASS && depth(p) == 1);
            if let Some((entry, _)) = first_entry {
                set_attr_str(&root, DEFAULT_ATTR, base_name(entry))?;
            }
        }
        for (name, (key, value)) in supplied.iter() {
            write_attribute(&root, name, key, value)?;
        }
        Ok(())
    }
}

/// Create, write and close a NeXus file in one go
pub fn write_template(
    path: &Path,
    template: &Template,
    definitions: DefinitionsInfo,
) -> Result<(), WriterError> {
    let mut writer = NexusWriter::new(path)?.with_definitions(definitions);
    writer.write(template)?;
    writer.close()
}

fn depth(hdf5_path: &str) -> usize {
    hdf5_path.split('/').filter(|s| !s.is_empty()).count()
}

fn base_name(hdf5_path: &str) -> &str {
    hdf5_path.rsplit('/').next().unwrap_or(hdf5_path)
}

/// Split `file.h5:/internal/path` into its file and internal parts
fn split_external(target: &str) -> Option<(&str, &str)> {
    match target.rfind(":/") {
        Some(idx) if idx > 0 => Some((&target[..idx], &target[idx + 1..])),
        _ => None,
    }
}

fn write_object(parent: &Group, name: &str, key: &str, value: &Value) -> Result<(), WriterError> {
    match value {
        Value::None => Ok(()),
        Value::Scalar(scalar) => write_scalar_dataset(parent, name, scalar),
        Value::Array(array) => write_array_dataset(parent, name, array, None),
        Value::List(_) => write_array_dataset(parent, name, &list_to_array(key, value)?, None),
        Value::Compressed { data, strength } => {
            if let Array::Str(_) = data {
                log::warn!("String arrays are not compressed; writing {key} uncompressed");
                return write_array_dataset(parent, name, data, None);
            }
            write_array_dataset(parent, name, data, Some(*strength))
        }
        Value::Link(target) => {
            match split_external(target) {
                Some((file, internal)) => parent.link_external(file, internal, name)?,
                None => {
                    let internal = path::parse(target)
                        .map(|p| p.hdf5_path())
                        .unwrap_or_else(|_| target.clone());
                    parent.link_soft(&internal, name)?
                }
            }
            Ok(())
        }
        Value::Dict(_) => Err(WriterError::InvalidDictProvided(key.to_string())),
    }
}

fn list_to_array(key: &str, value: &Value) -> Result<Array, WriterError> {
    Array::from_nested(&value.to_yaml())
        .map_err(|_| WriterError::UnsupportedValue(key.to_string(), "mixed list".to_string()))
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode, WriterError> {
    Ok(VarLenUnicode::from_str(value)?)
}

fn to_var_len_array(values: &ArrayD<String>) -> Result<ArrayD<VarLenUnicode>, WriterError> {
    let converted = values
        .iter()
        .map(|s| to_var_len_unicode(s))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ArrayD::from_shape_vec(values.raw_dim(), converted)?)
}

fn write_scalar_dataset(parent: &Group, name: &str, scalar: &Scalar) -> Result<(), WriterError> {
    match scalar {
        Scalar::Str(s) => create_scalar_dataset(parent, name, &to_var_len_unicode(s)?),
        Scalar::Int(i) => create_scalar_dataset(parent, name, i),
        Scalar::Float(f) => create_scalar_dataset(parent, name, f),
        Scalar::Bool(b) => create_scalar_dataset(parent, name, b),
    }
}

fn create_scalar_dataset<T: H5Type>(parent: &Group, name: &str, value: &T) -> Result<(), WriterError> {
    parent
        .new_dataset::<T>()
        .shape(())
        .create(name)?
        .write_scalar(value)?;
    Ok(())
}

fn write_array_dataset(
    parent: &Group,
    name: &str,
    array: &Array,
    compression: Option<u8>,
) -> Result<(), WriterError> {
    match array {
        Array::Int(a) => create_array_dataset(parent, name, a, compression),
        Array::Float(a) => create_array_dataset(parent, name, a, compression),
        Array::Bool(a) => create_array_dataset(parent, name, a, compression),
        Array::Str(a) => create_array_dataset(parent, name, &to_var_len_array(a)?, None),
    }
}

fn create_array_dataset<T: H5Type>(
    parent: &Group,
    name: &str,
    data: &ArrayD<T>,
    compression: Option<u8>,
) -> Result<(), WriterError> {
    let shape = data.shape().to_vec();
    let mut builder = parent.new_dataset::<T>().shape(shape.clone());
    if let Some(level) = compression {
        // A single chunk spanning the whole array; chunk dimensions may not be zero
        let chunk: Vec<usize> = shape.iter().map(|d| (*d).max(1)).collect();
        builder = builder.chunk(chunk).deflate(level);
    }
    builder.create(name)?.write(data)?;
    Ok(())
}

fn set_attr_str(location: &Location, name: &str, value: &str) -> Result<(), WriterError> {
    let value = to_var_len_unicode(value)?;
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn create_scalar_attr<T: H5Type>(location: &Location, name: &str, value: &T) -> Result<(), WriterError> {
    location.new_attr::<T>().create(name)?.write_scalar(value)?;
    Ok(())
}

fn create_array_attr<T: H5Type>(
    location: &Location,
    name: &str,
    data: &ArrayD<T>,
) -> Result<(), WriterError> {
    location
        .new_attr::<T>()
        .shape(data.shape().to_vec())
        .create(name)?
        .write(data)?;
    Ok(())
}

fn write_attribute(location: &Location, name: &str, key: &str, value: &Value) -> Result<(), WriterError> {
    let array = match value {
        Value::None => return Ok(()),
        Value::Scalar(Scalar::Str(s)) => return set_attr_str(location, name, s),
        Value::Scalar(Scalar::Int(i)) => return create_scalar_attr(location, name, i),
        Value::Scalar(Scalar::Float(f)) => return create_scalar_attr(location, name, f),
        Value::Scalar(Scalar::Bool(b)) => return create_scalar_attr(location, name, b),
        Value::Array(array) => array.clone(),
        Value::Compressed { data, .. } => {
            log::warn!("Attributes cannot be compressed; writing {key} uncompressed");
            data.clone()
        }
        Value::List(_) => list_to_array(key, value)?,
        Value::Link(_) => {
            return Err(WriterError::UnsupportedValue(key.to_string(), "link".to_string()))
        }
        Value::Dict(_) => return Err(WriterError::InvalidDictProvided(key.to_string())),
    };
    match &array {
        Array::Int(a) => create_array_attr(location, name, a),
        Array::Float(a) => create_array_attr(location, name, a),
        Array::Bool(a) => create_array_attr(location, name, a),
        Array::Str(a) => create_array_attr(location, name, &to_var_len_array(a)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(template: &Template) -> (tempfile::TempDir, File) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.nxs");
        write_template(&path, template, DefinitionsInfo::default()).unwrap();
        let file = File::open(&path).unwrap();
        (dir, file)
    }

    fn read_str_attr(location: &Location, name: &str) -> String {
        location
            .attr(name)
            .unwrap()
            .read_scalar::<VarLenUnicode>()
            .unwrap()
            .as_str()
            .to_string()
    }

    #[test]
    fn test_groups_and_classes() {
        let mut template = Template::new();
        template.set_group_class("/ENTRY/DATA", "NXdata");
        template.set("/ENTRY[entry]/DATA[data]/x", vec![1.0, 2.0]).unwrap();
        template.set("/ENTRY[entry]/DATA[data]/x/@units", "eV").unwrap();
        template.set("/ENTRY[entry]/title", "run 1").unwrap();
        template.add_group("/ENTRY[entry]/SAMPLE[sample]").unwrap();
        let (_dir, file) = written(&template);

        let entry = file.group("entry").unwrap();
        assert_eq!(read_str_attr(&entry, NX_CLASS_ATTR), "NXentry");
        assert_eq!(read_str_attr(&file.group("entry/data").unwrap(), NX_CLASS_ATTR), "NXdata");
        assert_eq!(read_str_attr(&file.group("entry/sample").unwrap(), NX_CLASS_ATTR), "NXsample");

        let x = file.dataset("entry/data/x").unwrap();
        assert_eq!(x.shape(), vec![2]);
        assert_eq!(read_str_attr(&x, "units"), "eV");
        let title = file.dataset("entry/title").unwrap();
        assert_eq!(title.read_scalar::<VarLenUnicode>().unwrap().as_str(), "run 1");

        assert_eq!(read_str_attr(&file, DEFAULT_ATTR), "entry");
        assert_eq!(read_str_attr(&entry, DEFAULT_ATTR), "data");
    }

    #[test]
    fn test_root_attributes_are_owned_by_writer() {
        let mut template = Template::new();
        template.set("/@file_name", "bogus.nxs").unwrap();
        template.set("/@custom", "kept").unwrap();
        template.set("/ENTRY[entry]/value", 1).unwrap();
        let (_dir, file) = written(&template);

        assert_eq!(read_str_attr(&file, NX_CLASS_ATTR), ROOT_NX_CLASS);
        assert_eq!(read_str_attr(&file, FILE_NAME_ATTR), "out.nxs");
        assert_eq!(read_str_attr(&file, CREATOR_ATTR), env!("CARGO_PKG_NAME"));
        assert_eq!(read_str_attr(&file, "custom"), "kept");
        let file_time = read_str_attr(&file, FILE_TIME_ATTR);
        assert!(OffsetDateTime::parse(&file_time, &Rfc3339).is_ok());
    }

    #[test]
    fn test_dict_is_refused() {
        let mut template = Template::new();
        let mut dict = BTreeMap::new();
        dict.insert(String::from("a"), Value::from(1));
        template.set("/ENTRY[entry]/bad", Value::Dict(dict)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = write_template(
            &dir.path().join("out.nxs"),
            &template,
            DefinitionsInfo::default(),
        );
        assert!(matches!(result, Err(WriterError::InvalidDictProvided(key)) if key == "/ENTRY[entry]/bad"));
    }

    #[test]
    fn test_links_and_compression() {
        let mut template = Template::new();
        template.set("/ENTRY[entry]/DATA[data]/y", vec![1_i64, 2, 3, 4]).unwrap();
        template
            .set("/ENTRY[entry]/links/internal", Value::link("/ENTRY[entry]/DATA[data]/y"))
            .unwrap();
        template
            .set("/ENTRY[entry]/links/external", Value::link("other.h5:/axes/ax3"))
            .unwrap();
        let squeezed = Value::compressed(vec![0.5_f64; 64], 6).unwrap();
        template.set("/ENTRY[entry]/DATA[data]/z", squeezed).unwrap();
        let (_dir, file) = written(&template);

        let linked = file.dataset("entry/links/internal").unwrap();
        assert_eq!(linked.read_raw::<i64>().unwrap(), vec![1, 2, 3, 4]);
        assert!(file.link_exists("entry/links/external"));
        let z = file.dataset("entry/data/z").unwrap();
        assert_eq!(z.read_raw::<f64>().unwrap().len(), 64);
        assert!(z.is_chunked());
    }

    #[test]
    fn test_link_attributes_leave_target_alone() {
        let mut template = Template::new();
        template.set("/ENTRY[entry]/DATA[data]/y", vec![1_i64, 2, 3]).unwrap();
        template.set("/ENTRY[entry]/DATA[data]/y/@units", "mm").unwrap();
        template
            .set("/ENTRY[entry]/links/y", Value::link("/ENTRY[entry]/DATA[data]/y"))
            .unwrap();
        template.set("/ENTRY[entry]/links/y/@units", "eV").unwrap();
        template.set("/ENTRY[entry]/links/y/@long_name", "linked").unwrap();
        let (_dir, file) = written(&template);

        let y = file.dataset("entry/data/y").unwrap();
        assert_eq!(read_str_attr(&y, "units"), "mm");
        assert!(y.attr("long_name").is_err());
        assert_eq!(
            file.dataset("entry/links/y").unwrap().read_raw::<i64>().unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_field_below_field_fails() {
        let mut template = Template::new();
        template.set("/ENTRY[entry]/x", 1).unwrap();
        template.set("/ENTRY[entry]/x/y", 2).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = write_template(
            &dir.path().join("out.nxs"),
            &template,
            DefinitionsInfo::default(),
        );
        assert!(matches!(result, Err(WriterError::NotAGroup(_))));
    }
}

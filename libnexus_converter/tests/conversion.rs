use hdf5::types::VarLenUnicode;
use hdf5::{File, Location};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use libnexus_converter::config::Config;
use libnexus_converter::convert::convert;
use libnexus_converter::error::{ConverterError, WriterError};
use libnexus_converter::generator::generate;
use libnexus_converter::nxdl::{bundled_definitions, Definition, DefinitionsInfo, NxdlLoader};
use libnexus_converter::template::Template;
use libnexus_converter::validation::validate;
use libnexus_converter::value::Value;
use libnexus_converter::writer::write_template;

const ODD: &str = "/ENTRY[my_entry]/NXODD_name";

fn definition() -> Definition {
    NxdlLoader::new(&bundled_definitions())
        .load("NXtest")
        .unwrap()
}

/// The minimal template NXtest accepts
fn filled_template(definition: &Definition) -> Template {
    let mut template = generate(definition);
    let entries: Vec<(String, Value)> = vec![
        (format!("{ODD}/int_value"), Value::from(2)),
        (format!("{ODD}/int_value/@units"), Value::from("eV")),
        (format!("{ODD}/bool_value"), Value::from(true)),
        (format!("{ODD}/posint_value"), Value::from(vec![1_i64, 2, 3])),
        (format!("{ODD}/posint_value/@units"), Value::from("mm")),
        (format!("{ODD}/char_value"), Value::from("just chars")),
        (
            format!("{ODD}/date_value"),
            Value::from("2022-01-22T12:14:12.05018+00:00"),
        ),
        (
            String::from("/ENTRY[my_entry]/definition"),
            Value::from("NXtest"),
        ),
        (
            String::from("/ENTRY[my_entry]/definition/@version"),
            Value::from("2.4.6"),
        ),
    ];
    for (key, value) in entries {
        template.set(&key, value).unwrap();
    }
    template
}

fn write(dir: &Path, template: &Template) -> Result<File, WriterError> {
    let path = dir.join("test.nxs");
    let info = DefinitionsInfo::read(&bundled_definitions()).unwrap();
    write_template(&path, template, info)?;
    Ok(File::open(&path).unwrap())
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
fn test_minimal_template_round_trip() {
    let definition = definition();
    let template = filled_template(&definition);
    validate(&definition, &template).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let file = write(dir.path(), &template).unwrap();

    let int_value = file.dataset("my_entry/NXODD_name/int_value").unwrap();
    assert_eq!(int_value.read_scalar::<i64>().unwrap(), 2);
    assert_eq!(read_str_attr(&int_value, "units"), "eV");
    let posint_value = file.dataset("my_entry/NXODD_name/posint_value").unwrap();
    assert_eq!(posint_value.shape(), vec![3]);
    assert_eq!(posint_value.read_raw::<i64>().unwrap(), vec![1, 2, 3]);
    let definition_field = file.dataset("my_entry/definition").unwrap();
    assert_eq!(read_str_attr(&definition_field, "version"), "2.4.6");

    assert_eq!(read_str_attr(&file.group("my_entry").unwrap(), "NX_class"), "NXentry");
    assert_eq!(
        read_str_attr(&file.group("my_entry/NXODD_name").unwrap(), "NX_class"),
        "NXdata"
    );
    assert_eq!(read_str_attr(&file, "default"), "my_entry");
    assert_eq!(read_str_attr(&file.group("my_entry").unwrap(), "default"), "NXODD_name");
    assert_eq!(read_str_attr(&file, "NeXus_version"), "v2024.02");
}

#[test]
fn test_external_link() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("somefile.h5");
    {
        let target_file = File::create(&target).unwrap();
        let axes = target_file.create_group("axes").unwrap();
        axes.new_dataset_builder()
            .with_data(&ndarray::arr1(&[0.5_f64, 1.5, 2.5]))
            .create("ax3")
            .unwrap();
    }

    let definition = definition();
    let mut template = filled_template(&definition);
    template
        .set(
            "/ENTRY[my_entry]/links/ext_link",
            Value::link(&format!("{}:/axes/ax3", target.display())),
        )
        .unwrap();
    template
        .set(
            "/ENTRY[my_entry]/links/int_link",
            Value::link(&format!("{ODD}/int_value")),
        )
        .unwrap();
    validate(&definition, &template).unwrap();

    let file = write(dir.path(), &template).unwrap();
    assert!(file.link_exists("my_entry/links/ext_link"));
    let linked = file.dataset("my_entry/links/ext_link").unwrap();
    assert_eq!(linked.read_raw::<f64>().unwrap(), vec![0.5, 1.5, 2.5]);
    let internal = file.dataset("my_entry/links/int_link").unwrap();
    assert_eq!(internal.read_scalar::<i64>().unwrap(), 2);
}

#[test]
fn test_dict_value_fails_in_writer() {
    let definition = definition();
    let mut template = filled_template(&definition);
    let mut dict = BTreeMap::new();
    dict.insert(String::from("unexpected"), Value::from(1));
    template
        .set(&format!("{ODD}/char_value"), Value::Dict(dict))
        .unwrap();
    validate(&definition, &template).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let result = write(dir.path(), &template);
    assert!(matches!(
        result,
        Err(WriterError::InvalidDictProvided(key)) if key == format!("{ODD}/char_value")
    ));

    // the failed writer released the file, so it can be opened and truncated again
    let output = dir.path().join("test.nxs");
    File::open(&output).unwrap();
    let recreated = File::create(&output).unwrap();
    recreated.close().unwrap();
}

#[test]
fn test_root_attribute_is_overwritten() {
    let definition = definition();
    let mut template = filled_template(&definition);
    template.set("/@NX_class", "NXwrong").unwrap();
    validate(&definition, &template).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let file = write(dir.path(), &template).unwrap();
    assert_eq!(read_str_attr(&file, "NX_class"), "NXroot");
    assert_eq!(read_str_attr(&file, "file_name"), "test.nxs");
}

fn eln_config(dir: &Path, eln: &str) -> Config {
    let eln_path = dir.join("eln.yaml");
    std::fs::write(&eln_path, eln).unwrap();
    Config {
        input_files: vec![eln_path],
        output: dir.join("converted.nxs"),
        definitions_path: Some(bundled_definitions()),
        ..Default::default()
    }
}

const ELN: &str = r#"
definition:
  value: NXtest
  "@version": "2.4.6"
program_name: nexus_converter
NXODD_name:
  int_value: {value: 2, unit: eV}
  bool_value: true
  posint_value: {value: [1, 2, 3], unit: mm}
  char_value: just chars
  date_value: "2022-01-22T12:14:12.05018+00:00"
USER[user]:
  - name: Jane
  - name: John
"#;

#[test]
fn test_convert_with_eln_reader() {
    let dir = tempfile::tempdir().unwrap();
    let config = eln_config(dir.path(), ELN);
    let output: PathBuf = convert(&config).unwrap();
    assert_eq!(output, config.output);

    let file = File::open(&output).unwrap();
    let int_value = file.dataset("entry/NXODD_name/int_value").unwrap();
    assert_eq!(int_value.read_scalar::<i64>().unwrap(), 2);
    let second_user = file.dataset("entry/user1/name").unwrap();
    assert_eq!(second_user.read_scalar::<VarLenUnicode>().unwrap().as_str(), "John");
    assert_eq!(read_str_attr(&file.group("entry/user").unwrap(), "NX_class"), "NXuser");
    assert_eq!(read_str_attr(&file, "creator"), "libnexus_converter");
}

#[test]
fn test_convert_applies_eln_settings_to_input_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        eln_parent_key: String::from("/ENTRY[scan]"),
        convert_dict: BTreeMap::from([(String::from("program_name"), String::from("program"))]),
        ..eln_config(dir.path(), ELN)
    };
    let output = convert(&config).unwrap();

    let file = File::open(&output).unwrap();
    let int_value = file.dataset("scan/NXODD_name/int_value").unwrap();
    assert_eq!(int_value.read_scalar::<i64>().unwrap(), 2);
    assert!(file.link_exists("scan/program"));
    assert!(!file.link_exists("entry"));
}

#[test]
fn test_convert_stops_on_invalid_template() {
    let dir = tempfile::tempdir().unwrap();
    let config = eln_config(dir.path(), &ELN.replace("bool_value: true", "bool_value: 3"));
    let result = convert(&config);
    assert!(matches!(result, Err(ConverterError::ValidationError(_))));
    assert!(!config.output.exists());

    let config = Config {
        skip_validation: true,
        ..config
    };
    assert!(convert(&config).is_ok());
}

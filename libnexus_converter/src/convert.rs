use std::path::PathBuf;

use super::config::Config;
use super::error::ConverterError;
use super::flatten::flatten_file;
use super::generator::generate;
use super::nxdl::{set_definitions_root, Definition, DefinitionsInfo, NxdlLoader};
use super::reader::get_reader_for;
use super::template::Template;
use super::validation::validate;
use super::value::Value;
use super::writer::NexusWriter;

/// Loader for the definitions the config points at, falling back to the process-wide root
fn loader_for(config: &Config) -> NxdlLoader {
    match &config.definitions_path {
        Some(root) => {
            set_definitions_root(root);
            NxdlLoader::new(root)
        }
        None => NxdlLoader::default(),
    }
}

/// Generate the template for the definition and run the reader and ELN file over it.
///
/// ELN values override reader values.
pub fn fill_template(
    config: &Config,
    definition: &Definition,
    objects: &[Value],
) -> Result<Template, ConverterError> {
    let template = generate(definition);
    log::info!(
        "Generated template for {} with {} paths",
        definition.name,
        template.len()
    );

    let reader = get_reader_for(&config.reader, &config.nxdl, config.flatten_rules())?;
    log::info!(
        "Reading {} input file(s) with the {} reader...",
        config.input_files.len(),
        reader.name()
    );
    let mut filled = reader.read(&template, &config.input_files, objects)?;

    if let Some(eln_path) = &config.eln_path {
        log::info!("Merging ELN file {}...", eln_path.display());
        for (key, value) in flatten_file(eln_path, &config.flatten_rules())? {
            filled
                .set(&key, value)
                .map_err(|e| ConverterError::FlattenError(e.into()))?;
        }
    }
    Ok(filled)
}

/// Run one conversion end to end, returning the path of the written file
pub fn convert(config: &Config) -> Result<PathBuf, ConverterError> {
    convert_with_objects(config, &[])
}

/// Run one conversion, handing in-memory objects to the reader
pub fn convert_with_objects(config: &Config, objects: &[Value]) -> Result<PathBuf, ConverterError> {
    config.check()?;
    let loader = loader_for(config);
    log::info!("Loading {} from {}...", config.nxdl, loader.root().display());
    let definition = loader.load(&config.nxdl)?;
    let definitions_info = DefinitionsInfo::read(loader.root())?;

    let filled = fill_template(config, &definition, objects)?;

    if config.skip_validation {
        log::warn!("Validation is skipped; the output may not conform to {}", definition.name);
    } else {
        validate(&definition, &filled)?;
    }

    log::info!("Writing {}...", config.output.display());
    let mut writer = NexusWriter::new(&config.output)?.with_definitions(definitions_info);
    writer.write(&filled)?;
    writer.close()?;
    Ok(config.output.clone())
}

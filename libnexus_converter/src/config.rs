use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::constants::DEFAULT_ELN_PARENT_KEY;
use super::error::ConfigError;
use super::flatten::FlattenRules;
use super::reader::ReaderKind;

fn default_eln_parent_key() -> String {
    String::from(DEFAULT_ELN_PARENT_KEY)
}

/// Structure representing one conversion. Contains the definition, reader and pathing information
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the application definition, e.g. NXtest
    pub nxdl: String,
    pub reader: String,
    #[serde(default)]
    pub input_files: Vec<PathBuf>,
    pub output: PathBuf,
    #[serde(default)]
    pub eln_path: Option<PathBuf>,
    /// Root of a NeXus definitions checkout; falls back to the environment, then the bundled set
    #[serde(default)]
    pub definitions_path: Option<PathBuf>,
    #[serde(default)]
    pub convert_dict: BTreeMap<String, String>,
    #[serde(default)]
    pub replace_nested: BTreeMap<String, String>,
    #[serde(default = "default_eln_parent_key")]
    pub eln_parent_key: String,
    #[serde(default)]
    pub skip_validation: bool,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be placeholders
    fn default() -> Self {
        Self {
            nxdl: String::from("NXtest"),
            reader: ReaderKind::Eln.to_string(),
            input_files: vec![],
            output: PathBuf::from("output.nxs"),
            eln_path: None,
            definitions_path: None,
            convert_dict: BTreeMap::new(),
            replace_nested: BTreeMap::new(),
            eln_parent_key: default_eln_parent_key(),
            skip_validation: false,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.check()?;
        Ok(config)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        std::fs::write(config_path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Catch values that would only fail deep inside a conversion
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.nxdl.is_empty() {
            return Err(ConfigError::InvalidValue(String::from("nxdl must not be empty")));
        }
        if self.reader.parse::<ReaderKind>().is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "unknown reader {}",
                self.reader
            )));
        }
        if !self.eln_parent_key.starts_with('/') {
            return Err(ConfigError::InvalidValue(format!(
                "eln_parent_key {} must start with /",
                self.eln_parent_key
            )));
        }
        Ok(())
    }

    /// Flattening rules for the ELN file and the eln reader
    pub fn flatten_rules(&self) -> FlattenRules {
        FlattenRules {
            convert_dict: self.convert_dict.clone(),
            replace_nested: self.replace_nested.clone(),
            parent_key: self.eln_parent_key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config: Config =
            serde_yaml::from_str("nxdl: NXtest\nreader: json_map\noutput: out.nxs\n").unwrap();
        assert_eq!(config.eln_parent_key, DEFAULT_ELN_PARENT_KEY);
        assert!(config.input_files.is_empty());
        assert!(!config.skip_validation);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_read_write_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        assert!(matches!(
            Config::read_config_file(&path),
            Err(ConfigError::BadFilePath(_))
        ));

        let mut config = Config::default();
        config.eln_path = Some(PathBuf::from("eln.yaml"));
        config
            .convert_dict
            .insert(String::from("unit"), String::from("units"));
        config.write_config_file(&path).unwrap();
        assert_eq!(Config::read_config_file(&path).unwrap(), config);

        std::fs::write(&path, "nxdl: NXtest\nreader: xps\noutput: out.nxs\n").unwrap();
        assert!(matches!(
            Config::read_config_file(&path),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}

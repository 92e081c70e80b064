//! Persistent key sources.
//!
//! The only production source is the YAML configuration file, where the key
//! lives under `security.encryption_key` next to the rest of the settings.

use std::fs;
use std::path::PathBuf;

use serde_yaml::{Mapping, Value};
use thiserror::Error;

const SECURITY_SECTION: &str = "security";
const KEY_FIELD: &str = "encryption_key";

/// Errors produced while reading or writing a key source.
#[derive(Debug, Error)]
pub enum KeySourceError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The document exists but `security` is not a mapping.
    #[error("unexpected layout in {0}: `security` must be a mapping")]
    Layout(PathBuf),
}

/// Somewhere an encoded key can be read from and written back to.
#[cfg_attr(test, mockall::automock)]
pub trait KeySource: Send + Sync {
    /// Read the stored key string, if any. No validation is applied.
    fn load(&self) -> Result<Option<String>, KeySourceError>;

    /// Store `encoded_key`, replacing any previous value.
    fn persist(&self, encoded_key: &str) -> Result<(), KeySourceError>;

    /// Human-readable location for log messages.
    fn describe(&self) -> String;
}

/// `security.encryption_key` inside a YAML file.
///
/// Persisting rewrites the whole document but keeps every other section.
#[derive(Debug, Clone)]
pub struct YamlKeyFile {
    path: PathBuf,
}

impl YamlKeyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_document(&self) -> Result<Value, KeySourceError> {
        if !self.path.exists() {
            return Ok(Value::Null);
        }
        let text = fs::read_to_string(&self.path).map_err(|source| KeySourceError::Io {
            path: self.path.clone(),
            source,
        })?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_yaml::from_str(&text).map_err(|source| KeySourceError::Yaml {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeySource for YamlKeyFile {
    fn load(&self) -> Result<Option<String>, KeySourceError> {
        let doc = self.read_document()?;
        Ok(doc
            .get(SECURITY_SECTION)
            .and_then(|section| section.get(KEY_FIELD))
            .and_then(Value::as_str)
            .map(str::to_owned))
    }

    fn persist(&self, encoded_key: &str) -> Result<(), KeySourceError> {
        let mut doc = self.read_document()?;
        if !doc.is_mapping() {
            doc = Value::Mapping(Mapping::new());
        }
        let root = doc
            .as_mapping_mut()
            .ok_or_else(|| KeySourceError::Layout(self.path.clone()))?;

        let section = root
            .entry(Value::from(SECURITY_SECTION))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if section.is_null() {
            *section = Value::Mapping(Mapping::new());
        }
        section
            .as_mapping_mut()
            .ok_or_else(|| KeySourceError::Layout(self.path.clone()))?
            .insert(Value::from(KEY_FIELD), Value::from(encoded_key));

        let text = serde_yaml::to_string(&doc).map_err(|source| KeySourceError::Yaml {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| KeySourceError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, text).map_err(|source| KeySourceError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = YamlKeyFile::new(dir.path().join("config.yaml"));
        assert!(source.load().unwrap().is_none());
    }

    #[test]
    fn loads_key_from_security_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "security:\n  encryption_key: abc123\n").unwrap();
        let source = YamlKeyFile::new(&path);
        assert_eq!(source.load().unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn persist_preserves_other_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "database:\n  path: data/transactions.db\nsecurity:\n  other: keep\n",
        )
        .unwrap();

        let source = YamlKeyFile::new(&path);
        source.persist("new-key").unwrap();

        let doc: Value = serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["database"]["path"].as_str(), Some("data/transactions.db"));
        assert_eq!(doc["security"]["other"].as_str(), Some("keep"));
        assert_eq!(doc["security"]["encryption_key"].as_str(), Some("new-key"));
    }

    #[test]
    fn persist_creates_file_and_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let source = YamlKeyFile::new(&path);
        source.persist("k").unwrap();
        assert_eq!(source.load().unwrap().as_deref(), Some("k"));
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "security: [unclosed\n").unwrap();
        let source = YamlKeyFile::new(&path);
        assert!(matches!(source.load(), Err(KeySourceError::Yaml { .. })));
    }

    #[test]
    fn non_mapping_security_section_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "security: just-a-string\n").unwrap();
        let source = YamlKeyFile::new(&path);
        assert!(matches!(source.persist("k"), Err(KeySourceError::Layout(_))));
    }
}

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use glob::{glob_with, MatchOptions, Pattern};
use thiserror::Error;
use tracing::{debug, warn};
use yaml_rust::{scanner::ScanError, yaml, Yaml, YamlLoader};

/// Name of the include file looked up in an assignment directory.
pub const DEFAULT_INCLUDE_FILE: &str = ".canvas-include.yml";

const ASSIGNMENT_ID: &str = "assignment_id";
const COURSE_ID: &str = "course_id";
const CANVAS_URL: &str = "canvas_url";
const FILES: &str = "files";
const API_KEY: &str = "api_key";
const ZIP: &str = "zip";

const REQUIRED_KEYS: [&str; 5] = [ASSIGNMENT_ID, COURSE_ID, CANVAS_URL, FILES, API_KEY];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("'{}' must be a directory", .0.display())]
    PathInvalid(PathBuf),

    #[error("{} does not exist", .0.display())]
    FileMissing(PathBuf),

    #[error("could not read {}: {source}", .path.display())]
    ReadError { path: PathBuf, source: io::Error },

    #[error("could not parse {}: {source}", .path.display())]
    ParseError { path: PathBuf, source: ScanError },

    #[error("{} must contain a YAML mapping", .0.display())]
    NotAMapping(PathBuf),

    #[error("provided configuration file is missing required keys: {}", .0.join(", "))]
    KeysMissing(Vec<&'static str>),

    #[error("'{key}' must be {expected}")]
    InvalidValue {
        key: &'static str,
        expected: &'static str,
    },

    #[error("unexpected type detected in {list} list: {entry}")]
    InvalidFileListEntry { list: &'static str, entry: String },

    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },
}

/// A course or assignment identifier, kept in the textual form used in API paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        ResourceId(id.to_string())
    }
}

/// A Canvas access token. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new<S: Into<String>>(key: S) -> Self {
        ApiKey(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// One entry of the `files` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileListEntry {
    /// A glob resolved against the assignment directory and uploaded as is.
    Pattern(String),
    /// Globs whose matches are meant to be archived before upload.
    ZipGroup(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub assignment_id: ResourceId,
    pub course_id: ResourceId,
    pub canvas_url: String,
    pub files: Vec<FileListEntry>,
    pub api_key: ApiKey,
}

/// Concrete paths produced by expanding the `files` list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileLists {
    pub upload: Vec<PathBuf>,
    pub zip: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub files: FileLists,
}

fn k(key: &str) -> Yaml {
    Yaml::String(key.to_string())
}

impl Config {
    /// Load the config from the specified YAML file.
    pub fn load<T: AsRef<Path>>(file: T) -> Result<Self, ConfigError> {
        let file = file.as_ref();

        /* Read the config file into memory */
        let content = fs::read_to_string(file).map_err(|source| ConfigError::ReadError {
            path: file.to_path_buf(),
            source,
        })?;

        /* Parse YAML */
        let documents =
            YamlLoader::load_from_str(&content).map_err(|source| ConfigError::ParseError {
                path: file.to_path_buf(),
                source,
            })?;

        match documents.first().and_then(Yaml::as_hash) {
            Some(root) => Config::from_yaml(root),
            None => Err(ConfigError::NotAMapping(file.to_path_buf())),
        }
    }

    /// Builds the config from the top-level mapping of an include file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::KeysMissing`] listing every required key that is absent, then
    /// [`ConfigError::InvalidValue`] or [`ConfigError::InvalidFileListEntry`] for values of the
    /// wrong shape.
    pub fn from_yaml(root: &yaml::Hash) -> Result<Self, ConfigError> {
        let missing: Vec<&'static str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| !root.contains_key(&k(key)))
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::KeysMissing(missing));
        }

        Ok(Config {
            assignment_id: resource_id(root, ASSIGNMENT_ID)?,
            course_id: resource_id(root, COURSE_ID)?,
            canvas_url: string(root, CANVAS_URL)?,
            files: file_list(root)?,
            api_key: ApiKey::new(string(root, API_KEY)?),
        })
    }

    /// Expands the `files` list against `base`.
    ///
    /// Plain patterns are expanded in order into the upload list. Only the last zip group is
    /// kept, and its patterns are expanded after every plain pattern.
    pub fn resolve_files(&self, base: &Path) -> Result<FileLists, ConfigError> {
        let mut lists = FileLists::default();
        let mut zip_patterns: &[String] = &[];

        for entry in &self.files {
            match entry {
                FileListEntry::Pattern(pattern) => lists.upload.extend(expand(base, pattern)?),
                FileListEntry::ZipGroup(patterns) => zip_patterns = patterns,
            }
        }

        for pattern in zip_patterns {
            lists.zip.extend(expand(base, pattern)?);
        }

        Ok(lists)
    }
}

fn value<'a>(root: &'a yaml::Hash, key: &'static str) -> Option<&'a Yaml> {
    root.get(&k(key))
}

fn resource_id(root: &yaml::Hash, key: &'static str) -> Result<ResourceId, ConfigError> {
    match value(root, key) {
        Some(Yaml::Integer(id)) => Ok(ResourceId(id.to_string())),
        Some(Yaml::String(id)) if !id.trim().is_empty() => Ok(ResourceId(id.trim().to_string())),
        _ => Err(ConfigError::InvalidValue {
            key,
            expected: "an integer or a string",
        }),
    }
}

fn string(root: &yaml::Hash, key: &'static str) -> Result<String, ConfigError> {
    value(root, key)
        .and_then(Yaml::as_str)
        .map(String::from)
        .ok_or(ConfigError::InvalidValue {
            key,
            expected: "a string",
        })
}

fn file_list(root: &yaml::Hash) -> Result<Vec<FileListEntry>, ConfigError> {
    value(root, FILES)
        .and_then(Yaml::as_vec)
        .ok_or(ConfigError::InvalidValue {
            key: FILES,
            expected: "a list",
        })?
        .iter()
        .map(FileListEntry::from_yaml)
        .collect()
}

fn invalid_entry(list: &'static str, entry: &Yaml) -> ConfigError {
    ConfigError::InvalidFileListEntry {
        list,
        entry: format!("{:?}", entry),
    }
}

impl FileListEntry {
    fn from_yaml(entry: &Yaml) -> Result<Self, ConfigError> {
        match entry {
            Yaml::String(pattern) => Ok(FileListEntry::Pattern(pattern.clone())),
            Yaml::Hash(group) if group.contains_key(&k(ZIP)) => {
                let patterns = group[&k(ZIP)]
                    .as_vec()
                    .ok_or_else(|| invalid_entry(ZIP, entry))?;
                patterns
                    .iter()
                    .map(|pattern| {
                        pattern
                            .as_str()
                            .map(String::from)
                            .ok_or_else(|| invalid_entry(ZIP, pattern))
                    })
                    .collect::<Result<_, _>>()
                    .map(FileListEntry::ZipGroup)
            }
            other => Err(invalid_entry(FILES, other)),
        }
    }
}

/// Expands one glob relative to `base`. Metacharacters in `base` itself match literally, and
/// wildcards never match a leading dot, so `*` leaves the include file alone.
fn expand(base: &Path, pattern: &str) -> Result<Vec<PathBuf>, ConfigError> {
    let escaped_base = Pattern::escape(&base.to_string_lossy());
    let full_pattern = Path::new(&escaped_base).join(pattern);
    let full_pattern = full_pattern.to_string_lossy();

    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    let paths: Vec<PathBuf> = glob_with(&full_pattern, options)
        .map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?
        .filter_map(Result::ok)
        .collect();

    if paths.is_empty() {
        warn!(pattern, "pattern matched no files");
    }
    Ok(paths)
}

/// Reads and validates the include file of an assignment directory.
pub struct ConfigReader {
    path: PathBuf,
    include_file: String,
}

impl ConfigReader {
    #[cfg(test)]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        ConfigReader::with_include_file(path, DEFAULT_INCLUDE_FILE)
    }

    pub fn with_include_file<P: Into<PathBuf>, S: Into<String>>(path: P, include_file: S) -> Self {
        ConfigReader {
            path: path.into(),
            include_file: include_file.into(),
        }
    }

    /// Reads the include file and resolves its file list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PathInvalid`] if the path is not a directory,
    /// [`ConfigError::FileMissing`] if the include file is absent, and any error from
    /// [`Config::load`] or [`Config::resolve_files`].
    pub fn read(&self) -> Result<LoadedConfig, ConfigError> {
        if !self.path.is_dir() {
            return Err(ConfigError::PathInvalid(self.path.clone()));
        }

        let include_file_path = self.path.join(&self.include_file);
        if !include_file_path.is_file() {
            return Err(ConfigError::FileMissing(include_file_path));
        }

        let config = Config::load(&include_file_path)?;
        let files = config.resolve_files(&self.path)?;
        debug!(
            upload = files.upload.len(),
            zip = files.zip.len(),
            "resolved {}",
            include_file_path.display()
        );

        Ok(LoadedConfig { config, files })
    }
}

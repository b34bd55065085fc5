//! Sectioned option store consumed by daemon modules.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Scalar option value.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    /// Free text.
    Text(String),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean flag.
    Boolean(bool),
}

impl SettingValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => formatter.write_str(text),
            Self::Integer(value) => write!(formatter, "{value}"),
            Self::Float(value) => write!(formatter, "{value}"),
            Self::Boolean(value) => write!(formatter, "{value}"),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// Errors raised while loading settings or reading an option.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Settings file could not be read.
    #[error("failed to read settings file '{path}': {source}")]
    Read {
        /// File that failed to load.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Settings file is not valid TOML.
    #[error("failed to parse settings file '{path}': {source}")]
    Parse {
        /// File that failed to parse.
        path: Utf8PathBuf,
        /// Parser diagnostics.
        #[source]
        source: Box<toml::de::Error>,
    },
    /// Document shape does not fit the section/option model.
    #[error("malformed settings at '{location}': {reason}")]
    Malformed {
        /// Dotted location of the offending entry.
        location: String,
        /// Description of the problem.
        reason: &'static str,
    },
    /// Requested section does not exist.
    #[error("section '{section}' not found")]
    MissingSection {
        /// Section name.
        section: String,
    },
    /// Requested option does not exist in the section.
    #[error("option '{option}' not found in section '{section}'")]
    MissingOption {
        /// Section name.
        section: String,
        /// Option name.
        option: String,
    },
    /// Stored value cannot be represented as the requested type.
    #[error("cannot convert {found} value '{value}' of {section}.{option} to {expected}")]
    Conversion {
        /// Section name.
        section: String,
        /// Option name.
        option: String,
        /// Kind of the stored value.
        found: &'static str,
        /// Stored value rendered as text.
        value: String,
        /// Requested type.
        expected: &'static str,
    },
}

/// Two-level (section, option) configuration store.
///
/// Values keep the type they were written with; the typed accessors convert
/// on read. Numeric and boolean text parses into the matching type, booleans
/// read as `0`/`1` integers and integers widen to floats. Other combinations
/// fail with [`SettingsError::Conversion`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    sections: BTreeMap<String, BTreeMap<String, SettingValue>>,
}

impl Settings {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from a TOML file made of `[section]` tables holding
    /// scalar options.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or does not fit the
    /// section/option model.
    pub fn load(path: &Utf8Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document: toml::Table =
            toml::from_str(&text).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source: Box::new(source),
            })?;
        Self::from_table(document)
    }

    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Malformed`] when the text is not valid TOML or
    /// contains values outside the section/option model.
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        let document: toml::Table = toml::from_str(text).map_err(|_| SettingsError::Malformed {
            location: String::new(),
            reason: "invalid TOML document",
        })?;
        Self::from_table(document)
    }

    fn from_table(document: toml::Table) -> Result<Self, SettingsError> {
        let mut settings = Self::new();
        for (section, value) in document {
            let toml::Value::Table(options) = value else {
                return Err(SettingsError::Malformed {
                    location: section,
                    reason: "top-level entries must be sections",
                });
            };
            for (option, value) in options {
                let converted = scalar_from_toml(value).ok_or_else(|| SettingsError::Malformed {
                    location: format!("{section}.{option}"),
                    reason: "options must be scalar values",
                })?;
                settings.set(&section, &option, converted);
            }
        }
        Ok(settings)
    }

    /// Stores `value` under `section`/`option`, replacing any previous value.
    pub fn set(&mut self, section: &str, option: &str, value: impl Into<SettingValue>) {
        self.sections
            .entry(section.to_owned())
            .or_default()
            .insert(option.to_owned(), value.into());
    }

    /// Raw value stored under `section`/`option`.
    ///
    /// # Errors
    ///
    /// Returns an error when the section or option is missing.
    pub fn value(&self, section: &str, option: &str) -> Result<&SettingValue, SettingsError> {
        let options = self
            .sections
            .get(section)
            .ok_or_else(|| SettingsError::MissingSection {
                section: section.to_owned(),
            })?;
        options
            .get(option)
            .ok_or_else(|| SettingsError::MissingOption {
                section: section.to_owned(),
                option: option.to_owned(),
            })
    }

    /// Returns `true` when the option exists.
    #[must_use]
    pub fn contains(&self, section: &str, option: &str) -> bool {
        self.value(section, option).is_ok()
    }

    /// Option rendered as text.
    ///
    /// # Errors
    ///
    /// Returns an error when the section or option is missing.
    pub fn string(&self, section: &str, option: &str) -> Result<String, SettingsError> {
        self.value(section, option).map(ToString::to_string)
    }

    /// Option read as an integer.
    ///
    /// # Errors
    ///
    /// Returns an error when the option is missing or not integral.
    pub fn integer(&self, section: &str, option: &str) -> Result<i64, SettingsError> {
        let value = self.value(section, option)?;
        match value {
            SettingValue::Integer(number) => Ok(*number),
            SettingValue::Boolean(flag) => Ok(i64::from(*flag)),
            SettingValue::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| conversion(section, option, value, "integer")),
            SettingValue::Float(_) => Err(conversion(section, option, value, "integer")),
        }
    }

    /// Option read as a boolean.
    ///
    /// # Errors
    ///
    /// Returns an error when the option is missing or not a boolean.
    pub fn boolean(&self, section: &str, option: &str) -> Result<bool, SettingsError> {
        let value = self.value(section, option)?;
        match value {
            SettingValue::Boolean(flag) => Ok(*flag),
            SettingValue::Text(text) => {
                parse_bool(text.trim()).ok_or_else(|| conversion(section, option, value, "boolean"))
            }
            SettingValue::Integer(_) | SettingValue::Float(_) => {
                Err(conversion(section, option, value, "boolean"))
            }
        }
    }

    /// Option read as a float.
    ///
    /// # Errors
    ///
    /// Returns an error when the option is missing or not numeric.
    pub fn float(&self, section: &str, option: &str) -> Result<f64, SettingsError> {
        let value = self.value(section, option)?;
        match value {
            SettingValue::Float(number) => Ok(*number),
            SettingValue::Integer(number) => Ok(*number as f64),
            SettingValue::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| conversion(section, option, value, "float")),
            SettingValue::Boolean(_) => Err(conversion(section, option, value, "float")),
        }
    }

    /// Like [`Settings::string`] but falls back to `default` when the option
    /// is absent.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other `*_or` accessors.
    pub fn string_or(
        &self,
        section: &str,
        option: &str,
        default: &str,
    ) -> Result<String, SettingsError> {
        or_default(self.string(section, option), || default.to_owned())
    }

    /// Like [`Settings::integer`] but falls back to `default` when the option
    /// is absent.
    ///
    /// # Errors
    ///
    /// Returns an error when the option exists but is not integral.
    pub fn integer_or(&self, section: &str, option: &str, default: i64) -> Result<i64, SettingsError> {
        or_default(self.integer(section, option), || default)
    }

    /// Like [`Settings::boolean`] but falls back to `default` when the option
    /// is absent.
    ///
    /// # Errors
    ///
    /// Returns an error when the option exists but is not a boolean.
    pub fn boolean_or(
        &self,
        section: &str,
        option: &str,
        default: bool,
    ) -> Result<bool, SettingsError> {
        or_default(self.boolean(section, option), || default)
    }

    /// Like [`Settings::float`] but falls back to `default` when the option
    /// is absent.
    ///
    /// # Errors
    ///
    /// Returns an error when the option exists but is not numeric.
    pub fn float_or(&self, section: &str, option: &str, default: f64) -> Result<f64, SettingsError> {
        or_default(self.float(section, option), || default)
    }

    /// Overlays `other` onto `self`; options present in `other` win.
    pub fn merge(&mut self, other: &Self) {
        for (section, options) in &other.sections {
            let target = self.sections.entry(section.clone()).or_default();
            for (option, value) in options {
                target.insert(option.clone(), value.clone());
            }
        }
    }

    /// Returns a new store combining `layers` in order, later layers winning.
    #[must_use]
    pub fn merged<'a>(layers: impl IntoIterator<Item = &'a Self>) -> Self {
        layers.into_iter().fold(Self::new(), |mut acc, layer| {
            acc.merge(layer);
            acc
        })
    }

    /// Returns `true` when no option is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.values().all(BTreeMap::is_empty)
    }

    /// Section names in sorted order.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }
}

fn or_default<T>(
    result: Result<T, SettingsError>,
    default: impl FnOnce() -> T,
) -> Result<T, SettingsError> {
    match result {
        Err(SettingsError::MissingSection { .. } | SettingsError::MissingOption { .. }) => {
            Ok(default())
        }
        other => other,
    }
}

fn conversion(
    section: &str,
    option: &str,
    value: &SettingValue,
    expected: &'static str,
) -> SettingsError {
    SettingsError::Conversion {
        section: section.to_owned(),
        option: option.to_owned(),
        found: value.kind(),
        value: value.to_string(),
        expected,
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "true" | "TRUE" | "True" | "yes" | "on" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn scalar_from_toml(value: toml::Value) -> Option<SettingValue> {
    match value {
        toml::Value::String(text) => Some(SettingValue::Text(text)),
        toml::Value::Integer(number) => Some(SettingValue::Integer(number)),
        toml::Value::Float(number) => Some(SettingValue::Float(number)),
        toml::Value::Boolean(flag) => Some(SettingValue::Boolean(flag)),
        toml::Value::Datetime(stamp) => Some(SettingValue::Text(stamp.to_string())),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn settings() -> Settings {
        Settings::from_toml_str(
            r#"
            [database]
            name = "shop"
            port = "5432"
            retries = 3
            ratio = 0.5
            verbose = "yes"
            cached = true
            "#,
        )
        .expect("parse settings")
    }

    #[rstest]
    fn reads_typed_values(settings: Settings) {
        assert_eq!(settings.string("database", "name").expect("name"), "shop");
        assert_eq!(settings.integer("database", "port").expect("port"), 5432);
        assert_eq!(settings.integer("database", "cached").expect("cached"), 1);
        assert!(settings.boolean("database", "verbose").expect("verbose"));
        assert!((settings.float("database", "retries").expect("retries") - 3.0).abs() < f64::EPSILON);
        assert_eq!(settings.string("database", "ratio").expect("ratio"), "0.5");
    }

    #[rstest]
    fn missing_lookups_name_the_scope(settings: Settings) {
        assert!(matches!(
            settings.string("cache", "backend"),
            Err(SettingsError::MissingSection { .. })
        ));
        assert!(matches!(
            settings.string("database", "user"),
            Err(SettingsError::MissingOption { .. })
        ));
    }

    #[rstest]
    fn conversion_failures_are_reported(settings: Settings) {
        let error = settings
            .integer("database", "name")
            .expect_err("text is not integral");
        assert!(matches!(error, SettingsError::Conversion { expected: "integer", .. }));
    }

    #[rstest]
    fn fallbacks_apply_only_to_missing_options(settings: Settings) {
        assert_eq!(settings.integer_or("cache", "capacity", 128).expect("default"), 128);
        assert!(settings.integer_or("database", "name", 1).is_err());
    }

    #[rstest]
    fn merge_overrides_per_option(settings: Settings) {
        let mut overlay = Settings::new();
        overlay.set("database", "name", "analytics");
        overlay.set("cache", "backend", "memory");

        let merged = Settings::merged([&settings, &overlay]);

        assert_eq!(merged.string("database", "name").expect("name"), "analytics");
        assert_eq!(merged.integer("database", "retries").expect("kept"), 3);
        assert_eq!(merged.string("cache", "backend").expect("added"), "memory");
    }

    #[rstest]
    #[case("name = \"top-level\"")]
    #[case("[section]\nlist = [1, 2]")]
    #[case("not toml at all [")]
    fn rejects_documents_outside_the_model(#[case] text: &str) {
        assert!(matches!(
            Settings::from_toml_str(text),
            Err(SettingsError::Malformed { .. })
        ));
    }

    #[rstest]
    fn load_reports_missing_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("absent.toml")).expect("utf8 path");
        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::Read { .. })
        ));
    }
}

//! Case-insensitive key/value layers merged during resolution.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use camino::Utf8Path;
use serde::de::{self, Deserialize, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde_json::Value;

use crate::error::ConfigError;

/// Keys whose zero-prefixed integers are written in octal, as in `umask: 022`.
const LEGACY_OCTAL_KEYS: &[&str] = &["umask"];

/// A single configuration source.
///
/// Keys are folded to lower case on insertion, so lookups and merges never
/// depend on the casing chosen by the configuration author. Values keep their
/// structured form until the merged layers are validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigLayer {
    values: BTreeMap<String, Value>,
}

impl ConfigLayer {
    /// Creates an empty layer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the layer with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets `key` to `value`, replacing any previous entry regardless of case.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_lowercase(), value.into());
    }

    /// Looks up a key case-insensitively.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&key.to_lowercase())
    }

    /// Number of keys in the layer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the layer holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parses a YAML mapping into a layer.
    ///
    /// An empty document yields an empty layer. Any other document that is not
    /// a mapping is rejected. Zero-prefixed integers under [`LEGACY_OCTAL_KEYS`]
    /// keep their digits as text so they resolve as octal.
    pub fn from_yaml_str(origin: &Utf8Path, content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::new());
        }
        let parsed: BTreeMap<String, Value> =
            serde_saphyr::from_str(content).map_err(|error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: error.to_string(),
            })?;
        let mut layer = Self::new();
        for (key, value) in parsed {
            layer.insert(&key, value);
        }
        for (key, digits) in legacy_octal_scalars(content) {
            layer.insert(&key, digits);
        }
        Ok(layer)
    }

    /// Reads and parses the YAML document at `path`.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(path, &content)
    }

    /// Overlays `other` onto this layer; keys present in `other` win.
    pub fn merge(&mut self, other: &Self) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    #[must_use]
    pub(crate) fn into_object(self) -> serde_json::Map<String, Value> {
        self.values.into_iter().collect()
    }
}

/// Verbatim text of zero-prefixed integer scalars under [`LEGACY_OCTAL_KEYS`].
fn legacy_octal_scalars(content: &str) -> Vec<(String, String)> {
    serde_saphyr::from_str::<LegacyOctal>(content)
        .map(|found| found.0)
        .unwrap_or_default()
        .into_iter()
        .filter(|(_, digits)| {
            digits.len() > 1
                && digits.starts_with('0')
                && digits.bytes().all(|byte| byte.is_ascii_digit())
        })
        .collect()
}

struct LegacyOctal(Vec<(String, String)>);

impl<'de> Deserialize<'de> for LegacyOctal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(LegacyOctalVisitor)
    }
}

struct LegacyOctalVisitor;

impl<'de> Visitor<'de> for LegacyOctalVisitor {
    type Value = LegacyOctal;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a mapping")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut found = Vec::new();
        while let Some(raw_key) = map.next_key::<String>()? {
            let key = raw_key.to_lowercase();
            if LEGACY_OCTAL_KEYS.contains(&key.as_str()) {
                if let Verbatim(Some(text)) = map.next_value()? {
                    found.push((key, text));
                }
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(LegacyOctal(found))
    }
}

/// A scalar read as its source text; non-text forms are dropped.
struct Verbatim(Option<String>);

impl<'de> Deserialize<'de> for Verbatim {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_string(VerbatimVisitor)
    }
}

struct VerbatimVisitor;

impl Visitor<'_> for VerbatimVisitor {
    type Value = Verbatim;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a scalar")
    }

    fn visit_str<E: de::Error>(self, text: &str) -> Result<Self::Value, E> {
        Ok(Verbatim(Some(text.to_owned())))
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> {
        Ok(Verbatim(None))
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> {
        Ok(Verbatim(None))
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> {
        Ok(Verbatim(None))
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
        Ok(Verbatim(None))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Verbatim(None))
    }
}

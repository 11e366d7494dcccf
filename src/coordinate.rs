//! Dependency coordinates
//!
//! A [`Coordinate`] is what a caller asks for. A [`CoordinateKey`] is its
//! canonical, immutable form: fields trimmed, extension defaulted, and every
//! segment checked so it can be used safely as a path component.

use crate::error::{GrabError, GrabResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Extension used when a coordinate does not name one
pub const DEFAULT_EXTENSION: &str = "jar";

/// A caller-supplied dependency request, not yet canonicalized
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinate {
    pub group: String,
    pub module: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "ext")]
    pub extension: Option<String>,
}

impl Coordinate {
    /// Create a coordinate for the default extension and no classifier
    pub fn new(
        group: impl Into<String>,
        module: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            module: module.into(),
            version: version.into(),
            classifier: None,
            extension: None,
        }
    }

    /// Set the classifier
    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    /// Set the extension
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }
}

impl FromStr for Coordinate {
    type Err = GrabError;

    /// Parse `group:module:version[:classifier][@ext]`
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| GrabError::InvalidCoordinate {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (body, extension) = match input.rsplit_once('@') {
            Some((body, ext)) => (body, Some(ext.to_string())),
            None => (input, None),
        };

        let parts: Vec<&str> = body.split(':').collect();
        let (group, module, version, classifier) = match parts.as_slice() {
            [g, m, v] => (*g, *m, *v, None),
            [g, m, v, c] => (*g, *m, *v, Some((*c).to_string())),
            _ => return Err(invalid("expected group:module:version[:classifier][@ext]")),
        };

        Ok(Self {
            group: group.to_string(),
            module: module.to_string(),
            version: version.to_string(),
            classifier,
            extension,
        })
    }
}

/// Canonical identity of a dependency artifact
///
/// Equality and hashing are structural over all five fields. No version
/// normalization is applied beyond trimming whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoordinateKey {
    group: String,
    module: String,
    version: String,
    classifier: Option<String>,
    extension: String,
}

impl CoordinateKey {
    /// Canonicalize a caller coordinate
    pub fn canonicalize(coordinate: &Coordinate) -> GrabResult<Self> {
        let raw = format!(
            "{}:{}:{}",
            coordinate.group, coordinate.module, coordinate.version
        );

        let group = required_segment(&raw, "group", &coordinate.group)?;
        let module = required_segment(&raw, "module", &coordinate.module)?;
        let version = required_segment(&raw, "version", &coordinate.version)?;

        let classifier = match coordinate.classifier.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(c) => Some(required_segment(&raw, "classifier", c)?),
        };

        let extension = match coordinate.extension.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_EXTENSION.to_string(),
            Some(e) => required_segment(&raw, "extension", e)?,
        };

        // `{file}.meta.json` sidecars must never be mistaken for a `json` artifact
        for (field, value) in [("version", Some(&version)), ("classifier", classifier.as_ref())] {
            if value.is_some_and(|v| v.ends_with(".meta")) {
                return Err(GrabError::InvalidCoordinate {
                    input: raw.clone(),
                    reason: format!("{} must not end with '.meta'", field),
                });
            }
        }

        Ok(Self {
            group,
            module,
            version,
            classifier,
            extension,
        })
    }

    /// Parse and canonicalize shorthand notation in one step
    pub fn parse(input: &str) -> GrabResult<Self> {
        Self::canonicalize(&input.parse::<Coordinate>()?)
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn classifier(&self) -> Option<&str> {
        self.classifier.as_deref()
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// File name of the artifact: `{module}-{version}[-{classifier}].{ext}`
    pub fn file_name(&self) -> String {
        match &self.classifier {
            Some(c) => format!("{}-{}-{}.{}", self.module, self.version, c, self.extension),
            None => format!("{}-{}.{}", self.module, self.version, self.extension),
        }
    }

    /// File name inside the cache: `{module}-{version}[@{classifier}].{ext}`
    ///
    /// Fields never contain `@`, so every key gets its own name. A hyphen
    /// would let `1.0` with classifier `sources` meet version `1.0-sources`.
    pub fn cache_file_name(&self) -> String {
        match &self.classifier {
            Some(c) => format!("{}-{}@{}.{}", self.module, self.version, c, self.extension),
            None => format!("{}-{}.{}", self.module, self.version, self.extension),
        }
    }

    /// Cache-relative path: `{group}/{module}/{ext}s/{cache_file_name}`
    pub fn cache_path(&self) -> PathBuf {
        PathBuf::from(&self.group)
            .join(&self.module)
            .join(format!("{}s", self.extension))
            .join(self.cache_file_name())
    }

    /// Maven repository path: `{group as dirs}/{module}/{version}/{file_name}`
    pub fn repository_path(&self) -> PathBuf {
        let mut path = PathBuf::new();
        for part in self.group.split('.') {
            path.push(part);
        }
        path.join(&self.module)
            .join(&self.version)
            .join(self.file_name())
    }

    /// Deterministic name of the lock file guarding this key
    ///
    /// Derived from the cache path, so whatever shares a file shares a lock.
    pub fn lock_file_name(&self) -> String {
        let digest = Sha256::digest(self.cache_path().to_string_lossy().as_bytes());
        format!("{}.lock", hex::encode(&digest[..16]))
    }
}

impl fmt::Display for CoordinateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.module, self.version)?;
        if let Some(ref c) = self.classifier {
            write!(f, ":{}", c)?;
        }
        write!(f, "@{}", self.extension)
    }
}

impl TryFrom<&Coordinate> for CoordinateKey {
    type Error = GrabError;

    fn try_from(coordinate: &Coordinate) -> Result<Self, Self::Error> {
        Self::canonicalize(coordinate)
    }
}

/// Trim a segment and make sure it is a safe single path component
fn required_segment(raw: &str, field: &str, value: &str) -> GrabResult<String> {
    let value = value.trim();
    let invalid = |reason: String| GrabError::InvalidCoordinate {
        input: raw.to_string(),
        reason,
    };

    if value.is_empty() {
        return Err(invalid(format!("{} cannot be empty", field)));
    }
    if value.contains('/')
        || value.contains('\\')
        || value.contains("..")
        || value.contains('\0')
        || value.contains(':')
        || value.contains('@')
    {
        return Err(invalid(format!(
            "{} '{}' must not contain path separators, '..', ':' or '@'",
            field, value
        )));
    }
    if value.starts_with('.') {
        return Err(invalid(format!("{} '{}' must not start with '.'", field, value)));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn parse_shorthand() {
        let key = CoordinateKey::parse("com.example:widget:1.0").unwrap();
        assert_eq!(key.group(), "com.example");
        assert_eq!(key.module(), "widget");
        assert_eq!(key.version(), "1.0");
        assert_eq!(key.classifier(), None);
        assert_eq!(key.extension(), "jar");
    }

    #[test]
    fn parse_classifier_and_extension() {
        let key = CoordinateKey::parse("com.example:widget:1.0:sources@zip").unwrap();
        assert_eq!(key.classifier(), Some("sources"));
        assert_eq!(key.extension(), "zip");
        assert_eq!(key.to_string(), "com.example:widget:1.0:sources@zip");
    }

    #[test]
    fn parse_rejects_wrong_arity() {
        assert!(CoordinateKey::parse("com.example:widget").is_err());
        assert!(CoordinateKey::parse("a:b:c:d:e").is_err());
    }

    #[test]
    fn canonicalize_trims_fields() {
        let coord = Coordinate::new(" com.example ", "widget ", " 1.0");
        let key = CoordinateKey::canonicalize(&coord).unwrap();
        assert_eq!(key, CoordinateKey::parse("com.example:widget:1.0").unwrap());
    }

    #[test]
    fn canonicalize_blank_classifier_is_none() {
        let coord = Coordinate::new("g", "m", "1").with_classifier("  ");
        let key = CoordinateKey::canonicalize(&coord).unwrap();
        assert_eq!(key.classifier(), None);
    }

    #[test]
    fn versions_are_not_normalized() {
        let a = CoordinateKey::parse("g:m:1.0").unwrap();
        let b = CoordinateKey::parse("g:m:1.0.0").unwrap();
        assert_ne!(a, b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn rejects_path_traversal() {
        for bad in ["../etc", "a/b", "a\\b", ".hidden"] {
            let coord = Coordinate::new(bad, "m", "1");
            assert!(CoordinateKey::canonicalize(&coord).is_err(), "{}", bad);
        }
        assert!(CoordinateKey::canonicalize(&Coordinate::new("g", "", "1")).is_err());
    }

    #[test]
    fn cache_path_layout() {
        let key = CoordinateKey::parse("com.google.guava:guava:10.0").unwrap();
        assert_eq!(
            key.cache_path(),
            PathBuf::from("com.google.guava/guava/jars/guava-10.0.jar")
        );
    }

    #[test]
    fn classified_path_is_distinct_from_hyphenated_version() {
        let classified = CoordinateKey::canonicalize(
            &Coordinate::new("com.example", "widget", "1.0").with_classifier("sources"),
        )
        .unwrap();
        let hyphenated =
            CoordinateKey::canonicalize(&Coordinate::new("com.example", "widget", "1.0-sources"))
                .unwrap();

        assert_eq!(
            classified.cache_path(),
            PathBuf::from("com.example/widget/jars/widget-1.0@sources.jar")
        );
        assert_eq!(
            hyphenated.cache_path(),
            PathBuf::from("com.example/widget/jars/widget-1.0-sources.jar")
        );
        assert_ne!(classified.lock_file_name(), hyphenated.lock_file_name());
    }

    #[test]
    fn rejects_metadata_lookalikes() {
        assert!(CoordinateKey::parse("g:m:1.0.json.meta@json").is_err());
        assert!(CoordinateKey::parse("g:m:1.0:x.meta").is_err());
        assert!(CoordinateKey::parse("g:m:1.0:metadata").is_ok());
    }

    #[test]
    fn repository_path_layout() {
        let key = CoordinateKey::parse("com.google.guava:guava:10.0:tests").unwrap();
        assert_eq!(
            key.repository_path(),
            PathBuf::from("com/google/guava/guava/10.0/guava-10.0-tests.jar")
        );
    }

    #[test]
    fn lock_file_name_is_deterministic_and_distinct() {
        let a = CoordinateKey::parse("g:m:1.0").unwrap();
        let b = CoordinateKey::parse("g:m:1.1").unwrap();
        assert_eq!(a.lock_file_name(), a.clone().lock_file_name());
        assert_ne!(a.lock_file_name(), b.lock_file_name());
        assert!(a.lock_file_name().ends_with(".lock"));
    }
}

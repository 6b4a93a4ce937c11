//! Artifact references: image repositories, tags and version labels.
//!
//! A published artifact is identified by a repository plus an immutable
//! version label taken from the source revision. Each publish also moves the
//! floating `latest` tag, which is never accepted as a version label.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::LATEST_TAG;

/// Maximum length of an OCI tag
const MAX_TAG_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    #[error("Invalid version label '{label}': {reason}")]
    InvalidLabel { label: String, reason: String },

    #[error("Invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },
}

/// Immutable image tag derived from a source revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionLabel(String);

impl VersionLabel {
    /// Validate a label against the OCI tag grammar.
    ///
    /// `latest` is rejected: a version label must name exactly one snapshot.
    pub fn new(label: impl Into<String>) -> Result<Self, ArtifactError> {
        let label = label.into();
        validate_tag(&label).map_err(|reason| ArtifactError::InvalidLabel {
            label: label.clone(),
            reason,
        })?;
        if label == LATEST_TAG {
            return Err(ArtifactError::InvalidLabel {
                label,
                reason: "the floating tag cannot be used as a version label".to_string(),
            });
        }
        Ok(Self(label))
    }

    /// Build a label from a source revision, optionally truncated.
    pub fn from_revision(revision: &str, max_len: Option<usize>) -> Result<Self, ArtifactError> {
        let revision = revision.trim();
        let label = match max_len {
            Some(len) => revision.chars().take(len).collect(),
            None => revision.to_string(),
        };
        Self::new(label)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VersionLabel {
    type Error = ArtifactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VersionLabel> for String {
    fn from(label: VersionLabel) -> Self {
        label.0
    }
}

/// A tagged container image reference, e.g. `mateoclima/hello-app:abc123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    repository: String,
    tag: String,
}

impl ImageRef {
    /// Parse `repository:tag`.
    ///
    /// The tag separator is the last `:` after the last `/`, so registry
    /// hosts with ports (`localhost:5000/app:v1`) parse correctly. Digest
    /// references and untagged references are rejected.
    pub fn parse(reference: &str) -> Result<Self, ArtifactError> {
        let invalid = |reason: &str| ArtifactError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.contains('@') {
            return Err(invalid("digest references are not supported"));
        }

        let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match reference[name_start..].rfind(':') {
            Some(i) => (
                &reference[..name_start + i],
                &reference[name_start + i + 1..],
            ),
            None => return Err(invalid("missing tag")),
        };

        validate_repository(name).map_err(|reason| invalid(&reason))?;
        validate_tag(tag).map_err(|reason| invalid(&reason))?;

        Ok(Self {
            repository: name.to_string(),
            tag: tag.to_string(),
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Same repository, different tag.
    pub fn with_tag(&self, tag: &str) -> Result<Self, ArtifactError> {
        Self::parse(&format!("{}:{}", self.repository, tag))
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = ArtifactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(image: ImageRef) -> Self {
        image.to_string()
    }
}

/// A revision-specific artifact: repository plus version label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub repository: String,
    pub label: VersionLabel,
}

impl ArtifactRef {
    pub fn new(repository: impl Into<String>, label: VersionLabel) -> Result<Self, ArtifactError> {
        let artifact = Self {
            repository: repository.into(),
            label,
        };
        // Validates the repository half
        artifact.image()?;
        Ok(artifact)
    }

    /// The immutable, revision-specific tag.
    pub fn image(&self) -> Result<ImageRef, ArtifactError> {
        ImageRef::parse(&format!("{}:{}", self.repository, self.label))
    }

    /// The floating tag moved by every publish.
    pub fn latest(&self) -> Result<ImageRef, ArtifactError> {
        self.image()?.with_tag(LATEST_TAG)
    }

    /// Tags to push for this artifact, revision-specific first.
    pub fn tags(&self) -> Result<Vec<ImageRef>, ArtifactError> {
        Ok(vec![self.image()?, self.latest()?])
    }
}

fn validate_tag(tag: &str) -> Result<(), String> {
    if tag.is_empty() {
        return Err("tag is empty".to_string());
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(format!("tag is longer than {} characters", MAX_TAG_LEN));
    }
    let mut chars = tag.chars();
    let first = chars.next().unwrap_or_default();
    if !(first.is_ascii_alphanumeric() || first == '_') {
        return Err("tag must start with a letter, digit or underscore".to_string());
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
        return Err("tag may only contain letters, digits, '_', '.' and '-'".to_string());
    }
    Ok(())
}

fn validate_repository(repository: &str) -> Result<(), String> {
    if repository.is_empty() {
        return Err("repository is empty".to_string());
    }

    let components: Vec<&str> = repository.split('/').collect();
    for (i, component) in components.iter().enumerate() {
        let is_host = i == 0 && components.len() > 1 && looks_like_host(component);
        let valid = if is_host {
            valid_host(component)
        } else {
            valid_path_component(component)
        };
        if !valid {
            return Err(format!("invalid repository component '{}'", component));
        }
    }
    Ok(())
}

fn looks_like_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn valid_host(component: &str) -> bool {
    let (host, port) = match component.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (component, None),
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'));
    let port_ok = port.map_or(true, |p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    host_ok && port_ok
}

fn valid_path_component(component: &str) -> bool {
    let starts_and_ends_alnum = component
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && component
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    starts_and_ends_alnum
        && component
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_reference() {
        let image = ImageRef::parse("mateoclima/hello-app:abc123").unwrap();
        assert_eq!(image.repository(), "mateoclima/hello-app");
        assert_eq!(image.tag(), "abc123");
        assert_eq!(image.to_string(), "mateoclima/hello-app:abc123");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let image = ImageRef::parse("localhost:5000/team/app:v1.2").unwrap();
        assert_eq!(image.repository(), "localhost:5000/team/app");
        assert_eq!(image.tag(), "v1.2");
    }

    #[test]
    fn test_parse_registry_host() {
        let image = ImageRef::parse("ghcr.io/mateoclima/hello-app:latest").unwrap();
        assert_eq!(image.repository(), "ghcr.io/mateoclima/hello-app");
    }

    #[test]
    fn test_parse_rejects_untagged() {
        assert!(ImageRef::parse("mateoclima/hello-app").is_err());
        // Port alone is not a tag
        assert!(ImageRef::parse("localhost:5000/app").is_err());
    }

    #[test]
    fn test_parse_rejects_digest() {
        assert!(ImageRef::parse("app@sha256:0123456789abcdef").is_err());
    }

    #[test]
    fn test_parse_rejects_uppercase_path() {
        assert!(ImageRef::parse("Mateoclima/hello-app:v1").is_err());
    }

    #[test]
    fn test_parse_rejects_double_tag() {
        assert!(ImageRef::parse("mateoclima/hello-app:v1:latest").is_err());
    }

    #[test]
    fn test_with_tag_keeps_repository() {
        let image = ImageRef::parse("mateolima/hello-app:1759098837").unwrap();
        let retagged = image.with_tag("abc123").unwrap();
        assert_eq!(retagged.to_string(), "mateolima/hello-app:abc123");
    }

    #[test]
    fn test_version_label_rejects_latest() {
        let err = VersionLabel::new("latest").unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidLabel { .. }));
    }

    #[test]
    fn test_version_label_rejects_bad_characters() {
        assert!(VersionLabel::new("").is_err());
        assert!(VersionLabel::new("-leading-dash").is_err());
        assert!(VersionLabel::new("has/slash").is_err());
        assert!(VersionLabel::new("a".repeat(129)).is_err());
    }

    #[test]
    fn test_version_label_from_revision_truncates() {
        let sha = "3f2c9a1b7e5d4c3b2a1f0e9d8c7b6a5f4e3d2c1b";
        assert_eq!(VersionLabel::from_revision(sha, None).unwrap().as_str(), sha);
        assert_eq!(
            VersionLabel::from_revision(sha, Some(7)).unwrap().as_str(),
            "3f2c9a1"
        );
    }

    #[test]
    fn test_distinct_revisions_give_distinct_tags() {
        let a = ArtifactRef::new("mateoclima/hello-app", VersionLabel::new("aaa111").unwrap())
            .unwrap();
        let b = ArtifactRef::new("mateoclima/hello-app", VersionLabel::new("bbb222").unwrap())
            .unwrap();
        assert_ne!(a.image().unwrap(), b.image().unwrap());
        assert_eq!(a.latest().unwrap(), b.latest().unwrap());
    }

    #[test]
    fn test_artifact_tags() {
        let artifact =
            ArtifactRef::new("mateoclima/hello-app", VersionLabel::new("abc123").unwrap()).unwrap();
        let tags: Vec<String> = artifact
            .tags()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            tags,
            vec!["mateoclima/hello-app:abc123", "mateoclima/hello-app:latest"]
        );
        assert_eq!(artifact.latest().unwrap().repository(), "mateoclima/hello-app");
    }

    #[test]
    fn test_artifact_rejects_invalid_repository() {
        let label = VersionLabel::new("abc123").unwrap();
        assert!(ArtifactRef::new("Not A Repo", label).is_err());
    }

    #[test]
    fn test_serde_roundtrip_through_string() {
        let image: ImageRef = serde_json::from_str("\"mateoclima/hello-app:abc123\"").unwrap();
        assert_eq!(image.tag(), "abc123");
        assert!(serde_json::from_str::<VersionLabel>("\"latest\"").is_err());
    }
}

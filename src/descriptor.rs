//! Deployment descriptor parsing and single-field image rewrite.
//!
//! The descriptor is parsed into structured YAML to locate the image field by
//! its schema path (`spec.template.spec.containers[*].image`). The rewrite then
//! edits only the value span of the one matching `image:` line so the rest of
//! the file (comments, key order, indentation, line endings) stays
//! byte-identical, and the result is re-parsed and compared structurally
//! before it is returned. Anything ambiguous fails closed.

use serde::Deserialize;
use serde_yaml::Value;

use crate::artifact::{ArtifactError, ImageRef};

/// Workload kinds whose pod template carries the container image
const WORKLOAD_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet"];

/// Container lists inside a pod spec that may carry an image
const CONTAINER_LISTS: &[&str] = &["containers", "initContainers"];

/// Accepted spellings of the image key at the start of a line
const IMAGE_KEYS: &[&str] = &["image:", "\"image\":", "'image':"];

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Failed to parse descriptor: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Descriptor names no container image")]
    NoImage,

    #[error("Descriptor names {0} container images, expected exactly one")]
    AmbiguousImage(usize),

    #[error("Descriptor has {0} 'image:' lines, expected exactly one")]
    ImageLineCount(usize),

    #[error("The 'image:' line does not hold the parsed image '{expected}' (found '{found}')")]
    LineMismatch { expected: String, found: String },

    #[error("Invalid image in descriptor: {0}")]
    InvalidImage(#[from] ArtifactError),

    #[error("Rewritten descriptor failed verification: {0}")]
    VerificationFailed(String),
}

/// Location of the image field inside the parsed documents.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ImageSite {
    document: usize,
    list: &'static str,
    index: usize,
    value: String,
}

/// Byte span of the image value, inside any quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ImageLine {
    start: usize,
    end: usize,
}

/// A parsed deployment descriptor that names exactly one image.
#[derive(Debug, Clone)]
pub struct DeploymentDescriptor {
    text: String,
    documents: Vec<Value>,
    site: ImageSite,
}

impl DeploymentDescriptor {
    /// Parse descriptor text (one or more YAML documents).
    ///
    /// Fails unless exactly one container image is declared across all
    /// workload documents.
    pub fn parse(text: impl Into<String>) -> Result<Self, DescriptorError> {
        let text = text.into();
        let documents = parse_documents(&text)?;
        let site = single_site(&documents)?;
        Ok(Self {
            text,
            documents,
            site,
        })
    }

    /// The image value exactly as written.
    pub fn current_image(&self) -> &str {
        &self.site.value
    }

    /// The artifact reference the descriptor names.
    pub fn image(&self) -> Result<ImageRef, DescriptorError> {
        Ok(ImageRef::parse(&self.site.value)?)
    }

    /// Desired replica count of the workload holding the image.
    pub fn replicas(&self) -> Option<u64> {
        self.documents[self.site.document]
            .get("spec")?
            .get("replicas")?
            .as_u64()
    }

    /// First container port declared by the container holding the image.
    pub fn container_port(&self) -> Option<u16> {
        let port = self.container()?.get("ports")?.get(0)?.get("containerPort")?;
        port.as_u64().and_then(|p| u16::try_from(p).ok())
    }

    fn container(&self) -> Option<&Value> {
        pod_spec(&self.documents[self.site.document])?
            .get(self.site.list)?
            .get(self.site.index)
    }

    /// Return the descriptor text with the image field set to `image`.
    ///
    /// Only the value on the single `image:` line changes. Rewriting to the
    /// image already present returns the text unchanged.
    pub fn with_image(&self, image: &ImageRef) -> Result<String, DescriptorError> {
        let target = image.to_string();
        if self.site.value == target {
            return Ok(self.text.clone());
        }

        let lines = find_image_lines(&self.text);
        let line = match lines.as_slice() {
            [line] => *line,
            _ => return Err(DescriptorError::ImageLineCount(lines.len())),
        };

        let found = &self.text[line.start..line.end];
        if found != self.site.value {
            return Err(DescriptorError::LineMismatch {
                expected: self.site.value.clone(),
                found: found.to_string(),
            });
        }

        let mut rewritten = String::with_capacity(self.text.len() + target.len());
        rewritten.push_str(&self.text[..line.start]);
        rewritten.push_str(&target);
        rewritten.push_str(&self.text[line.end..]);

        self.verify(&rewritten, &target)?;
        Ok(rewritten)
    }

    /// Re-parse the rewritten text and require that the image field is the
    /// only structural difference.
    fn verify(&self, rewritten: &str, target: &str) -> Result<(), DescriptorError> {
        let reparsed = parse_documents(rewritten)
            .map_err(|e| DescriptorError::VerificationFailed(e.to_string()))?;
        let site = single_site(&reparsed)
            .map_err(|e| DescriptorError::VerificationFailed(e.to_string()))?;
        if site.value != target {
            return Err(DescriptorError::VerificationFailed(format!(
                "image reads back as '{}'",
                site.value
            )));
        }

        let mut expected = self.documents.clone();
        let field = pod_spec_mut(&mut expected[self.site.document])
            .and_then(|spec| spec.get_mut(self.site.list))
            .and_then(|list| list.get_mut(self.site.index))
            .and_then(|container| container.get_mut("image"))
            .ok_or_else(|| {
                DescriptorError::VerificationFailed("image field disappeared".to_string())
            })?;
        *field = Value::String(target.to_string());

        if expected != reparsed {
            return Err(DescriptorError::VerificationFailed(
                "fields other than the image changed".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_documents(text: &str) -> Result<Vec<Value>, serde_yaml::Error> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document)?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

fn is_workload(document: &Value) -> bool {
    document
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| WORKLOAD_KINDS.contains(&kind))
}

fn pod_spec(document: &Value) -> Option<&Value> {
    document.get("spec")?.get("template")?.get("spec")
}

fn pod_spec_mut(document: &mut Value) -> Option<&mut Value> {
    document.get_mut("spec")?.get_mut("template")?.get_mut("spec")
}

fn image_sites(documents: &[Value]) -> Vec<ImageSite> {
    let mut sites = Vec::new();
    for (document, value) in documents.iter().enumerate() {
        if !is_workload(value) {
            continue;
        }
        let Some(spec) = pod_spec(value) else {
            continue;
        };
        for &list in CONTAINER_LISTS {
            let Some(containers) = spec.get(list).and_then(Value::as_sequence) else {
                continue;
            };
            for (index, container) in containers.iter().enumerate() {
                if let Some(image) = container.get("image").and_then(Value::as_str) {
                    sites.push(ImageSite {
                        document,
                        list,
                        index,
                        value: image.to_string(),
                    });
                }
            }
        }
    }
    sites
}

fn single_site(documents: &[Value]) -> Result<ImageSite, DescriptorError> {
    let mut sites = image_sites(documents);
    match sites.len() {
        0 => Err(DescriptorError::NoImage),
        1 => Ok(sites.remove(0)),
        n => Err(DescriptorError::AmbiguousImage(n)),
    }
}

/// Every line whose key is `image`, with the byte span of its value.
fn find_image_lines(text: &str) -> Vec<ImageLine> {
    let mut found = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some(image_line) = scan_image_line(line) {
            found.push(ImageLine {
                start: offset + image_line.start,
                end: offset + image_line.end,
            });
        }
        offset += line.len();
    }
    found
}

fn scan_image_line(line: &str) -> Option<ImageLine> {
    let content = line.trim_end_matches(['\n', '\r']);
    let mut pos = content.len() - content.trim_start().len();

    // Sequence entry marker: "- image: ..."
    if let Some(after_dash) = content[pos..].strip_prefix('-') {
        let trimmed = after_dash.trim_start();
        if trimmed.len() < after_dash.len() {
            pos = content.len() - trimmed.len();
        }
    }

    let rest = &content[pos..];
    let key = IMAGE_KEYS.iter().find(|key| rest.starts_with(**key))?;
    let after_key = &rest[key.len()..];
    if !(after_key.is_empty() || after_key.starts_with([' ', '\t'])) {
        return None;
    }

    let value = after_key.trim_start();
    let value_pos = content.len() - value.len();

    let (start, end) = match value.chars().next() {
        Some(q @ ('"' | '\'')) => match value[1..].find(q) {
            Some(close) => (value_pos + 1, value_pos + 1 + close),
            None => (value_pos, content.len()),
        },
        _ => {
            let plain_end = value
                .find(" #")
                .or_else(|| value.find("\t#"))
                .unwrap_or(value.len());
            let plain = value[..plain_end].trim_end();
            (value_pos, value_pos + plain.len())
        }
    };

    Some(ImageLine { start, end })
}

//! Compose descriptor editing.
//!
//! The descriptor is parsed as YAML and the `image` field of each targeted
//! service is replaced, so the edit does not depend on indentation or line
//! layout. Comments are not preserved by the round trip, and anchors are
//! expanded in place.

use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from reading or rewriting a compose descriptor.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The descriptor could not be read or written.
    #[error("descriptor I/O error on {path}: {source}")]
    Io {
        /// Descriptor path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The descriptor is not valid YAML.
    #[error("invalid descriptor YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The descriptor has no `services` mapping.
    #[error("descriptor has no services section")]
    NoServices,

    /// A requested service is not declared.
    #[error("service not found in descriptor: {0}")]
    UnknownService(String),

    /// No service declares an image, so nothing would be rewritten.
    #[error("no service in the descriptor declares an image")]
    NoImages,
}

/// A parsed compose descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    doc: Value,
}

impl Descriptor {
    /// Parse a descriptor from YAML text.
    ///
    /// Merge keys (`<<: *anchor`) are resolved so services that inherit
    /// `image` from a shared fragment are edited like any other.
    pub fn parse(yaml: &str) -> Result<Self, DescriptorError> {
        let mut doc: Value = serde_yaml::from_str(yaml)?;
        doc.apply_merge()?;
        Ok(Self { doc })
    }

    /// Read and parse a descriptor file.
    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| DescriptorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&yaml)
    }

    /// Serialize and write the descriptor.
    pub fn save(&self, path: &Path) -> Result<(), DescriptorError> {
        std::fs::write(path, self.to_yaml()?).map_err(|source| DescriptorError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Serialize the descriptor to YAML text.
    pub fn to_yaml(&self) -> Result<String, DescriptorError> {
        Ok(serde_yaml::to_string(&self.doc)?)
    }

    fn services(&self) -> Result<&Mapping, DescriptorError> {
        self.doc
            .get("services")
            .and_then(Value::as_mapping)
            .ok_or(DescriptorError::NoServices)
    }

    fn services_mut(&mut self) -> Result<&mut Mapping, DescriptorError> {
        self.doc
            .get_mut("services")
            .and_then(Value::as_mapping_mut)
            .ok_or(DescriptorError::NoServices)
    }

    /// Service names in declaration order.
    pub fn service_names(&self) -> Result<Vec<String>, DescriptorError> {
        Ok(self
            .services()?
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect())
    }

    /// The image declared by `service`, if any.
    pub fn image(&self, service: &str) -> Option<&str> {
        self.services()
            .ok()?
            .get(service)?
            .get("image")?
            .as_str()
    }

    /// Point services at `image`.
    ///
    /// With an empty `only`, every service that declares an `image` is
    /// rewritten and services that only `build:` are left alone. Otherwise
    /// exactly the listed services get the image. Returns the names of the
    /// rewritten services.
    pub fn set_image(&mut self, image: &str, only: &[String]) -> Result<Vec<String>, DescriptorError> {
        let services = self.services_mut()?;

        for name in only {
            if !services.contains_key(name.as_str()) {
                return Err(DescriptorError::UnknownService(name.clone()));
            }
        }

        let mut rewritten = Vec::new();
        for (key, service) in services.iter_mut() {
            let Some(name) = key.as_str() else { continue };
            let Some(body) = service.as_mapping_mut() else {
                continue;
            };

            let targeted = if only.is_empty() {
                body.contains_key("image")
            } else {
                only.iter().any(|s| s == name)
            };
            if targeted {
                body.insert(Value::from("image"), Value::from(image));
                rewritten.push(name.to_string());
            }
        }

        if rewritten.is_empty() {
            return Err(DescriptorError::NoImages);
        }
        Ok(rewritten)
    }
}

/// Rewrite the image references of the descriptor at `path` in place.
pub fn rewrite_image(path: &Path, image: &str, only: &[String]) -> Result<Vec<String>, DescriptorError> {
    let mut descriptor = Descriptor::load(path)?;
    let rewritten = descriptor.set_image(image, only)?;
    descriptor.save(path)?;

    tracing::info!(
        descriptor = %path.display(),
        image,
        services = ?rewritten,
        "descriptor rewritten"
    );
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSE: &str = r#"
version: "3"
services:
  axon1:
    container_name: axon1
    image: axonweb3/axon:latest
    volumes:
      - ./logs1:/app/logs
  axon2:
      image:   "axonweb3/axon:v0.1.0"   # odd spacing
      restart: always
  axon3:
    image: ghcr.io/other/axon@sha256:deadbeef
  builder:
    build: .
"#;

    #[test]
    fn rewrites_every_declared_image() {
        let mut d = Descriptor::parse(COMPOSE).unwrap();
        let rewritten = d.set_image("axonweb3/axon:start-test", &[]).unwrap();

        assert_eq!(rewritten, vec!["axon1", "axon2", "axon3"]);
        for service in ["axon1", "axon2", "axon3"] {
            assert_eq!(d.image(service), Some("axonweb3/axon:start-test"));
        }
        assert_eq!(d.image("builder"), None);
    }

    #[test]
    fn rewrites_images_inherited_through_merge_keys() {
        let yaml = r#"
x-axon: &axon
  image: axonweb3/axon:old
  restart: always
services:
  axon1:
    <<: *axon
    container_name: axon1
  axon2:
    <<: *axon
"#;
        let mut d = Descriptor::parse(yaml).unwrap();
        let rewritten = d.set_image("axonweb3/axon:start-test", &[]).unwrap();

        assert_eq!(rewritten, vec!["axon1", "axon2"]);
        let reparsed = Descriptor::parse(&d.to_yaml().unwrap()).unwrap();
        assert_eq!(reparsed.image("axon1"), Some("axonweb3/axon:start-test"));
        assert_eq!(reparsed.image("axon2"), Some("axonweb3/axon:start-test"));
        assert!(!d.to_yaml().unwrap().contains("<<"));
    }

    #[test]
    fn rewrite_preserves_other_fields() {
        let mut d = Descriptor::parse(COMPOSE).unwrap();
        d.set_image("axonweb3/axon:start-test", &[]).unwrap();

        let reparsed = Descriptor::parse(&d.to_yaml().unwrap()).unwrap();
        assert_eq!(reparsed, d);
        assert_eq!(
            reparsed.service_names().unwrap(),
            vec!["axon1", "axon2", "axon3", "builder"]
        );
        let yaml = d.to_yaml().unwrap();
        assert!(yaml.contains("./logs1:/app/logs"));
        assert!(yaml.contains("restart: always"));
    }

    #[test]
    fn explicit_service_list() {
        let mut d = Descriptor::parse(COMPOSE).unwrap();
        let rewritten = d
            .set_image("axonweb3/axon:start-test", &["axon2".into(), "builder".into()])
            .unwrap();

        assert_eq!(rewritten, vec!["axon2", "builder"]);
        assert_eq!(d.image("axon1"), Some("axonweb3/axon:latest"));
        assert_eq!(d.image("builder"), Some("axonweb3/axon:start-test"));
    }

    #[test]
    fn unknown_service_rejected() {
        let mut d = Descriptor::parse(COMPOSE).unwrap();
        let err = d.set_image("x", &["nope".into()]).unwrap_err();
        assert!(matches!(err, DescriptorError::UnknownService(s) if s == "nope"));
    }

    #[test]
    fn descriptor_without_images_rejected() {
        let mut d = Descriptor::parse("services:\n  a:\n    build: .\n").unwrap();
        assert!(matches!(
            d.set_image("x", &[]),
            Err(DescriptorError::NoImages)
        ));
    }

    #[test]
    fn descriptor_without_services_rejected() {
        let mut d = Descriptor::parse("version: \"3\"\n").unwrap();
        assert!(matches!(
            d.set_image("x", &[]),
            Err(DescriptorError::NoServices)
        ));
    }

    #[test]
    fn rewrite_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        std::fs::write(&path, COMPOSE).unwrap();

        rewrite_image(&path, "axonweb3/axon:start-test", &[]).unwrap();

        let d = Descriptor::load(&path).unwrap();
        assert_eq!(d.image("axon3"), Some("axonweb3/axon:start-test"));
    }
}

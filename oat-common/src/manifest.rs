//! Deployment spec: a deployment name plus a free-form property map.
//!
//! The spec file is YAML:
//!
//! ```yaml
//! name: batlight          # optional, falls back to properties.name
//! properties:
//!   job: batlight
//!   instances: 1
//! ```
//!
//! Toggles such as [`DeploymentSpec::use_static_ip`] write properties before
//! the deployment requirement is built. The properties are passed through to
//! the rendered manifest without interpretation.

use std::path::Path;

use serde::Deserialize;
use serde_yaml_ng::{Mapping, Value};

use crate::config::TestEnvironment;
use crate::errors::{HarnessError, HarnessResult};
use crate::requirement::Artifact;

/// Deployment name used when no deployment spec file is configured.
pub const DEFAULT_DEPLOYMENT: &str = "batlight";

#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentSpec {
    pub name: String,
    pub properties: Mapping,
}

#[derive(Deserialize)]
struct SpecFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    properties: Mapping,
}

impl DeploymentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Mapping::new(),
        }
    }

    /// The spec named by `OAT_DEPLOYMENT_SPEC`, else an empty spec for the default deployment.
    pub fn from_env(env: &TestEnvironment) -> HarnessResult<Self> {
        match &env.deployment_spec {
            Some(path) => Self::load(path),
            None => Ok(Self::new(DEFAULT_DEPLOYMENT)),
        }
    }

    pub fn load(path: &Path) -> HarnessResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
            .map_err(|reason| HarnessError::Config(format!("{}: {reason}", path.display())))
    }

    fn parse(contents: &str) -> Result<Self, String> {
        let file: SpecFile = serde_yaml_ng::from_str(contents).map_err(|e| e.to_string())?;
        let name = file
            .name
            .or_else(|| {
                file.properties
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .ok_or_else(|| "deployment spec has no name".to_string())?;
        Ok(Self {
            name,
            properties: file.properties,
        })
    }

    /// Job under test: the `job` property, else the deployment name.
    pub fn job_name(&self) -> &str {
        self.properties
            .get("job")
            .and_then(Value::as_str)
            .unwrap_or(self.name.as_str())
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: &str, value: impl Into<Value>) {
        self.properties.insert(Value::from(key), value.into());
    }

    /// Assign the VM a fixed IP on the deployment network.
    pub fn use_static_ip(&mut self, ip: &str) {
        self.set_property("use_static_ip", true);
        self.set_property("static_ip", ip);
    }

    /// Attach a public (virtual) IP to the VM.
    pub fn use_vip(&mut self, vip: &str) {
        self.set_property("use_vip", true);
        self.set_property("vip", vip);
    }

    /// Minimal manifest naming the deployment, its release and stemcell, with the
    /// spec's properties passed through.
    pub fn render_manifest(&self, stemcell: &Artifact, release: &Artifact) -> HarnessResult<String> {
        let mut release_entry = Mapping::new();
        release_entry.insert("name".into(), release.name.clone().into());
        release_entry.insert("version".into(), release.version.clone().into());

        let mut stemcell_entry = Mapping::new();
        stemcell_entry.insert("alias".into(), "default".into());
        stemcell_entry.insert("name".into(), stemcell.name.clone().into());
        stemcell_entry.insert("version".into(), stemcell.version.clone().into());

        let mut manifest = Mapping::new();
        manifest.insert("name".into(), self.name.clone().into());
        manifest.insert(
            "releases".into(),
            Value::Sequence(vec![Value::Mapping(release_entry)]),
        );
        manifest.insert(
            "stemcells".into(),
            Value::Sequence(vec![Value::Mapping(stemcell_entry)]),
        );
        manifest.insert("properties".into(), Value::Mapping(self.properties.clone()));

        serde_yaml_ng::to_string(&manifest)
            .map_err(|e| HarnessError::Config(format!("cannot render manifest: {e}")))
    }
}

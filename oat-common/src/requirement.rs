//! Declarative descriptions of provisioned state.
//!
//! A [`Requirement`] is one of a closed set of variants. Each has a stable
//! identity derived from its kind and parameters; the graph treats two
//! requirements with equal identities as the same node. The concrete
//! provision and teardown actions live behind the [`Provision`] trait so the
//! graph can be driven by the real director or by a test double.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::archive::read_artifact_manifest;
use crate::config::{ArtifactSettings, TestEnvironment};
use crate::errors::{HarnessError, HarnessResult};
use crate::manifest::DeploymentSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    Stemcell,
    Release,
    Deployment,
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stemcell => "stemcell",
            Self::Release => "release",
            Self::Deployment => "deployment",
        })
    }
}

/// Stable key of a requirement, e.g. `deployment:batlight`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequirementId(String);

impl RequirementId {
    pub fn new(kind: RequirementKind, key: impl fmt::Display) -> Self {
        Self(format!("{kind}:{key}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequirementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An uploadable tarball with a resolved name and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub name: String,
    pub version: String,
}

impl Artifact {
    pub fn new(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Resolve configured settings, filling a missing name or version from
    /// the manifest embedded in the archive.
    pub fn resolve(
        settings: &ArtifactSettings,
        what: &str,
        manifest_name: &str,
    ) -> HarnessResult<Self> {
        let path = settings.path.clone().ok_or_else(|| {
            HarnessError::Config(format!("no {what} archive configured"))
        })?;

        match (&settings.name, &settings.version) {
            (Some(name), Some(version)) => Ok(Self::new(path, name, version)),
            (name, version) => {
                let manifest = read_artifact_manifest(&path, manifest_name)?;
                Ok(Self {
                    name: name.clone().unwrap_or(manifest.name),
                    version: version.clone().unwrap_or(manifest.version),
                    path,
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// "This stemcell is uploaded to the director."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemcellRequirement {
    pub artifact: Artifact,
}

impl StemcellRequirement {
    pub fn new(artifact: Artifact) -> Self {
        Self { artifact }
    }

    pub fn from_env(env: &TestEnvironment) -> HarnessResult<Self> {
        Artifact::resolve(&env.stemcell, "stemcell", "stemcell.MF").map(Self::new)
    }

    pub fn identity(&self) -> RequirementId {
        RequirementId::new(
            RequirementKind::Stemcell,
            format_args!("{}/{}", self.artifact.name, self.artifact.version),
        )
    }
}

/// "This release is uploaded to the director."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequirement {
    pub artifact: Artifact,
}

impl ReleaseRequirement {
    pub fn new(artifact: Artifact) -> Self {
        Self { artifact }
    }

    pub fn from_env(env: &TestEnvironment) -> HarnessResult<Self> {
        Artifact::resolve(&env.release, "release", "release.MF").map(Self::new)
    }

    pub fn identity(&self) -> RequirementId {
        RequirementId::new(
            RequirementKind::Release,
            format_args!("{}/{}", self.artifact.name, self.artifact.version),
        )
    }
}

/// "A deployment with this spec is running."
///
/// Depends on the stemcell and release it is rendered against.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentRequirement {
    pub spec: DeploymentSpec,
    pub stemcell: StemcellRequirement,
    pub release: ReleaseRequirement,
}

impl DeploymentRequirement {
    pub fn new(
        spec: DeploymentSpec,
        stemcell: StemcellRequirement,
        release: ReleaseRequirement,
    ) -> Self {
        Self {
            spec,
            stemcell,
            release,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn identity(&self) -> RequirementId {
        RequirementId::new(RequirementKind::Deployment, &self.spec.name)
    }

    /// Manifest YAML for this deployment.
    pub fn manifest(&self) -> HarnessResult<String> {
        self.spec
            .render_manifest(&self.stemcell.artifact, &self.release.artifact)
    }
}

/// Any piece of provisionable state.
#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    Stemcell(StemcellRequirement),
    Release(ReleaseRequirement),
    Deployment(DeploymentRequirement),
}

impl Requirement {
    pub fn kind(&self) -> RequirementKind {
        match self {
            Self::Stemcell(_) => RequirementKind::Stemcell,
            Self::Release(_) => RequirementKind::Release,
            Self::Deployment(_) => RequirementKind::Deployment,
        }
    }

    pub fn identity(&self) -> RequirementId {
        match self {
            Self::Stemcell(r) => r.identity(),
            Self::Release(r) => r.identity(),
            Self::Deployment(r) => r.identity(),
        }
    }

    /// Requirements that must be provisioned first, in order.
    pub fn prerequisites(&self) -> Vec<Requirement> {
        match self {
            Self::Stemcell(_) | Self::Release(_) => Vec::new(),
            Self::Deployment(d) => vec![
                Self::Stemcell(d.stemcell.clone()),
                Self::Release(d.release.clone()),
            ],
        }
    }
}

impl From<StemcellRequirement> for Requirement {
    fn from(r: StemcellRequirement) -> Self {
        Self::Stemcell(r)
    }
}

impl From<ReleaseRequirement> for Requirement {
    fn from(r: ReleaseRequirement) -> Self {
        Self::Release(r)
    }
}

impl From<DeploymentRequirement> for Requirement {
    fn from(r: DeploymentRequirement) -> Self {
        Self::Deployment(r)
    }
}

/// Carries out provisioning and teardown for every requirement variant.
///
/// `provision` must be safe to call for state that already exists; the graph
/// only guarantees it is not called twice for one identity.
pub trait Provision {
    fn provision(&self, requirement: &Requirement) -> impl Future<Output = HarnessResult<()>>;

    fn teardown(&self, requirement: &Requirement) -> impl Future<Output = HarnessResult<()>>;
}

impl<P: Provision> Provision for &P {
    fn provision(&self, requirement: &Requirement) -> impl Future<Output = HarnessResult<()>> {
        (**self).provision(requirement)
    }

    fn teardown(&self, requirement: &Requirement) -> impl Future<Output = HarnessResult<()>> {
        (**self).teardown(requirement)
    }
}

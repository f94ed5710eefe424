//! Memoized provisioning of requirements for one test group.
//!
//! The graph records each identity once it has been provisioned, in
//! provisioning order. Requiring an identity that is already recorded is a
//! no-op. Cleanup walks the record backwards.
//!
//! A graph is owned by exactly one group and mutated through `&mut self`;
//! groups that run concurrently must each own their own graph.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{HarnessError, HarnessResult};
use crate::requirement::{Provision, Requirement, RequirementId};

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// Identities torn down, in teardown order.
    pub torn_down: Vec<RequirementId>,
    /// Identities whose teardown failed, with the error text.
    pub failed: Vec<(RequirementId, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct RequirementGraph<P> {
    backend: P,
    order: Vec<RequirementId>,
    nodes: HashMap<RequirementId, Requirement>,
}

impl<P: Provision> RequirementGraph<P> {
    pub fn new(backend: P) -> Self {
        Self {
            backend,
            order: Vec::new(),
            nodes: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &P {
        &self.backend
    }

    pub fn is_provisioned(&self, identity: &RequirementId) -> bool {
        self.nodes.contains_key(identity)
    }

    /// Provisioned identities in provisioning order.
    pub fn provisioned(&self) -> &[RequirementId] {
        &self.order
    }

    pub fn get(&self, identity: &RequirementId) -> Option<&Requirement> {
        self.nodes.get(identity)
    }

    /// Ensure `requirement` and everything it depends on is provisioned.
    ///
    /// Prerequisites are provisioned first. When a step fails, its identity is
    /// not recorded, the error is returned as a provisioning failure, and every
    /// identity provisioned before it stays recorded for cleanup.
    pub async fn require(&mut self, requirement: impl Into<Requirement>) -> HarnessResult<()> {
        let requirement = requirement.into();
        let identity = requirement.identity();
        if self.is_provisioned(&identity) {
            debug!(identity = %identity, "Requirement already provisioned");
            return Ok(());
        }

        for step in self.plan(requirement)? {
            let id = step.identity();
            info!(identity = %id, kind = %step.kind(), "Provisioning requirement");
            let start = Instant::now();

            if let Err(e) = self.backend.provision(&step).await {
                warn!(
                    identity = %id,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Provisioning failed"
                );
                return Err(e.into_provisioning(&id));
            }

            info!(
                identity = %id,
                duration_ms = start.elapsed().as_millis() as u64,
                "Provisioned requirement"
            );
            self.order.push(id.clone());
            self.nodes.insert(id, step);
        }
        Ok(())
    }

    /// Unprovisioned requirements reachable from `root`, dependencies first.
    fn plan(&self, root: Requirement) -> HarnessResult<Vec<Requirement>> {
        let mut ordered = Vec::new();
        let mut planned: HashSet<RequirementId> = HashSet::new();
        let mut on_path: HashSet<RequirementId> = HashSet::new();
        let mut stack = vec![(root, false)];

        while let Some((requirement, expanded)) = stack.pop() {
            let id = requirement.identity();
            if expanded {
                on_path.remove(&id);
                if planned.insert(id) {
                    ordered.push(requirement);
                }
                continue;
            }
            if planned.contains(&id) || self.is_provisioned(&id) {
                continue;
            }
            // An unexpanded node that is still on the path is its own ancestor.
            if !on_path.insert(id.clone()) {
                return Err(HarnessError::Config(format!("dependency cycle through {id}"))
                    .into_provisioning(&id));
            }

            let prerequisites = requirement.prerequisites();
            stack.push((requirement, true));
            stack.extend(prerequisites.into_iter().rev().map(|p| (p, false)));
        }
        Ok(ordered)
    }

    /// Tear down one identity now. It is forgotten even if teardown fails, so
    /// it is never torn down twice. Returns `Ok(false)` if it was not provisioned.
    pub async fn cleanup(&mut self, identity: &RequirementId) -> HarnessResult<bool> {
        let Some(requirement) = self.nodes.remove(identity) else {
            return Ok(false);
        };
        self.order.retain(|id| id != identity);

        info!(identity = %identity, "Tearing down requirement");
        self.backend.teardown(&requirement).await?;
        Ok(true)
    }

    /// Tear down everything in reverse provisioning order.
    ///
    /// A failed teardown is logged and recorded; the remaining identities are
    /// still attempted.
    pub async fn cleanup_all(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        while let Some(identity) = self.order.pop() {
            let Some(requirement) = self.nodes.remove(&identity) else {
                continue;
            };
            info!(identity = %identity, "Tearing down requirement");
            match self.backend.teardown(&requirement).await {
                Ok(()) => report.torn_down.push(identity),
                Err(e) => {
                    warn!(identity = %identity, error = %e, "Teardown failed, continuing");
                    report.failed.push((identity, e.to_string()));
                }
            }
        }
        report
    }
}

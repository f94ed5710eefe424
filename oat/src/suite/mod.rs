//! Acceptance groups run by `oat run`.
//!
//! Each group owns its own [`FixtureGroup`] and graph. The restore group
//! deletes the deployment it depends on, so it never shares state with the
//! deployment group.

mod agent;
mod job;
mod logs;
mod restore;
mod ssh;

use std::sync::Arc;

use oat_common::{
    DeploymentSpec, DeploymentToggles, Director, FixtureGroup, HarnessResult, TestCase,
    TestEnvironment, deployment_requirements,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Deployment,
    Restore,
}

impl Group {
    pub const ALL: [Group; 2] = [Group::Deployment, Group::Restore];

    /// Name accepted by `--group`.
    pub fn key(self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Restore => "restore",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Deployment => "with release, stemcell and deployment",
            Self::Restore => "director restore",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|g| g.key() == name || g.title() == name)
    }

    pub fn cases(self) -> Vec<TestCase<Director>> {
        match self {
            Self::Deployment => {
                let mut cases = agent::cases();
                cases.extend(ssh::cases());
                cases.extend(job::cases());
                cases.extend(logs::cases());
                cases
            }
            Self::Restore => restore::cases(),
        }
    }

    /// The group wired to `director`, with stemcell, release and deployment
    /// declared for setup.
    pub fn build(self, env: Arc<TestEnvironment>, director: Director) -> FixtureGroup<Director> {
        let toggles = toggles(&env);
        self.cases().into_iter().fold(
            FixtureGroup::new(self.title(), env, director)
                .setup_with(move |env| deployment_requirements(env, toggles)),
            FixtureGroup::test,
        )
    }
}

/// Groups to run. Without an explicit selection the restore group only runs
/// when `OAT_RUN_RESTORE` is set.
pub fn select(requested: &[String], env: &TestEnvironment) -> anyhow::Result<Vec<Group>> {
    if requested.is_empty() {
        return Ok(Group::ALL
            .into_iter()
            .filter(|g| *g != Group::Restore || env.run_restore)
            .collect());
    }

    let mut groups = Vec::with_capacity(requested.len());
    for name in requested {
        let Some(group) = Group::parse(name) else {
            let known: Vec<_> = Group::ALL.iter().map(|g| g.key()).collect();
            anyhow::bail!("unknown group '{name}' (known: {})", known.join(", "));
        };
        if !groups.contains(&group) {
            groups.push(group);
        }
    }
    Ok(groups)
}

/// Attach a static IP and VIP to the deployment when they are configured.
pub fn toggles(env: &TestEnvironment) -> DeploymentToggles {
    DeploymentToggles {
        static_ip: env.network.static_ip.is_some(),
        vip: env.network.vip.is_some(),
    }
}

/// Deployment name and job under test.
fn target(env: &TestEnvironment) -> HarnessResult<(String, String)> {
    let spec = DeploymentSpec::from_env(env)?;
    let job = spec.job_name().to_string();
    Ok((spec.name, job))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selection_respects_restore_toggle() {
        let mut env = TestEnvironment::new("10.0.0.6");
        assert_eq!(select(&[], &env).unwrap(), vec![Group::Deployment]);

        env.run_restore = true;
        assert_eq!(select(&[], &env).unwrap(), Group::ALL.to_vec());
    }

    #[test]
    fn test_explicit_selection_runs_restore() {
        let env = TestEnvironment::new("10.0.0.6");
        let groups = select(
            &["restore".to_string(), "restore".to_string()],
            &env,
        )
        .unwrap();
        assert_eq!(groups, vec![Group::Restore]);
    }

    #[test]
    fn test_unknown_group_lists_known_names() {
        let env = TestEnvironment::new("10.0.0.6");
        let err = select(&["nope".to_string()], &env).unwrap_err();
        assert!(err.to_string().contains("deployment, restore"));
    }

    #[test]
    fn test_group_titles_parse() {
        for group in Group::ALL {
            assert_eq!(Group::parse(group.title()), Some(group));
        }
    }

    #[test]
    fn test_deployment_group_cases() {
        let names: Vec<_> = Group::Deployment
            .cases()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec![
            "should survive agent dying",
            "can ssh into a vm",
            "should recreate a job",
            "should stop and start a job",
            "should get agent log",
            "should get job logs",
        ]);
    }
}

//! Run summaries for the terminal and for CI.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use oat_common::{GroupReport, TestOutcome};
use serde::Serialize;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
}

impl Totals {
    pub fn of(reports: &[GroupReport]) -> Self {
        let mut totals = Self::default();
        for test in reports.iter().flat_map(|r| &r.tests) {
            match test.outcome {
                TestOutcome::Passed => totals.passed += 1,
                TestOutcome::Failed { .. } => totals.failed += 1,
                TestOutcome::Errored { .. } => totals.errored += 1,
                TestOutcome::Skipped { .. } => totals.skipped += 1,
            }
        }
        totals
    }
}

/// Machine-readable form printed by `oat run --json`.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub started_at: DateTime<Utc>,
    pub succeeded: bool,
    pub totals: Totals,
    pub groups: &'a [GroupReport],
}

impl<'a> RunSummary<'a> {
    pub fn new(started_at: DateTime<Utc>, groups: &'a [GroupReport]) -> Self {
        Self {
            started_at,
            succeeded: succeeded(groups),
            totals: Totals::of(groups),
            groups,
        }
    }
}

pub fn succeeded(reports: &[GroupReport]) -> bool {
    reports.iter().all(GroupReport::succeeded)
}

pub fn render_human(reports: &[GroupReport]) -> String {
    let mut out = String::new();
    for group in reports {
        let _ = writeln!(out, "{} ({} ms)", group.group, group.duration_ms);
        if let Some(error) = &group.setup_error {
            let _ = writeln!(out, "  setup failed: {error}");
        }
        for test in &group.tests {
            let (label, detail) = match &test.outcome {
                TestOutcome::Passed => ("PASS", None),
                TestOutcome::Failed { failures } => ("FAIL", Some(failures.join("\n"))),
                TestOutcome::Errored { kind, message } => {
                    ("ERROR", Some(format!("[{kind}] {message}")))
                }
                // The setup error is already printed once for the group.
                TestOutcome::Skipped { .. } if group.setup_error.is_some() => ("SKIP", None),
                TestOutcome::Skipped { reason } => ("SKIP", Some(reason.clone())),
            };
            let _ = writeln!(out, "  {label:<5} {} ({} ms)", test.name, test.duration_ms);
            if let Some(detail) = detail {
                for line in detail.lines() {
                    let _ = writeln!(out, "        {line}");
                }
            }
        }
        for (id, error) in &group.cleanup.failed {
            let _ = writeln!(out, "  cleanup of {id} failed: {error}");
        }
    }

    let totals = Totals::of(reports);
    let _ = writeln!(
        out,
        "\n{} passed, {} failed, {} errored, {} skipped",
        totals.passed, totals.failed, totals.errored, totals.skipped
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use oat_common::{CleanupReport, FailureKind, TestReport};

    fn group(tests: Vec<(&str, TestOutcome)>) -> GroupReport {
        GroupReport {
            group: "with release, stemcell and deployment".to_string(),
            started_at: Utc::now(),
            duration_ms: 12,
            setup_error: None,
            tests: tests
                .into_iter()
                .map(|(name, outcome)| TestReport {
                    name: name.to_string(),
                    outcome,
                    duration_ms: 3,
                })
                .collect(),
            cleanup: CleanupReport::default(),
        }
    }

    #[test]
    fn test_human_report_lists_outcomes_and_totals() {
        let reports = vec![group(vec![
            ("should recreate a job", TestOutcome::Passed),
            ("should stop and start a job", TestOutcome::Failed {
                failures: vec!["stdout did not match /batlight\\/0 stopped/".to_string()],
            }),
            ("can ssh into a vm", TestOutcome::Errored {
                kind: FailureKind::Transport,
                message: "Connection refused".to_string(),
            }),
        ])];

        let text = render_human(&reports);
        assert!(text.contains("PASS  should recreate a job"));
        assert!(text.contains("FAIL  should stop and start a job"));
        assert!(text.contains("batlight\\/0 stopped"));
        assert!(text.contains("[transport] Connection refused"));
        assert!(text.contains("1 passed, 1 failed, 1 errored, 0 skipped"));
        assert!(!succeeded(&reports));
    }

    #[test]
    fn test_json_summary_shape() {
        let reports = vec![group(vec![("should get job logs", TestOutcome::Passed)])];
        let summary = RunSummary::new(Utc::now(), &reports);
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["succeeded"], true);
        assert_eq!(json["totals"]["passed"], 1);
        assert_eq!(json["groups"][0]["tests"][0]["status"], "passed");
        assert_eq!(json["groups"][0]["tests"][0]["name"], "should get job logs");
    }
}

//! Provider job → step mapping
//!
//! Provider jobs are grouped by stage name into the three fixed steps
//! (`terraform`, `ansible`, `helm`). Inside a step, jobs run in the order of
//! the leading number of their name: `"[2-1]-deploy"` has key 2. Names
//! without a numeric prefix get key 0 and sort first.

use gitlab_provider::ProviderJob;
use stand_state::{PlannedJob, PlannedStep, StepKind};
use tracing::warn;

/// Result of mapping a pipeline's jobs onto the step taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub struct StepPlan {
    /// One entry per [`StepKind`], by ascending ordinal.
    pub steps: Vec<PlannedStep>,
    /// Jobs whose stage belongs to no step.
    pub dropped: Vec<ProviderJob>,
}

/// Ordering key of a job name: strip surrounding brackets, take the text
/// before the first `-` and parse its leading integer; anything else is 0.
pub fn job_order_key(name: &str) -> i64 {
    let trimmed = name.trim_matches(|c| c == '[' || c == ']');
    let head = trimmed.split('-').next().unwrap_or_default();
    leading_integer(head).unwrap_or(0)
}

fn leading_integer(token: &str) -> Option<i64> {
    let token = token.trim_start();
    let (sign, digits) = match token.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, token.strip_prefix('+').unwrap_or(token)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

/// Group `jobs` into the three steps and assign per-step ordinals starting
/// at 1. Sorting is stable, so jobs with equal keys keep provider order.
pub fn plan_steps(jobs: &[ProviderJob]) -> StepPlan {
    let steps = StepKind::ALL
        .iter()
        .map(|kind| {
            let mut members: Vec<&ProviderJob> =
                jobs.iter().filter(|job| job.stage == kind.stage()).collect();
            members.sort_by_key(|job| job_order_key(&job.name));
            PlannedStep {
                kind: *kind,
                jobs: members
                    .into_iter()
                    .zip(1u32..)
                    .map(|(job, ordinal)| PlannedJob {
                        external_id: job.id,
                        name: job.name.clone(),
                        stage: job.stage.clone(),
                        ordinal,
                        status: job.status,
                    })
                    .collect(),
            }
        })
        .collect();

    let dropped: Vec<ProviderJob> = jobs
        .iter()
        .filter(|job| StepKind::from_stage(&job.stage).is_none())
        .cloned()
        .collect();
    for job in &dropped {
        warn!(job = job.id, name = %job.name, stage = %job.stage, "job stage maps to no step, dropping");
    }

    StepPlan { steps, dropped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stand_state::JobStatus;

    #[test]
    fn order_key_reads_leading_number() {
        assert_eq!(job_order_key("[10-1]-x"), 10);
        assert_eq!(job_order_key("[2-1]-y"), 2);
        assert_eq!(job_order_key("3-deploy"), 3);
        assert_eq!(job_order_key("7abc-z"), 7);
        assert_eq!(job_order_key("deploy"), 0);
        assert_eq!(job_order_key("[x-1]"), 0);
        assert_eq!(job_order_key(""), 0);
    }

    #[test]
    fn jobs_sort_by_leading_number_within_step() {
        let jobs = vec![
            ProviderJob::new(1, "[10-1]-x", "terraform"),
            ProviderJob::new(2, "[2-1]-y", "terraform"),
            ProviderJob::new(3, "[1-1]-z", "terraform"),
        ];
        let plan = plan_steps(&jobs);
        let infra = &plan.steps[0];
        let ordered: Vec<(u32, &str)> = infra
            .jobs
            .iter()
            .map(|j| (j.ordinal, j.name.as_str()))
            .collect();
        assert_eq!(
            ordered,
            vec![(1, "[1-1]-z"), (2, "[2-1]-y"), (3, "[10-1]-x")]
        );
    }

    #[test]
    fn stages_map_to_fixed_steps_and_unknown_are_dropped() {
        let jobs = vec![
            ProviderJob::new(1, "[1-1]-helm", "helm"),
            ProviderJob::new(2, "[1-1]-vm", "terraform"),
            ProviderJob::new(3, "lint", "test"),
            ProviderJob::new(4, "[1-1]-k8s", "ansible"),
        ];
        let plan = plan_steps(&jobs);

        let kinds: Vec<StepKind> = plan.steps.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, StepKind::ALL.to_vec());
        assert_eq!(plan.steps[0].jobs[0].external_id, 2);
        assert_eq!(plan.steps[1].jobs[0].external_id, 4);
        assert_eq!(plan.steps[2].jobs[0].external_id, 1);
        assert_eq!(plan.dropped, vec![ProviderJob::new(3, "lint", "test")]);
    }

    #[test]
    fn planned_jobs_carry_listed_state() {
        let jobs = vec![
            ProviderJob::new(1, "[1-1]-vm", "terraform"),
            ProviderJob::new(2, "[2-1]-vm", "terraform").with_status(JobStatus::Pending),
        ];
        let plan = plan_steps(&jobs);
        let statuses: Vec<JobStatus> = plan.steps[0].jobs.iter().map(|j| j.status).collect();
        assert_eq!(statuses, vec![JobStatus::Manual, JobStatus::Pending]);
    }

    #[test]
    fn empty_stage_still_yields_step() {
        let plan = plan_steps(&[ProviderJob::new(9, "[1-1]-vm", "terraform")]);
        assert_eq!(plan.steps.len(), 3);
        assert!(plan.steps[2].jobs.is_empty());
    }
}

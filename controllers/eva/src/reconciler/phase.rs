//! Phase state machine
//!
//! Pure mapping from (previous status, observed state) to the next phase,
//! the proposed `Available` condition and whether a Job must be created.
//! Precedence when a Job exists: succeeded, then failed pods, then image pull
//! failure, then running.

use super::observer::ObservedState;
use crds::{Condition, ConditionStatus, EvaConditionType, EvaPhase, EvaSpec, EvaStatus, find_condition};

pub const REASON_JOB_CREATED: &str = "JobCreated";
pub const REASON_JOB_MISSING: &str = "JobMissing";
pub const REASON_JOB_SUCCEEDED: &str = "JobSucceeded";
pub const REASON_JOB_FAILED: &str = "JobFailed";
pub const REASON_IMAGE_PULL_BACK_OFF: &str = "ImagePullBackOff";
pub const REASON_JOB_RUNNING: &str = "JobRunning";

/// Outcome of one phase decision
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub phase: EvaPhase,
    /// Conditions to merge into the status (may be empty)
    pub conditions: Vec<Condition>,
    /// True when the Job should be created
    pub create_job: bool,
}

fn available(status: ConditionStatus, reason: &str, message: &str, generation: i64) -> Condition {
    Condition::new(EvaConditionType::Available.as_str(), status, reason, message, generation)
}

/// Decide the next phase for an Eva.
///
/// `spec` is not read by the current table.
pub fn decide(_spec: &EvaSpec, status: Option<&EvaStatus>, observed: &ObservedState, generation: i64) -> Decision {
    let previous_phase = status.map(|s| s.phase).unwrap_or_default();
    let job = &observed.job;

    if !job.exists {
        return if matches!(previous_phase, EvaPhase::Unset | EvaPhase::Pending) {
            Decision {
                phase: EvaPhase::Pending,
                conditions: vec![available(
                    ConditionStatus::False,
                    REASON_JOB_CREATED,
                    "The Job has been created.",
                    generation,
                )],
                create_job: true,
            }
        } else {
            Decision {
                phase: EvaPhase::Failed,
                conditions: vec![available(
                    ConditionStatus::False,
                    REASON_JOB_MISSING,
                    "The Job is missing.",
                    generation,
                )],
                create_job: false,
            }
        };
    }

    let (phase, condition) = if job.succeeded > 0 {
        (
            EvaPhase::Succeeded,
            Some(available(
                ConditionStatus::True,
                REASON_JOB_SUCCEEDED,
                "The Job has succeeded.",
                generation,
            )),
        )
    } else if job.failed > 0 {
        (
            EvaPhase::Failed,
            Some(available(ConditionStatus::False, REASON_JOB_FAILED, "The Job has failed.", generation)),
        )
    } else if job.image_pull_failed {
        (
            EvaPhase::Failed,
            Some(available(
                ConditionStatus::False,
                REASON_IMAGE_PULL_BACK_OFF,
                "Failed to pull container image.",
                generation,
            )),
        )
    } else {
        // Only propose the running condition when it would change
        let conditions = status.map(|s| s.conditions.as_slice()).unwrap_or_default();
        let unchanged = find_condition(conditions, EvaConditionType::Available.as_str())
            .is_some_and(|c| c.status == ConditionStatus::True && c.reason == REASON_JOB_RUNNING);
        let condition = (!unchanged).then(|| {
            available(ConditionStatus::True, REASON_JOB_RUNNING, "The Job is running.", generation)
        });
        (EvaPhase::Running, condition)
    };

    Decision {
        phase,
        conditions: condition.into_iter().collect(),
        create_job: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::observer::JobState;

    fn spec() -> EvaSpec {
        EvaSpec {
            image: "busybox:1.36".to_string(),
            ..Default::default()
        }
    }

    fn status(phase: EvaPhase) -> EvaStatus {
        EvaStatus {
            phase,
            ..Default::default()
        }
    }

    fn with_job(job: JobState) -> ObservedState {
        ObservedState {
            job: JobState { exists: true, ..job },
            ..Default::default()
        }
    }

    #[test]
    fn test_no_job_unset_phase_requests_create() {
        let decision = decide(&spec(), Some(&status(EvaPhase::Unset)), &ObservedState::default(), 1);
        assert_eq!(decision.phase, EvaPhase::Pending);
        assert!(decision.create_job);
        assert_eq!(decision.conditions[0].reason, REASON_JOB_CREATED);
        assert_eq!(decision.conditions[0].status, ConditionStatus::False);
    }

    #[test]
    fn test_no_status_requests_create() {
        let decision = decide(&spec(), None, &ObservedState::default(), 1);
        assert_eq!(decision.phase, EvaPhase::Pending);
        assert!(decision.create_job);
    }

    #[test]
    fn test_no_job_pending_phase_requests_create_again() {
        let decision = decide(&spec(), Some(&status(EvaPhase::Pending)), &ObservedState::default(), 1);
        assert_eq!(decision.phase, EvaPhase::Pending);
        assert!(decision.create_job);
    }

    #[test]
    fn test_no_job_after_running_is_missing() {
        let decision = decide(&spec(), Some(&status(EvaPhase::Running)), &ObservedState::default(), 2);
        assert_eq!(decision.phase, EvaPhase::Failed);
        assert!(!decision.create_job);
        assert_eq!(decision.conditions[0].reason, REASON_JOB_MISSING);
        assert_eq!(decision.conditions[0].message, "The Job is missing.");
        assert_eq!(decision.conditions[0].observed_generation, 2);
    }

    #[test]
    fn test_success_wins_over_failure() {
        let observed = with_job(JobState {
            succeeded: 1,
            failed: 1,
            ..Default::default()
        });
        let decision = decide(&spec(), Some(&status(EvaPhase::Running)), &observed, 1);
        assert_eq!(decision.phase, EvaPhase::Succeeded);
        assert_eq!(decision.conditions[0].status, ConditionStatus::True);
        assert_eq!(decision.conditions[0].reason, REASON_JOB_SUCCEEDED);
    }

    #[test]
    fn test_failure_wins_over_image_pull() {
        let observed = with_job(JobState {
            failed: 1,
            image_pull_failed: true,
            ..Default::default()
        });
        let decision = decide(&spec(), Some(&status(EvaPhase::Running)), &observed, 1);
        assert_eq!(decision.phase, EvaPhase::Failed);
        assert_eq!(decision.conditions[0].reason, REASON_JOB_FAILED);
    }

    #[test]
    fn test_image_pull_failure() {
        let observed = with_job(JobState {
            active: 1,
            image_pull_failed: true,
            ..Default::default()
        });
        let decision = decide(&spec(), Some(&status(EvaPhase::Pending)), &observed, 1);
        assert_eq!(decision.phase, EvaPhase::Failed);
        assert_eq!(decision.conditions[0].reason, REASON_IMAGE_PULL_BACK_OFF);
        assert_eq!(decision.conditions[0].message, "Failed to pull container image.");
        assert!(!decision.create_job);
    }

    #[test]
    fn test_running_emits_condition_on_first_observation() {
        let observed = with_job(JobState {
            active: 1,
            ..Default::default()
        });
        let decision = decide(&spec(), Some(&status(EvaPhase::Pending)), &observed, 3);
        assert_eq!(decision.phase, EvaPhase::Running);
        assert_eq!(decision.conditions.len(), 1);
        assert_eq!(decision.conditions[0].reason, REASON_JOB_RUNNING);
        assert_eq!(decision.conditions[0].observed_generation, 3);
    }

    #[test]
    fn test_running_to_running_emits_no_condition() {
        let observed = with_job(JobState {
            active: 1,
            ..Default::default()
        });
        let mut previous = status(EvaPhase::Running);
        previous.conditions.push(available(
            ConditionStatus::True,
            REASON_JOB_RUNNING,
            "The Job is running.",
            3,
        ));

        let decision = decide(&spec(), Some(&previous), &observed, 3);
        assert_eq!(decision.phase, EvaPhase::Running);
        assert!(decision.conditions.is_empty());
    }

    #[test]
    fn test_decide_is_idempotent() {
        let observed = with_job(JobState {
            failed: 2,
            ..Default::default()
        });
        let previous = status(EvaPhase::Running);
        let first = decide(&spec(), Some(&previous), &observed, 4);
        let second = decide(&spec(), Some(&previous), &observed, 4);
        assert_eq!(first, second);
    }
}

//! Post-invocation verification.
//!
//! The agent's own claims are never trusted: the backlog is re-read from disk,
//! checked against the snapshot taken before invocation, and only then is the
//! project gate run.

use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::immutability::check_backlog_transition;
use crate::core::types::{Backlog, GateOutcome};
use crate::io::backlog::BacklogStore;
use crate::io::gate::QualityGate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    /// `None` when the gate was not reached.
    pub gate: Option<GateOutcome>,
    pub reasons: Vec<String>,
}

impl Verdict {
    fn fail(reasons: Vec<String>) -> Self {
        Self {
            passed: false,
            gate: None,
            reasons,
        }
    }

    pub fn summary(&self) -> String {
        self.reasons.join("; ")
    }
}

pub struct Verifier<'a> {
    store: &'a BacklogStore,
    baseline: Backlog,
    gate: &'a dyn QualityGate,
    workdir: &'a Path,
}

impl<'a> Verifier<'a> {
    /// `baseline` is the backlog as it was before the agent ran.
    pub fn new(
        store: &'a BacklogStore,
        baseline: Backlog,
        gate: &'a dyn QualityGate,
        workdir: &'a Path,
    ) -> Self {
        Self {
            store,
            baseline,
            gate,
            workdir,
        }
    }

    #[instrument(skip_all, fields(story_id))]
    pub fn verify(&self, story_id: &str, gate_log: &Path) -> Result<Verdict> {
        let current = match self.store.load() {
            Ok(backlog) => backlog,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "backlog no longer loads");
                return Ok(Verdict::fail(vec![format!(
                    "backlog no longer loads: {err:#}"
                )]));
            }
        };

        let violations = check_backlog_transition(&self.baseline, &current, story_id);
        if !violations.is_empty() {
            warn!(count = violations.len(), "backlog modified outside the contract");
            return Ok(Verdict::fail(violations));
        }

        let flipped = current.find(story_id).is_some_and(|story| story.passes);
        if !flipped {
            info!("story not marked passed");
            return Ok(Verdict::fail(vec![format!(
                "story '{story_id}' was not marked passed"
            )]));
        }

        let gate = match self.gate.check(self.workdir, gate_log) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "quality gate could not run");
                return Ok(Verdict {
                    passed: false,
                    gate: Some(GateOutcome::Fail),
                    reasons: vec![format!("quality gate could not run: {err:#}")],
                });
            }
        };
        let passed = gate != GateOutcome::Fail;
        let reasons = if passed {
            Vec::new()
        } else {
            vec!["quality gate failed".to_string()]
        };
        Ok(Verdict {
            passed,
            gate: Some(gate),
            reasons,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeGate, backlog_of, story};

    fn setup(gate: GateOutcome) -> (tempfile::TempDir, BacklogStore, Backlog, FakeGate) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = BacklogStore::new(temp.path().join("backlog.json"));
        let baseline = backlog_of(vec![story("A", 1), story("B", 2)]);
        store.save(&baseline).expect("save");
        (temp, store, baseline, FakeGate::new(gate))
    }

    #[test]
    fn passes_when_flag_flipped_and_gate_green() {
        let (temp, store, baseline, gate) = setup(GateOutcome::Pass);
        store.mark_passed("A").expect("mark");

        let verdict = Verifier::new(&store, baseline, &gate, temp.path())
            .verify("A", &temp.path().join("gate.log"))
            .expect("verify");
        assert!(verdict.passed);
        assert_eq!(verdict.gate, Some(GateOutcome::Pass));
        assert_eq!(gate.calls(), 1);
    }

    #[test]
    fn unflipped_story_fails_without_running_gate() {
        let (temp, store, baseline, gate) = setup(GateOutcome::Pass);

        let verdict = Verifier::new(&store, baseline, &gate, temp.path())
            .verify("A", &temp.path().join("gate.log"))
            .expect("verify");
        assert!(!verdict.passed);
        assert!(verdict.summary().contains("was not marked passed"));
        assert_eq!(gate.calls(), 0);
    }

    #[test]
    fn red_gate_fails_even_with_flag_flipped() {
        let (temp, store, baseline, gate) = setup(GateOutcome::Fail);
        store.mark_passed("A").expect("mark");

        let verdict = Verifier::new(&store, baseline, &gate, temp.path())
            .verify("A", &temp.path().join("gate.log"))
            .expect("verify");
        assert!(!verdict.passed);
        assert_eq!(verdict.summary(), "quality gate failed");
    }

    #[test]
    fn flipping_another_story_fails() {
        let (temp, store, baseline, gate) = setup(GateOutcome::Pass);
        store.mark_passed("A").expect("mark");
        store.mark_passed("B").expect("mark");

        let verdict = Verifier::new(&store, baseline, &gate, temp.path())
            .verify("A", &temp.path().join("gate.log"))
            .expect("verify");
        assert!(!verdict.passed);
        assert!(verdict.summary().contains("'B' marked passed"));
    }

    #[test]
    fn corrupted_backlog_fails() {
        let (temp, store, baseline, gate) = setup(GateOutcome::Pass);
        std::fs::write(store.path(), "{ not json").expect("corrupt");

        let verdict = Verifier::new(&store, baseline, &gate, temp.path())
            .verify("A", &temp.path().join("gate.log"))
            .expect("verify");
        assert!(!verdict.passed);
        assert!(verdict.summary().contains("backlog no longer loads"));
    }
}

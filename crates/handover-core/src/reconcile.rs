//! Index-based monotonic merge of the two upstream status reports.
//!
//! Each tick the controller holds one authoritative [`Phase`] and receives at
//! most one report from the simulator and one from the scenario script. The
//! merge picks the candidate that is furthest along the protocol and accepts
//! it only if it does not move the trial backwards:
//!
//! 1. If `index(sim) <= index(scenario)`, the scenario report is the
//!    candidate. It is accepted when `index(current) <= index(scenario)`.
//!    An accepted, known scenario phase is republished to the simulator.
//! 2. Otherwise the simulator report is the candidate. It is accepted when
//!    `index(current) <= index(sim)`. Nothing is republished.
//! 3. Otherwise the phase is unchanged.
//!
//! Ties go to the scenario branch, so the simulator keeps hearing the
//! scenario's view even when both already agree. Acceptance of a candidate
//! equal to `current` is not a transition.
//!
//! The function is pure: it never touches the channels or the trial state.

use chrono::NaiveDateTime;
use handover_types::{Origin, Phase, StatusReport};

/// Outcome of merging one tick's reports against the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    /// The phase before the merge.
    pub current: Phase,
    /// The report whose phase was accepted, if any.
    pub accepted: Option<StatusReport>,
}

impl Reconciliation {
    /// Authoritative phase after the merge.
    pub fn next_phase(&self) -> Phase {
        self.accepted.map_or(self.current, |report| report.phase)
    }

    /// Whether the merge moved the trial to a different phase.
    pub fn changed(&self) -> bool {
        self.next_phase() != self.current
    }

    /// Timestamp attached to the accepted report, if any.
    pub fn source_timestamp(&self) -> Option<NaiveDateTime> {
        self.accepted.map(|report| report.observed_at)
    }

    /// The scenario report to forward to the simulator, if the scenario
    /// branch was accepted with a known phase.
    ///
    /// `Unknown` can only be accepted while the trial is itself `Unknown`;
    /// forwarding it would tell the simulator nothing it does not report.
    pub fn republish(&self) -> Option<StatusReport> {
        self.accepted
            .filter(|report| report.origin == Origin::ScenarioScript && report.phase != Phase::Unknown)
    }
}

/// Merge this tick's reports into the current phase.
///
/// A missing report is treated as [`Phase::Unknown`] observed at `now`.
pub fn reconcile(
    current: Phase,
    simulator: Option<StatusReport>,
    scenario: Option<StatusReport>,
    now: NaiveDateTime,
) -> Reconciliation {
    let simulator = simulator.unwrap_or_else(|| StatusReport::missing(Origin::Simulator, now));
    let scenario = scenario.unwrap_or_else(|| StatusReport::missing(Origin::ScenarioScript, now));

    let candidate = if simulator.phase.index() <= scenario.phase.index() {
        scenario
    } else {
        simulator
    };

    let accepted = candidate.phase.is_at_or_after(current).then_some(candidate);
    Reconciliation { current, accepted }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;

    use super::*;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 21)
            .unwrap()
            .and_hms_milli_opt(14, 5, 9, 0)
            .unwrap()
    }

    fn earlier() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 21)
            .unwrap()
            .and_hms_milli_opt(14, 5, 8, 250)
            .unwrap()
    }

    fn sim(phase: Phase) -> Option<StatusReport> {
        Some(StatusReport::new(Origin::Simulator, phase, earlier()))
    }

    fn scen(phase: Phase) -> Option<StatusReport> {
        Some(StatusReport::new(Origin::ScenarioScript, phase, earlier()))
    }

    #[test]
    fn simulator_ahead_is_accepted_without_republish() {
        let r = reconcile(Phase::Unknown, sim(Phase::Autopilot), None, now());
        assert_eq!(r.next_phase(), Phase::Autopilot);
        assert!(r.changed());
        assert_eq!(r.source_timestamp(), Some(earlier()));
        assert!(r.republish().is_none());
    }

    #[test]
    fn scenario_ahead_is_accepted_and_republished() {
        let r = reconcile(
            Phase::Autopilot,
            sim(Phase::Autopilot),
            scen(Phase::PreAlertAutopilot),
            now(),
        );
        assert_eq!(r.next_phase(), Phase::PreAlertAutopilot);
        let forwarded = r.republish().unwrap();
        assert_eq!(forwarded.phase, Phase::PreAlertAutopilot);
        assert_eq!(forwarded.origin, Origin::ScenarioScript);
    }

    #[test]
    fn tie_goes_to_scenario_and_republishes_without_change() {
        let r = reconcile(Phase::TakeOver, sim(Phase::TakeOver), scen(Phase::TakeOver), now());
        assert!(!r.changed());
        assert_eq!(r.accepted.unwrap().origin, Origin::ScenarioScript);
        assert_eq!(r.republish().unwrap().phase, Phase::TakeOver);
    }

    #[test]
    fn stale_scenario_is_rejected() {
        // Simulator silent, scenario still reporting an earlier phase.
        let r = reconcile(Phase::TakeOver, None, scen(Phase::Autopilot), now());
        assert_eq!(r.next_phase(), Phase::TakeOver);
        assert!(r.accepted.is_none());
        assert!(r.republish().is_none());
    }

    #[test]
    fn stale_simulator_is_rejected() {
        let r = reconcile(Phase::ResumedAutopilot, sim(Phase::TakeOver), None, now());
        assert_eq!(r.next_phase(), Phase::ResumedAutopilot);
        assert!(r.accepted.is_none());
    }

    #[test]
    fn both_missing_from_unknown_accepts_unknown_at_now() {
        let r = reconcile(Phase::Unknown, None, None, now());
        assert!(!r.changed());
        assert_eq!(r.source_timestamp(), Some(now()));
        assert!(r.republish().is_none());
    }

    #[test]
    fn reported_unknown_from_scenario_is_not_forwarded() {
        let r = reconcile(Phase::Unknown, None, scen(Phase::Unknown), now());
        assert_eq!(r.accepted.unwrap().origin, Origin::ScenarioScript);
        assert!(!r.changed());
        assert!(r.republish().is_none());
    }

    #[test]
    fn both_missing_mid_trial_is_a_no_op() {
        let r = reconcile(Phase::Autopilot, None, None, now());
        assert_eq!(r.next_phase(), Phase::Autopilot);
        assert!(r.accepted.is_none());
    }

    #[test]
    fn jumps_are_not_filled_in() {
        let r = reconcile(Phase::Autopilot, sim(Phase::TakeOverManual), None, now());
        assert_eq!(r.next_phase(), Phase::TakeOverManual);
    }

    fn any_phase() -> impl Strategy<Value = Phase> {
        prop::sample::select(Phase::ORDERED.to_vec())
    }

    fn any_report(origin: Origin) -> impl Strategy<Value = Option<StatusReport>> {
        prop::option::of(any_phase().prop_map(move |phase| StatusReport::new(origin, phase, earlier())))
    }

    proptest! {
        #[test]
        fn merge_never_regresses(
            current in any_phase(),
            simulator in any_report(Origin::Simulator),
            scenario in any_report(Origin::ScenarioScript),
        ) {
            let r = reconcile(current, simulator, scenario, now());
            prop_assert!(r.next_phase().is_at_or_after(current));
        }

        #[test]
        fn sequences_stay_monotonic(
            reports in prop::collection::vec(
                (any_report(Origin::Simulator), any_report(Origin::ScenarioScript)),
                0..40,
            ),
        ) {
            let mut current = Phase::Unknown;
            for (simulator, scenario) in reports {
                let next = reconcile(current, simulator, scenario, now()).next_phase();
                prop_assert!(next.is_at_or_after(current));
                current = next;
            }
        }

        #[test]
        fn reports_at_or_behind_current_are_no_ops(
            current in any_phase(),
            sim_phase in any_phase(),
            scen_phase in any_phase(),
        ) {
            prop_assume!(current.is_at_or_after(sim_phase) && current.is_at_or_after(scen_phase));
            let r = reconcile(current, sim(sim_phase), scen(scen_phase), now());
            prop_assert_eq!(r.next_phase(), current);
            prop_assert!(!r.changed());
        }

        #[test]
        fn next_phase_is_one_of_the_inputs(
            current in any_phase(),
            simulator in any_report(Origin::Simulator),
            scenario in any_report(Origin::ScenarioScript),
        ) {
            let next = reconcile(current, simulator, scenario, now()).next_phase();
            let candidates = [
                Some(current),
                simulator.map(|r| r.phase),
                scenario.map(|r| r.phase),
                Some(Phase::Unknown),
            ];
            prop_assert!(candidates.contains(&Some(next)));
        }
    }
}

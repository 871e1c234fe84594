//! Conversion of solver setpoints into admissible range action positions.

use rao_types::{RangeAction, RangeActionActivation};

use crate::problem::setpoint_variable;
use crate::solver::LinearSolution;

/// Reads the setpoint of every range action from a solution. PSTs snap to
/// their nearest tap, other actions are rounded to the unit and clamped to
/// their range. Actions missing from the solution keep their `fallback`
/// setpoint.
pub fn round_setpoints(
    range_actions: &[RangeAction],
    solution: &LinearSolution,
    fallback: &RangeActionActivation,
) -> RangeActionActivation {
    let mut rounded = RangeActionActivation::new();
    for ra in range_actions {
        let Some(raw) = solution
            .value(&setpoint_variable(&ra.id))
            .or_else(|| fallback.setpoint(&ra.id))
        else {
            continue;
        };
        match ra.nearest_tap(raw) {
            Some(tap) => rounded.set(ra.id.clone(), tap.angle, Some(tap.tap)),
            None => rounded.set(ra.id.clone(), ra.clamp(raw.round()), None),
        }
    }
    rounded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::LinearProblemStatus;
    use rao_types::PstTap;
    use std::collections::HashMap;

    #[test]
    fn psts_snap_and_others_clamp() {
        let pst = RangeAction::pst(
            "pst",
            "PST",
            vec![PstTap { tap: 0, angle: 0.0 }, PstTap { tap: 1, angle: 2.5 }, PstTap { tap: 2, angle: 5.0 }],
        );
        let hvdc = RangeAction::hvdc("hvdc", "HVDC", -100.0, 100.0);
        let injection = RangeAction::injection("inj", "GEN", 0.0, 50.0);

        let mut values = HashMap::new();
        values.insert("setpoint_pst".to_string(), 3.9);
        values.insert("setpoint_hvdc".to_string(), 99.7);
        let solution = LinearSolution {
            status: LinearProblemStatus::Optimal,
            values,
        };
        let mut fallback = RangeActionActivation::new();
        fallback.set("inj", 20.0, None);

        let rounded = round_setpoints(&[pst, hvdc, injection], &solution, &fallback);
        assert_eq!(rounded.setpoint("pst"), Some(5.0));
        assert_eq!(rounded.tap("pst"), Some(2));
        assert_eq!(rounded.setpoint("hvdc"), Some(100.0));
        assert_eq!(rounded.setpoint("inj"), Some(20.0));
        assert_eq!(rounded.tap("inj"), None);
    }
}

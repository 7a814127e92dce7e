//! Master/individual duality.
//!
//! Step, pattern, tempo-division, sync and percentage edits are per-sequencer
//! state on the controller, so a master-row edit becomes one `set` batch that
//! names every rendered sequencer. Only the tempo interval and start/stop
//! address the controller's master target.

use thiserror::Error;

use crate::command::{self, SetCommandBuilder};
use crate::division::{self, Division};
use crate::pattern::{Pattern, StepRng};
use crate::protocol::{Attribute, Outbound};
use crate::surface::{ControlSurface, LinkedInput, RowControls, DEFAULT_PERCENTAGE};
use crate::EntityId;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SelectDivision(String),
    /// Force the playhead to a 0-based step.
    AuditionStep(usize),
    ToggleStep { step: usize, armed: bool },
    /// 1-based loop point.
    SelectLoopPoint(usize),
    SetSync(bool),
    SetPercentage { input: LinkedInput, value: f64 },
    ResetPercentage,
    ApplyPattern(Pattern),
    /// Steps the playhead advances per tick; negative runs backwards.
    SetStepSize(i64),
    Start,
    Stop,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelectDivision(_) => "select_division",
            Self::AuditionStep(_) => "audition_step",
            Self::ToggleStep { .. } => "toggle_step",
            Self::SelectLoopPoint(_) => "select_loop_point",
            Self::SetSync(_) => "set_sync",
            Self::SetPercentage { .. } => "set_percentage",
            Self::ResetPercentage => "reset_percentage",
            Self::ApplyPattern(_) => "apply_pattern",
            Self::SetStepSize(_) => "set_step_size",
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FanOutError {
    #[error("unknown sequencer: {0}")]
    UnknownSequencer(String),
    #[error("unknown tempo division: {0}")]
    UnknownDivision(String),
    #[error("no sequencers rendered")]
    NoTargets,
}

/// Resolves control actions into `set` batches and mirrors them onto the
/// local widgets without waiting for the next poll.
#[derive(Debug, Default)]
pub struct FanOut {
    rng: StepRng,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StepRng::seeded(seed),
        }
    }

    pub fn apply(
        &mut self,
        surface: &mut ControlSurface,
        scope: &EntityId,
        action: &Action,
    ) -> Result<Outbound, FanOutError> {
        let division = match action {
            Action::SelectDivision(name) => Some(
                division::by_name(name)
                    .ok_or_else(|| FanOutError::UnknownDivision(name.clone()))?,
            ),
            _ => None,
        };

        // The target list is fixed here, from what was rendered.
        let targets = match scope {
            EntityId::Master => surface.roster(),
            EntityId::Sequencer(id) => {
                if surface.row(id).is_none() {
                    return Err(FanOutError::UnknownSequencer(id.clone()));
                }
                vec![id.clone()]
            }
        };
        if targets.is_empty() {
            return Err(FanOutError::NoTargets);
        }

        if *scope == EntityId::Master {
            mirror_master_row(surface.master_mut(), action, division, &mut self.rng);
        }

        let mut builder = SetCommandBuilder::new();
        for id in targets {
            let Some(row) = surface.row_mut(&id) else {
                continue;
            };
            let attribute = mirror_row(row, action, division, &mut self.rng);
            builder.push(EntityId::Sequencer(id), vec![attribute]);
        }
        Ok(builder.build())
    }
}

fn mirror_row(
    row: &mut RowControls,
    action: &Action,
    division: Option<&'static Division>,
    rng: &mut StepRng,
) -> Attribute {
    match action {
        Action::SelectDivision(_) => {
            let multiplier = division.map(|d| d.multiplier).unwrap_or(1.0);
            if let Some(division) = division {
                row.select_division(division);
            }
            Attribute::Multiplier { value: multiplier }
        }
        Action::AuditionStep(step) => {
            row.highlight(Some(*step));
            Attribute::Index { value: *step }
        }
        Action::ToggleStep { step, armed } => {
            row.set_step(*step, *armed);
            Attribute::Step {
                index: *step,
                value: *armed,
            }
        }
        Action::SelectLoopPoint(point) => {
            row.select_loop_point(*point);
            Attribute::LoopPoint { value: *point }
        }
        Action::SetSync(sync) => {
            row.set_sync(*sync);
            Attribute::Sync { value: *sync }
        }
        Action::SetPercentage { input, value } => {
            row.percentage_mut().edit(*input, *value);
            Attribute::Percentage { value: *value }
        }
        Action::ResetPercentage => {
            row.percentage_mut().set(DEFAULT_PERCENTAGE);
            Attribute::Percentage {
                value: DEFAULT_PERCENTAGE,
            }
        }
        Action::ApplyPattern(pattern) => {
            let steps = pattern.render(row.length(), rng);
            row.set_steps(steps.clone());
            Attribute::State { value: steps }
        }
        // No widget for these; the next snapshot shows their effect.
        Action::SetStepSize(step_size) => Attribute::StepSize { value: *step_size },
        Action::Start => Attribute::Start,
        Action::Stop => Attribute::Stop,
    }
}

// The master row has no controller identity and no playhead of its own to
// move. A random pattern differs per sequencer, so it is not mirrored here.
fn mirror_master_row(
    row: &mut RowControls,
    action: &Action,
    division: Option<&'static Division>,
    rng: &mut StepRng,
) {
    match action {
        Action::AuditionStep(_) => {}
        Action::ApplyPattern(pattern) if !pattern.is_deterministic() => {}
        _ => {
            mirror_row(row, action, division, rng);
        }
    }
}

/// The controller's true master target: tempo interval and global transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct MasterTransport;

impl MasterTransport {
    pub fn set_bpm(surface: &mut ControlSurface, input: LinkedInput, bpm: f64) -> Outbound {
        surface.bpm_mut().edit(input, bpm);
        command::set_master_interval(bpm)
    }

    pub fn start_all() -> Outbound {
        command::start_all()
    }

    pub fn stop_all() -> Outbound {
        command::stop_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::status_data;
    use crate::protocol::TargetKind;

    fn surface(ids: &[&str]) -> ControlSurface {
        ControlSurface::build(&status_data(ids, 8))
    }

    fn every_master_action() -> Vec<Action> {
        vec![
            Action::SelectDivision("8T".to_string()),
            Action::AuditionStep(2),
            Action::ToggleStep {
                step: 4,
                armed: true,
            },
            Action::SelectLoopPoint(5),
            Action::SetSync(true),
            Action::SetPercentage {
                input: LinkedInput::Slider,
                value: 1.25,
            },
            Action::ResetPercentage,
            Action::ApplyPattern(Pattern::EveryNth(2)),
            Action::ApplyPattern(Pattern::Random),
            Action::ApplyPattern(Pattern::Clear),
            Action::SetStepSize(-1),
            Action::Start,
            Action::Stop,
        ]
    }

    #[test]
    fn master_actions_fan_out_to_every_sequencer_and_never_master() {
        let mut fanout = FanOut::with_seed(3);
        for action in every_master_action() {
            let mut surface = surface(&["a", "b", "c"]);
            let command = fanout
                .apply(&mut surface, &EntityId::Master, &action)
                .expect("fan out");

            assert_eq!(command.kind(), "set", "{}", action.as_str());
            let targets = command.targets();
            let ids: Vec<_> = targets.iter().filter_map(|t| t.id.as_deref()).collect();
            assert_eq!(ids, vec!["a", "b", "c"], "{}", action.as_str());
            assert!(targets.iter().all(|t| t.kind == TargetKind::Sequencer));
            assert!(targets.iter().all(|t| t.attributes.len() == 1));
        }
    }

    #[test]
    fn sequencer_scope_addresses_only_that_sequencer() {
        let mut fanout = FanOut::with_seed(3);
        let mut surface = surface(&["a", "b"]);
        let command = fanout
            .apply(&mut surface, &EntityId::sequencer("b"), &Action::SetSync(true))
            .expect("fan out");

        assert_eq!(command.targets().len(), 1);
        assert_eq!(command.targets()[0].id.as_deref(), Some("b"));
        assert!(surface.row("b").expect("b").sync());
        assert!(!surface.row("a").expect("a").sync());
        assert!(!surface.master().sync());
    }

    #[test]
    fn step_size_and_run_state_address_one_sequencer_without_widget_changes() {
        let mut fanout = FanOut::with_seed(3);
        let mut surface = surface(&["a", "b"]);
        let before = surface.clone();

        let command = fanout
            .apply(&mut surface, &EntityId::sequencer("a"), &Action::SetStepSize(2))
            .expect("step size");
        assert_eq!(command.targets()[0].id.as_deref(), Some("a"));
        assert_eq!(
            command.targets()[0].attributes,
            vec![Attribute::StepSize { value: 2 }]
        );

        let command = fanout
            .apply(&mut surface, &EntityId::sequencer("a"), &Action::Stop)
            .expect("stop");
        assert_eq!(command.targets()[0].attributes, vec![Attribute::Stop]);
        assert_eq!(surface, before);
    }

    #[test]
    fn master_step_toggle_mirrors_every_row() {
        let mut fanout = FanOut::new();
        let mut surface = surface(&["a", "b"]);
        fanout
            .apply(
                &mut surface,
                &EntityId::Master,
                &Action::ToggleStep {
                    step: 6,
                    armed: true,
                },
            )
            .expect("fan out");

        assert!(surface.master().steps()[6]);
        for row in surface.rows() {
            assert!(row.controls.steps()[6], "{}", row.id);
        }
    }

    #[test]
    fn pattern_scenario_every_third_clear_and_loop_point() {
        let mut fanout = FanOut::new();
        let mut surface = surface(&["A"]);
        let scope = EntityId::sequencer("A");

        let command = fanout
            .apply(&mut surface, &scope, &Action::ApplyPattern(Pattern::EveryNth(3)))
            .expect("every 3");
        let expected = vec![true, false, false, true, false, false, true, false];
        assert_eq!(
            command.targets()[0].attributes,
            vec![Attribute::State {
                value: expected.clone()
            }]
        );
        assert_eq!(surface.row("A").expect("A").steps(), expected.as_slice());

        fanout
            .apply(&mut surface, &scope, &Action::ApplyPattern(Pattern::Clear))
            .expect("clear");
        assert_eq!(surface.row("A").expect("A").steps(), &[false; 8]);

        fanout
            .apply(&mut surface, &scope, &Action::SelectLoopPoint(5))
            .expect("loop 5");
        let command = fanout
            .apply(&mut surface, &scope, &Action::SelectLoopPoint(3))
            .expect("loop 3");
        assert_eq!(surface.row("A").expect("A").loop_point(), Some(3));
        assert_eq!(
            command.targets()[0].attributes,
            vec![Attribute::LoopPoint { value: 3 }]
        );
    }

    #[test]
    fn division_selection_sets_multiplier_and_radio() {
        let mut fanout = FanOut::new();
        let mut surface = surface(&["a", "b"]);
        let command = fanout
            .apply(
                &mut surface,
                &EntityId::Master,
                &Action::SelectDivision("16".to_string()),
            )
            .expect("fan out");

        for target in command.targets() {
            assert_eq!(target.attributes, vec![Attribute::Multiplier { value: 4.0 }]);
        }
        assert_eq!(surface.master().division().map(|d| d.name), Some("16"));
        assert_eq!(surface.row("a").and_then(|r| r.division()).map(|d| d.name), Some("16"));

        let err = fanout
            .apply(
                &mut surface,
                &EntityId::Master,
                &Action::SelectDivision("64".to_string()),
            )
            .expect_err("unknown division");
        assert_eq!(err, FanOutError::UnknownDivision("64".to_string()));
        assert_eq!(surface.master().division().map(|d| d.name), Some("16"));
    }

    #[test]
    fn percentage_edit_keeps_both_controls_equal_everywhere() {
        let mut fanout = FanOut::new();
        let mut surface = surface(&["a", "b"]);
        fanout
            .apply(
                &mut surface,
                &EntityId::Master,
                &Action::SetPercentage {
                    input: LinkedInput::Number,
                    value: 0.8,
                },
            )
            .expect("fan out");

        let master = surface.master().percentage();
        assert_eq!((master.slider(), master.number()), (0.8, 0.8));
        for row in surface.rows() {
            let pct = row.controls.percentage();
            assert_eq!((pct.slider(), pct.number()), (0.8, 0.8));
        }

        let command = fanout
            .apply(&mut surface, &EntityId::sequencer("a"), &Action::ResetPercentage)
            .expect("reset");
        assert_eq!(
            command.targets()[0].attributes,
            vec![Attribute::Percentage { value: 1.0 }]
        );
        assert_eq!(surface.row("a").expect("a").percentage().value(), 1.0);
        assert_eq!(surface.row("b").expect("b").percentage().value(), 0.8);
    }

    #[test]
    fn master_random_renders_each_sequencer_at_its_own_length() {
        let mut data = status_data(&["short", "long"], 16);
        data.sequencer_statuses[0] = crate::fixtures::sequencer("short", 4);
        let mut surface = ControlSurface::build(&data);
        let before = surface.master().steps().to_vec();

        let command = FanOut::with_seed(11)
            .apply(
                &mut surface,
                &EntityId::Master,
                &Action::ApplyPattern(Pattern::Random),
            )
            .expect("fan out");

        let lengths: Vec<usize> = command
            .targets()
            .iter()
            .map(|t| match &t.attributes[0] {
                Attribute::State { value } => value.len(),
                other => panic!("unexpected attribute {other:?}"),
            })
            .collect();
        assert_eq!(lengths, vec![4, 16]);
        assert_eq!(surface.master().steps(), before.as_slice());
    }

    #[test]
    fn unknown_sequencer_and_empty_roster_are_errors() {
        let mut fanout = FanOut::new();
        let mut surface = surface(&["a"]);
        assert_eq!(
            fanout.apply(&mut surface, &EntityId::sequencer("zz"), &Action::SetSync(true)),
            Err(FanOutError::UnknownSequencer("zz".to_string()))
        );

        let mut empty = surface_with_no_sequencers();
        assert_eq!(
            fanout.apply(&mut empty, &EntityId::Master, &Action::SetSync(true)),
            Err(FanOutError::NoTargets)
        );
    }

    fn surface_with_no_sequencers() -> ControlSurface {
        ControlSurface::build(&status_data(&[], 8))
    }

    #[test]
    fn transport_addresses_only_the_master_target() {
        let mut surface = surface(&["a", "b"]);
        let command = MasterTransport::set_bpm(&mut surface, LinkedInput::Slider, 60.0);
        assert_eq!(command.targets().len(), 1);
        assert_eq!(command.targets()[0].kind, TargetKind::Master);
        assert_eq!(
            command.targets()[0].attributes,
            vec![Attribute::Interval { value: 1.0 }]
        );
        assert_eq!(surface.bpm().number(), 60.0);
        assert_eq!(surface.bpm().slider(), 60.0);

        assert_eq!(MasterTransport::start_all(), Outbound::StartAll);
        assert_eq!(MasterTransport::stop_all(), Outbound::StopAll);
    }
}

use crate::protocol::{Attribute, Outbound, Target, TargetKind};
use crate::EntityId;

fn into_target(entity: EntityId, attributes: Vec<Attribute>) -> Target {
    match entity {
        EntityId::Master => Target {
            kind: TargetKind::Master,
            id: None,
            attributes,
        },
        EntityId::Sequencer(id) => Target {
            kind: TargetKind::Sequencer,
            id: Some(id),
            attributes,
        },
    }
}

/// Accumulates addressed attribute changes into one `set` batch.
///
/// Values pass through untouched; range checks belong to the controller.
#[derive(Debug, Default, Clone)]
pub struct SetCommandBuilder {
    targets: Vec<Target>,
}

impl SetCommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(mut self, entity: EntityId, attributes: Vec<Attribute>) -> Self {
        self.push(entity, attributes);
        self
    }

    pub fn push(&mut self, entity: EntityId, attributes: Vec<Attribute>) {
        self.targets.push(into_target(entity, attributes));
    }

    pub fn build(self) -> Outbound {
        Outbound::Set {
            targets: self.targets,
        }
    }
}

pub fn build_set_command<I>(targets: I) -> Outbound
where
    I: IntoIterator<Item = (EntityId, Vec<Attribute>)>,
{
    let mut builder = SetCommandBuilder::new();
    for (entity, attributes) in targets {
        builder.push(entity, attributes);
    }
    builder.build()
}

pub fn interval_from_bpm(bpm: f64) -> f64 {
    60.0 / bpm
}

pub fn bpm_from_interval(interval: f64) -> f64 {
    60.0 / interval
}

pub fn set_master_interval(bpm: f64) -> Outbound {
    SetCommandBuilder::new()
        .target(
            EntityId::Master,
            vec![Attribute::Interval {
                value: interval_from_bpm(bpm),
            }],
        )
        .build()
}

pub fn start_all() -> Outbound {
    Outbound::StartAll
}

pub fn stop_all() -> Outbound {
    Outbound::StopAll
}

use std::collections::BTreeSet;

use crate::{EntityId, SequencerStatus, StatusData};

/// Local mirror of the controller's last snapshot.
///
/// Records are replaced wholesale on every snapshot; nothing is merged.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EntityCache {
    master: Option<SequencerStatus>,
    sequencers: Vec<SequencerStatus>,
    snapshots_applied: u64,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every record and returns the entities whose playhead or loop
    /// point moved. A first sighting counts as moved.
    pub fn apply_status_snapshot(&mut self, snapshot: &StatusData) -> BTreeSet<EntityId> {
        let mut changed = BTreeSet::new();

        let master = &snapshot.master_sequencer_status;
        if position_changed(self.master.as_ref(), master) {
            changed.insert(EntityId::Master);
        }
        self.master = Some(master.clone());

        let previous = std::mem::take(&mut self.sequencers);
        for status in &snapshot.sequencer_statuses {
            let prior = previous.iter().find(|entry| entry.id == status.id);
            if position_changed(prior, status) {
                changed.insert(EntityId::Sequencer(status.id.clone()));
            }
            self.sequencers.push(status.clone());
        }

        self.snapshots_applied += 1;
        changed
    }

    pub fn get(&self, id: &EntityId) -> Option<&SequencerStatus> {
        match id {
            EntityId::Master => self.master.as_ref(),
            EntityId::Sequencer(id) => self.sequencer(id),
        }
    }

    pub fn sequencer(&self, id: &str) -> Option<&SequencerStatus> {
        self.sequencers.iter().find(|entry| entry.id == id)
    }

    pub fn master(&self) -> Option<&SequencerStatus> {
        self.master.as_ref()
    }

    pub fn sequencers(&self) -> &[SequencerStatus] {
        &self.sequencers
    }

    pub fn sequencer_ids(&self) -> Vec<String> {
        self.sequencers.iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn snapshots_applied(&self) -> u64 {
        self.snapshots_applied
    }

    pub fn is_empty(&self) -> bool {
        self.master.is_none() && self.sequencers.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn position_changed(prior: Option<&SequencerStatus>, next: &SequencerStatus) -> bool {
    prior.map_or(true, |prior| {
        prior.index != next.index || prior.loop_point != next.loop_point
    })
}

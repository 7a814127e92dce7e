//! Client-local model of the control widgets.
//!
//! Fan-out actions write here immediately as a prediction; the next snapshot
//! overwrites the per-sequencer rows with what the controller reports.

use crate::command::bpm_from_interval;
use crate::division::{self, Division};
use crate::{SequencerStatus, StatusData};

pub const DEFAULT_BPM: f64 = 120.0;
pub const DEFAULT_PERCENTAGE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkedInput {
    Slider,
    Number,
}

impl LinkedInput {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Slider => "slider",
            Self::Number => "number",
        }
    }
}

/// A value edited through two redundant controls that always agree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkedValue {
    slider: f64,
    number: f64,
}

impl LinkedValue {
    pub fn new(value: f64) -> Self {
        Self {
            slider: value,
            number: value,
        }
    }

    /// The edited control takes the value and the other one follows.
    pub fn edit(&mut self, input: LinkedInput, value: f64) {
        match input {
            LinkedInput::Slider => {
                self.slider = value;
                self.number = self.slider;
            }
            LinkedInput::Number => {
                self.number = value;
                self.slider = self.number;
            }
        }
    }

    pub fn set(&mut self, value: f64) {
        self.edit(LinkedInput::Number, value);
    }

    pub fn value(&self) -> f64 {
        self.number
    }

    pub fn slider(&self) -> f64 {
        self.slider
    }

    pub fn number(&self) -> f64 {
        self.number
    }
}

/// Widgets of one row: step checks, playhead highlight, loop-point radio,
/// tempo-division radio, sync check and the percentage pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RowControls {
    steps: Vec<bool>,
    current: Option<usize>,
    loop_point: Option<usize>,
    division: Option<&'static Division>,
    sync: bool,
    percentage: LinkedValue,
}

impl RowControls {
    pub fn new(length: usize) -> Self {
        Self {
            steps: vec![false; length],
            current: None,
            loop_point: (length > 0).then_some(length),
            division: None,
            sync: false,
            percentage: LinkedValue::new(DEFAULT_PERCENTAGE),
        }
    }

    pub fn from_status(status: &SequencerStatus) -> Self {
        let mut row = Self::new(status.length);
        row.apply_status(status);
        row
    }

    /// Overwrites every widget with the reported record. A new length means a
    /// new step vector, never a partially reused one.
    pub fn apply_status(&mut self, status: &SequencerStatus) {
        self.steps = status.state.clone();
        self.steps.resize(status.length, false);
        self.current = status.display_index();
        self.loop_point = status.selected_loop_point();
        self.division = status.division();
        self.sync = status.sync;
        self.percentage.set(status.percentage);
    }

    pub fn length(&self) -> usize {
        self.steps.len()
    }

    pub fn steps(&self) -> &[bool] {
        &self.steps
    }

    /// Returns false when `step` is not on this row.
    pub fn set_step(&mut self, step: usize, armed: bool) -> bool {
        match self.steps.get_mut(step) {
            Some(slot) => {
                *slot = armed;
                true
            }
            None => false,
        }
    }

    pub fn set_steps(&mut self, steps: Vec<bool>) {
        self.steps = steps;
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn highlight(&mut self, index: Option<usize>) {
        self.current = index.filter(|index| *index < self.length());
    }

    pub fn loop_point(&self) -> Option<usize> {
        self.loop_point
    }

    /// Radio-exclusive: selecting a point deselects the previous one. The
    /// point is clamped to the row the way the controller clamps it.
    pub fn select_loop_point(&mut self, point: usize) {
        let length = self.length();
        self.loop_point = (length > 0).then(|| point.clamp(1, length));
    }

    pub fn division(&self) -> Option<&'static Division> {
        self.division
    }

    pub fn select_division(&mut self, division: &'static Division) {
        self.division = Some(division);
    }

    pub fn sync(&self) -> bool {
        self.sync
    }

    pub fn set_sync(&mut self, sync: bool) {
        self.sync = sync;
    }

    pub fn percentage(&self) -> LinkedValue {
        self.percentage
    }

    pub fn percentage_mut(&mut self) -> &mut LinkedValue {
        &mut self.percentage
    }
}

/// A rendered sequencer row, keyed by the controller's id.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerRow {
    pub id: String,
    pub controls: RowControls,
}

/// Every widget the client shows: the master row (an aggregate with no
/// controller identity), one row per sequencer in handshake order, and the
/// master tempo pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSurface {
    master: RowControls,
    rows: Vec<SequencerRow>,
    bpm: LinkedValue,
}

impl ControlSurface {
    pub fn build(data: &StatusData) -> Self {
        let master_status = &data.master_sequencer_status;
        let mut master = RowControls::new(master_status.length);
        master.highlight(master_status.display_index());
        if let Some(division) = division::by_name(division::DEFAULT_DIVISION) {
            master.select_division(division);
        }

        let rows = data
            .sequencer_statuses
            .iter()
            .map(|status| SequencerRow {
                id: status.id.clone(),
                controls: RowControls::from_status(status),
            })
            .collect();

        let bpm = master_status
            .interval
            .filter(|interval| interval.is_finite() && *interval > 0.0)
            .map(bpm_from_interval)
            .unwrap_or(DEFAULT_BPM);

        Self {
            master,
            rows,
            bpm: LinkedValue::new(bpm),
        }
    }

    /// Authoritative overwrite of the rendered rows. Sequencers that were not
    /// rendered at build time are not added.
    pub fn apply_snapshot(&mut self, data: &StatusData) {
        self.master
            .highlight(data.master_sequencer_status.display_index());
        for status in &data.sequencer_statuses {
            if let Some(row) = self.row_mut(&status.id) {
                row.apply_status(status);
            }
        }
    }

    pub fn master(&self) -> &RowControls {
        &self.master
    }

    pub fn master_mut(&mut self) -> &mut RowControls {
        &mut self.master
    }

    pub fn rows(&self) -> &[SequencerRow] {
        &self.rows
    }

    pub fn row(&self, id: &str) -> Option<&RowControls> {
        self.rows
            .iter()
            .find(|row| row.id == id)
            .map(|row| &row.controls)
    }

    pub fn row_mut(&mut self, id: &str) -> Option<&mut RowControls> {
        self.rows
            .iter_mut()
            .find(|row| row.id == id)
            .map(|row| &mut row.controls)
    }

    /// Ids of the rendered sequencers, the fan-out target list.
    pub fn roster(&self) -> Vec<String> {
        self.rows.iter().map(|row| row.id.clone()).collect()
    }

    pub fn bpm(&self) -> LinkedValue {
        self.bpm
    }

    pub fn bpm_mut(&mut self) -> &mut LinkedValue {
        &mut self.bpm
    }
}

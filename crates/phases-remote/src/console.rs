//! Line-oriented operator console. Steps and loop points are typed 1-based.

use std::collections::BTreeSet;
use std::io::Write;

use phases_core::{
    fanout::Action,
    pattern::Pattern,
    surface::{ControlSurface, LinkedInput, RowControls},
    view::{ConnectionState, ViewRenderer},
    EntityId,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::session::Intent;

pub const HELP: &str = "\
commands:
  connect | show | start | stop | quit
  bpm <n>
  master <control>          fan out to every sequencer
  seq <id> <control>        one sequencer
controls:
  div <WT|W|HT|H|Q|QT|8|8T|16|8Q|16T|32>
  step <n> on|off   goto <n>   loop <n>
  sync on|off   pct <value>|reset
  every <1-8>   random   clear
  stepsize <n>   start   stop";

pub fn parse_intent(line: &str) -> Result<Intent, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((head, rest)) = words.split_first() else {
        return Err("empty command".to_string());
    };
    match (head.to_ascii_lowercase().as_str(), rest) {
        ("connect" | "reconnect", []) => Ok(Intent::Connect),
        ("start", []) => Ok(Intent::StartAll),
        ("stop", []) => Ok(Intent::StopAll),
        ("show", []) => Ok(Intent::Show),
        ("quit" | "exit", []) => Ok(Intent::Quit),
        ("bpm", [value]) => {
            let bpm = parse_number(value)?;
            if bpm <= 0.0 {
                return Err(format!("bpm must be positive: {value}"));
            }
            Ok(Intent::SetBpm {
                input: LinkedInput::Number,
                bpm,
            })
        }
        ("master", control) => Ok(Intent::Control {
            scope: EntityId::Master,
            action: parse_action(control)?,
        }),
        ("seq", [id, control @ ..]) => Ok(Intent::Control {
            scope: EntityId::sequencer(*id),
            action: parse_action(control)?,
        }),
        _ => Err(format!("unknown command: {line}")),
    }
}

fn parse_action(words: &[&str]) -> Result<Action, String> {
    let Some((head, rest)) = words.split_first() else {
        return Err("missing control".to_string());
    };
    match (head.to_ascii_lowercase().as_str(), rest) {
        ("div", [name]) => Ok(Action::SelectDivision((*name).to_string())),
        ("step", [step, armed]) => Ok(Action::ToggleStep {
            step: parse_position(step)? - 1,
            armed: parse_switch(armed)?,
        }),
        ("goto", [step]) => Ok(Action::AuditionStep(parse_position(step)? - 1)),
        ("loop", [point]) => Ok(Action::SelectLoopPoint(parse_position(point)?)),
        ("sync", [value]) => Ok(Action::SetSync(parse_switch(value)?)),
        ("pct", [value]) if value.eq_ignore_ascii_case("reset") => Ok(Action::ResetPercentage),
        ("pct", [value]) => Ok(Action::SetPercentage {
            input: LinkedInput::Number,
            value: parse_number(value)?,
        }),
        ("every", [n]) => {
            let n: u8 = n.parse().map_err(|_| format!("not a step count: {n}"))?;
            Pattern::every(n)
                .map(Action::ApplyPattern)
                .ok_or_else(|| format!("every takes 1 to 8, got {n}"))
        }
        ("random", []) => Ok(Action::ApplyPattern(Pattern::Random)),
        ("clear", []) => Ok(Action::ApplyPattern(Pattern::Clear)),
        ("stepsize", [n]) => n
            .parse::<i64>()
            .map(Action::SetStepSize)
            .map_err(|_| format!("not a step size: {n}")),
        ("start", []) => Ok(Action::Start),
        ("stop", []) => Ok(Action::Stop),
        _ => Err(format!("unknown control: {}", words.join(" "))),
    }
}

fn parse_position(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(format!("positions start at 1: {value}")),
    }
}

fn parse_switch(value: &str) -> Result<bool, String> {
    crate::config::parse_bool_env(value).ok_or_else(|| format!("expected on or off: {value}"))
}

fn parse_number(value: &str) -> Result<f64, String> {
    value
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| format!("not a number: {value}"))
}

/// Reads operator lines from stdin until EOF, which counts as quit.
pub async fn read_intents(tx: mpsc::Sender<Intent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "help" {
                    println!("{HELP}");
                    continue;
                }
                match parse_intent(line) {
                    Ok(intent) => {
                        if tx.send(intent).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => eprintln!("{err} (try `help`)"),
                }
            }
            Ok(None) => {
                let _ = tx.send(Intent::Quit).await;
                break;
            }
            Err(err) => {
                warn!("stdin_read_error: {err}");
                let _ = tx.send(Intent::Quit).await;
                break;
            }
        }
    }
}

/// Plain-text view of the control surface.
pub struct TextRenderer<W> {
    out: W,
    refreshes: u64,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, refreshes: 0 }
    }
}

impl<W: Write> ViewRenderer for TextRenderer<W> {
    fn rebuild(&mut self, surface: &ControlSurface) {
        let _ = writeln!(self.out, "{}", render_surface(surface));
        let _ = self.out.flush();
    }

    /// Reprints only the rows whose playhead, loop point or local mirror
    /// moved.
    fn refresh(&mut self, surface: &ControlSurface, changed: &BTreeSet<EntityId>) {
        self.refreshes += 1;
        debug!(event = "view_refresh", changed = changed.len(), refreshes = self.refreshes);
        for id in changed {
            let line = match id {
                EntityId::Master => Some(render_row("master", surface.master())),
                EntityId::Sequencer(id) => surface.row(id).map(|row| render_row(id, row)),
            };
            if let Some(line) = line {
                let _ = writeln!(self.out, "{line}");
            }
        }
        let _ = self.out.flush();
    }

    fn connection_changed(&mut self, state: ConnectionState) {
        let _ = writeln!(self.out, "[{state}]");
        let _ = self.out.flush();
    }
}

pub fn render_surface(surface: &ControlSurface) -> String {
    let bpm = surface.bpm();
    let mut lines = vec![format!("bpm {:.1}", bpm.value())];
    lines.push(render_row("master", surface.master()));
    for row in surface.rows() {
        lines.push(render_row(&row.id, &row.controls));
    }
    lines.join("\n")
}

/// `x` armed, `.` idle; the playhead step is upper-cased as `X` or `o`.
pub fn render_row(label: &str, row: &RowControls) -> String {
    let steps: String = row
        .steps()
        .iter()
        .enumerate()
        .map(|(i, armed)| match (row.current() == Some(i), *armed) {
            (true, true) => 'X',
            (true, false) => 'o',
            (false, true) => 'x',
            (false, false) => '.',
        })
        .collect();
    let loop_point = row
        .loop_point()
        .map(|point| point.to_string())
        .unwrap_or_else(|| "-".to_string());
    let division = row.division().map(|division| division.name).unwrap_or("-");
    format!(
        "{label:<10} [{steps}] loop {loop_point} div {division} sync {} pct {:.2}",
        if row.sync() { "on" } else { "off" },
        row.percentage().value()
    )
}

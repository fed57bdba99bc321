//! Per-game artifacts: round rows, the payout summary and the raw history

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use round_logic::{MatchHistory, Role};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::group::GroupId;

/// One participant's view of one settled round
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRow {
    pub group: GroupId,
    pub treatment: String,
    pub round: u32,
    pub participant: String,
    pub role: Role,
    pub decision: String,
    pub payoff: u32,
    pub bank: u32,
    pub defaulted: bool,
    pub bot: bool,
}

/// Final payout line for a human participant
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub access_code: String,
    pub exit_code: String,
    pub bonus: f64,
    pub show_up_fee: f64,
    pub terminated: bool,
}

/// Everything a finished game leaves behind
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameReport {
    pub group: GroupId,
    pub treatment: String,
    pub terminated: bool,
    pub rounds: Vec<RoundRow>,
    pub summary: Vec<SummaryRow>,
    pub history: MatchHistory,
}

impl GameReport {
    pub fn rounds_csv(&self) -> String {
        let mut out = csv_line(&[
            "group",
            "treatment",
            "round",
            "participant",
            "role",
            "decision",
            "payoff",
            "bank",
            "defaulted",
            "bot",
        ]);
        for row in &self.rounds {
            out.push_str(&csv_line(&[
                &row.group.0.to_string(),
                &row.treatment,
                &row.round.to_string(),
                &row.participant,
                &row.role.to_string(),
                &row.decision,
                &row.payoff.to_string(),
                &row.bank.to_string(),
                &row.defaulted.to_string(),
                &row.bot.to_string(),
            ]));
        }
        out
    }

    pub fn summary_csv(&self) -> String {
        let mut out = csv_line(&["access", "exit", "bonus", "show_up_fee", "terminated"]);
        for row in &self.summary {
            out.push_str(&csv_line(&[
                &row.access_code,
                &row.exit_code,
                &format!("{:.2}", row.bonus),
                &format!("{:.2}", row.show_up_fee),
                &row.terminated.to_string(),
            ]));
        }
        out
    }
}

/// Quote a field when it holds a separator, a quote or a line break
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields.iter().map(|f| csv_field(f.as_ref())).collect::<Vec<_>>().join(",");
    line.push('\n');
    line
}

/// Where finished games are stored
pub trait Archive {
    fn store(&mut self, report: &GameReport) -> Result<()>;
}

/// Keeps reports in memory
#[derive(Debug, Default)]
pub struct MemoryArchive {
    reports: Vec<GameReport>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> &[GameReport] {
        &self.reports
    }
}

impl Archive for MemoryArchive {
    fn store(&mut self, report: &GameReport) -> Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}

/// Writes each game to `<root>/<group>/`:
/// `rounds.csv`, `bonus.csv`, `bonus.json` and `history.json`
#[derive(Debug, Clone)]
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn game_dir(&self, group: GroupId) -> PathBuf {
        self.root.join(group.to_string())
    }
}

impl Archive for DirectoryArchive {
    fn store(&mut self, report: &GameReport) -> Result<()> {
        let dir = self.game_dir(report.group);
        fs::create_dir_all(&dir)?;

        write_file(&dir.join("rounds.csv"), report.rounds_csv().as_bytes())?;
        write_file(&dir.join("bonus.csv"), report.summary_csv().as_bytes())?;
        write_file(&dir.join("bonus.json"), &serde_json::to_vec_pretty(&report.summary)?)?;
        write_file(&dir.join("history.json"), &serde_json::to_vec_pretty(&report.history)?)?;

        tracing::info!(group = %report.group, dir = %dir.display(), "game archived");
        Ok(())
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    Ok(())
}

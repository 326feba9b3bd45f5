use std::fmt::{self, Write};
use std::time::Duration;

use serde::Deserialize;

/// Scenarios in the order they always run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    Strings,
    #[serde(alias = "increment")]
    Counters,
    Lists,
    Hashes,
    Sets,
    #[serde(alias = "zsets")]
    SortedSets,
    Pipeline,
    #[serde(alias = "pub-sub")]
    Pubsub,
}

impl Scenario {
    pub const ALL: [Scenario; 8] = [
        Scenario::Strings,
        Scenario::Counters,
        Scenario::Lists,
        Scenario::Hashes,
        Scenario::Sets,
        Scenario::SortedSets,
        Scenario::Pipeline,
        Scenario::Pubsub,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Strings => "strings",
            Scenario::Counters => "counters",
            Scenario::Lists => "lists",
            Scenario::Hashes => "hashes",
            Scenario::Sets => "sets",
            Scenario::SortedSets => "sorted-sets",
            Scenario::Pipeline => "pipeline",
            Scenario::Pubsub => "pubsub",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value read back that differs from what was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub key: String,
    pub expected: String,
    pub actual: String,
}

impl Mismatch {
    pub fn new(key: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: expected {}, got {}", self.key, self.expected, self.actual)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub scenario: Scenario,
    /// Commands sent to the server, excluding cleanup.
    pub written: usize,
    /// Values read back and compared.
    pub checked: usize,
    pub mismatches: Vec<Mismatch>,
    pub notes: Vec<String>,
    pub elapsed: Duration,
}

impl Report {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            written: 0,
            checked: 0,
            mismatches: Vec::new(),
            notes: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn mismatch(&mut self, key: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) {
        self.mismatches.push(Mismatch::new(key, expected, actual));
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

pub fn render(reports: &[Report]) -> String {
    let mut out = String::new();

    for report in reports {
        let status = if report.passed() { "ok" } else { "MISMATCH" };
        let _ = writeln!(
            out,
            "[{}] {} - {} written, {} checked in {:.1?}",
            status, report.scenario, report.written, report.checked, report.elapsed
        );
        for note in &report.notes {
            let _ = writeln!(out, "    note: {}", note);
        }
        for mismatch in &report.mismatches {
            let _ = writeln!(out, "    {}", mismatch);
        }
    }

    let passed = reports.iter().filter(|r| r.passed()).count();
    let _ = write!(out, "{}/{} scenarios passed", passed, reports.len());
    out
}

use std::{fmt, time::Instant};

use super::common::{format_elapsed_secs, format_table_with_title};
use crate::pipeline::MessageOutcome;

/// What happened to each message of one run, in processing order
#[derive(Debug)]
pub struct BatchSummary {
    outcomes: Vec<(String, MessageOutcome)>,
    started_at: Instant,
}

impl Default for BatchSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchSummary {
    pub fn new() -> Self {
        BatchSummary {
            outcomes: vec![],
            started_at: Instant::now(),
        }
    }

    pub fn record(&mut self, external_id: &str, outcome: MessageOutcome) {
        self.outcomes.push((external_id.to_string(), outcome));
    }

    pub fn outcome_of(&self, external_id: &str) -> Option<&MessageOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == external_id)
            .map(|(_, outcome)| outcome)
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    fn count(&self, matches: impl Fn(&MessageOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| matches(o)).count()
    }

    pub fn stored(&self) -> usize {
        self.count(|o| matches!(o, MessageOutcome::Stored))
    }

    pub fn defaulted(&self) -> usize {
        self.count(|o| matches!(o, MessageOutcome::Defaulted))
    }

    pub fn duplicates(&self) -> usize {
        self.count(|o| matches!(o, MessageOutcome::Duplicate))
    }

    pub fn irrelevant(&self) -> usize {
        self.count(|o| matches!(o, MessageOutcome::Irrelevant))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, MessageOutcome::Skipped(_)))
    }

    pub fn render_table(&self) -> String {
        let rows: Vec<Vec<String>> = self
            .outcomes
            .iter()
            .map(|(id, outcome)| vec![id.clone(), outcome.to_string()])
            .collect();
        let title = format!(
            "Job application run ({})",
            format_elapsed_secs(self.started_at.elapsed().as_secs())
        );

        format_table_with_title(&title, &["id", "outcome"], &rows)
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} messages: {} stored, {} defaulted, {} duplicate, {} irrelevant, {} skipped",
            self.total(),
            self.stored(),
            self.defaulted(),
            self.duplicates(),
            self.irrelevant(),
            self.skipped()
        )
    }
}

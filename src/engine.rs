//! Rule evaluation and the rule pass.
//!
//! A pass walks the rule set in order. For each rule it asks the store for
//! candidates (messages the rule might match and has never acted on),
//! re-checks every candidate with [`matches`], applies the rule's
//! actions, and commits one execution entry per message that had at least
//! one action applied. The commit is what keeps the message out of the
//! rule's candidates on later passes.

use crate::actions::ActionDispatcher;
use crate::db::Database;
use crate::models::{ActionsTaken, Message, PendingExecution};
use crate::rules::{Condition, MatchMode, Rule, RuleSet};
use crate::source::MessageSource;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

/// Evaluates one condition. Missing message fields and inert conditions are
/// false.
pub fn evaluate(message: &Message, condition: &Condition, now: DateTime<Utc>) -> bool {
    match condition {
        Condition::Text {
            field,
            predicate,
            value,
        } => field
            .value(message)
            .is_some_and(|text| predicate.apply(text, value)),
        Condition::Received { predicate, amount } => {
            predicate.apply(message.received_at(), *amount, now)
        }
        Condition::Inert { reason } => {
            debug!(message_id = %message.id, "Skipping condition: {}", reason);
            false
        }
    }
}

/// Whether `message` satisfies `rule`, with every date condition measured
/// against the same `now`. Rules without conditions never match.
pub fn matches_at(message: &Message, rule: &Rule, now: DateTime<Utc>) -> bool {
    if rule.conditions.is_empty() {
        return false;
    }
    match &rule.mode {
        MatchMode::All => rule.conditions.iter().all(|c| evaluate(message, c, now)),
        MatchMode::Any => rule.conditions.iter().any(|c| evaluate(message, c, now)),
        MatchMode::Invalid(raw) => {
            warn!(rule = %rule.id, predicate = %raw, "Invalid rule predicate");
            false
        }
    }
}

pub fn matches(message: &Message, rule: &Rule) -> bool {
    matches_at(message, rule, Utc::now())
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub rules: usize,
    pub candidates: usize,
    pub matched: usize,
    /// Messages whose execution entry was committed.
    pub processed: usize,
    pub actions_applied: usize,
    pub actions_failed: usize,
    /// Messages whose actions ran but whose execution entry could not be
    /// committed. They will be selected again next pass.
    pub recording_failures: usize,
}

pub struct RuleEngine<S> {
    db: Database,
    dispatcher: ActionDispatcher<S>,
}

impl<S: MessageSource> RuleEngine<S> {
    pub fn new(db: Database, source: S) -> Self {
        Self {
            dispatcher: ActionDispatcher::new(source, db.clone()),
            db,
        }
    }

    pub fn dispatcher(&self) -> &ActionDispatcher<S> {
        &self.dispatcher
    }

    /// Stored messages the rule has not acted on yet and which may match it.
    /// Store failures give no candidates.
    pub async fn select_candidates(&self, rule: &Rule) -> Vec<Message> {
        match self.db.query_for_rule(rule, Utc::now()).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Error retrieving messages for rule {}: {}", rule.id, e);
                Vec::new()
            }
        }
    }

    pub async fn run_pass(&self, rules: &RuleSet) -> PassSummary {
        let mut summary = PassSummary::default();
        for rule in rules {
            self.run_rule(rule, &mut summary).await;
        }
        info!(
            rules = summary.rules,
            candidates = summary.candidates,
            matched = summary.matched,
            actions_applied = summary.actions_applied,
            actions_failed = summary.actions_failed,
            recording_failures = summary.recording_failures,
            "Processed {} messages with rules",
            summary.processed
        );
        summary
    }

    async fn run_rule(&self, rule: &Rule, summary: &mut PassSummary) {
        summary.rules += 1;
        let candidates = self.select_candidates(rule).await;
        summary.candidates += candidates.len();
        debug!(rule = %rule.id, "{} candidates", candidates.len());

        let mut batch = Vec::new();
        for mut message in candidates {
            if !matches(&message, rule) {
                continue;
            }
            summary.matched += 1;

            let mut actions_taken = ActionsTaken::new();
            for action in &rule.actions {
                if self.dispatcher.apply(&mut message, action).await {
                    actions_taken.insert(action.kind.as_str().to_string(), action.value.clone());
                    summary.actions_applied += 1;
                } else {
                    summary.actions_failed += 1;
                }
            }

            if !actions_taken.is_empty() {
                batch.push(PendingExecution {
                    message_id: message.id,
                    rule_id: rule.id.clone(),
                    actions_taken,
                });
            }
        }

        if batch.is_empty() {
            return;
        }
        match self.db.record_executions(&batch).await {
            Ok(written) => {
                debug!(rule = %rule.id, written, "Recorded rule executions");
                summary.processed += batch.len();
            }
            Err(e) => {
                error!("Error recording executions for rule {}: {}", rule.id, e);
                summary.recording_failures += batch.len();
            }
        }
    }
}

//! Async orchestration of an evaluation over the storage seams.
//!
//! The engine decides; this service writes. Violation records are diffed and
//! written first, then the bot comment is rewritten under an exclusive lease
//! keyed by the merge request.

use serde::{Deserialize, Serialize};

use policy_gate_state::{
    BodyDigest, CommentStore, EvaluationLock, ViolationRecord, ViolationStore,
};

use crate::comment::PolicyViolationComment;
use crate::config::PolicyGateConfig;
use crate::details::PolicyViolationDetails;
use crate::domain::{EvaluationInput, Result};
use crate::engine::{self, CommentDirective, EvaluationOutcome};
use crate::lease::with_exclusive_lease;
use crate::obs;
use crate::violations::ViolationChangeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentAction {
    Created,
    Updated,
    Unchanged,
    /// No comment exists and none was needed.
    None,
}

impl CommentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentAction::Created => "created",
            CommentAction::Updated => "updated",
            CommentAction::Unchanged => "unchanged",
            CommentAction::None => "none",
        }
    }
}

/// What one evaluation did to the stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub outcome: EvaluationOutcome,
    pub changes: ViolationChangeSet,
    pub comment_action: CommentAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<BodyDigest>,
}

pub struct PolicyEvaluationService<V, C, L>
where
    V: ViolationStore,
    C: CommentStore,
    L: EvaluationLock,
{
    violations: V,
    comments: C,
    lock: L,
    config: PolicyGateConfig,
}

impl<V, C, L> PolicyEvaluationService<V, C, L>
where
    V: ViolationStore,
    C: CommentStore,
    L: EvaluationLock,
{
    pub fn new(violations: V, comments: C, lock: L, config: PolicyGateConfig) -> Self {
        Self {
            violations,
            comments,
            lock,
            config,
        }
    }

    pub fn config(&self) -> &PolicyGateConfig {
        &self.config
    }

    pub fn violation_store(&self) -> &V {
        &self.violations
    }

    pub fn comment_store(&self) -> &C {
        &self.comments
    }

    /// Evaluate every rule of the change and persist the result.
    pub async fn evaluate(&self, input: &EvaluationInput) -> Result<EvaluationReport> {
        let outcome = engine::evaluate(input, &self.config)?;
        self.persist(input, outcome).await
    }

    /// Record that reports never arrived in time, then persist.
    pub async fn skip_evaluation(&self, input: &EvaluationInput) -> Result<EvaluationReport> {
        let outcome = engine::skip_evaluation(input, &self.config)?;
        self.persist(input, outcome).await
    }

    async fn persist(
        &self,
        input: &EvaluationInput,
        outcome: EvaluationOutcome,
    ) -> Result<EvaluationReport> {
        let merge_request_id = input.change.id;
        let Some(collector) = outcome.collector.as_ref() else {
            return Ok(EvaluationReport {
                changes: ViolationChangeSet {
                    merge_request_id,
                    ..Default::default()
                },
                outcome,
                comment_action: CommentAction::None,
                digest: None,
            });
        };

        let existing = self.violations.list(merge_request_id).await?;
        let changes = collector.apply(&existing);
        for policy_id in &changes.removals {
            self.violations.delete(merge_request_id, *policy_id).await?;
        }
        for record in &changes.upserts {
            self.violations.upsert(record.clone()).await?;
        }
        for event in outcome.audit_events.iter().chain(&changes.audit_events) {
            obs::emit_audit_event(event);
        }

        let records = changes.resulting(&existing);
        let key = input.change.lock_key();
        let (comment_action, digest) = with_exclusive_lease(&self.lock, &key, &self.config.lock, || {
            self.update_comment(input, &outcome.comment_directives, &records)
        })
        .await?;

        Ok(EvaluationReport {
            outcome,
            changes,
            comment_action,
            digest,
        })
    }

    async fn update_comment(
        &self,
        input: &EvaluationInput,
        directives: &[CommentDirective],
        records: &[ViolationRecord],
    ) -> Result<(CommentAction, Option<BodyDigest>)> {
        let merge_request_id = input.change.id;
        let existing = self.comments.find(merge_request_id).await?;
        if directives.is_empty() {
            return Ok((CommentAction::None, existing.map(|c| c.digest)));
        }

        let mut comment = PolicyViolationComment::parse(existing.as_ref().map(|c| c.body.as_str()));
        for directive in directives {
            if directive.violated {
                comment.add_report_type(directive.report_type, directive.requires_approval);
            } else {
                comment.remove_report_type(directive.report_type);
            }
        }

        // Nothing to resolve on a change that never had a comment.
        if existing.is_none() && comment.reports().is_empty() {
            return Ok((CommentAction::None, None));
        }

        let details = PolicyViolationDetails::new(input, records, &self.config);
        let body = comment.body(&details);
        let digest = BodyDigest::from_body(&body);
        if existing.as_ref().map_or(false, |c| c.digest == digest) {
            return Ok((CommentAction::Unchanged, Some(digest)));
        }

        let action = if existing.is_some() {
            CommentAction::Updated
        } else {
            CommentAction::Created
        };
        let written = self.comments.upsert(merge_request_id, body).await?;
        obs::emit_comment_written(merge_request_id, action.as_str(), written.digest.short());
        Ok((action, Some(written.digest)))
    }
}

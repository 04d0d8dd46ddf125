//! Duplicate reply grouping and vote aggregation.
//!
//! The similarity scores come from an external classifier and one-vote-
//! per-user is enforced by an external authority. This module re-checks
//! group membership against the threshold, orders members for display
//! and keeps the local vote tallies consistent.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::StoryDataSource;
use crate::config::DuplicateConfig;
use crate::error::{AggregationError, AppResult, ThresholdViolation};
use crate::model::{DuplicateGroup, DuplicateReply, Reply, VoteChange, VoteDirection, VoteTally};

/// A ranked group plus the members that failed the threshold check.
#[derive(Debug, Clone)]
pub struct RankedGroup {
    pub group: DuplicateGroup,
    /// Members excluded for scoring below the threshold.
    pub violations: Vec<ThresholdViolation>,
}

impl RankedGroup {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Display order: similarity descending, then earlier first, then by id.
pub fn display_order(a: &DuplicateReply, b: &DuplicateReply) -> Ordering {
    b.similarity_score
        .partial_cmp(&a.similarity_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.reply.created_at.cmp(&b.reply.created_at))
        .then_with(|| a.reply.id.cmp(&b.reply.id))
}

/// Build a ranked group for `original` from the classifier's candidates.
///
/// Candidates scoring below `threshold` (or with a non-finite score) are
/// left out and reported as violations. Vote totals are recomputed from
/// the vote sets.
pub fn group_and_rank(
    original: Reply,
    candidates: Vec<DuplicateReply>,
    threshold: f64,
) -> Result<RankedGroup, AggregationError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(AggregationError::InvalidThreshold { threshold });
    }

    let mut seen = HashSet::new();
    let mut violations = Vec::new();
    let mut members = Vec::with_capacity(candidates.len());

    for mut candidate in candidates {
        if candidate.id() == original.id || !seen.insert(candidate.id().to_string()) {
            debug!(reply_id = %candidate.id(), "Skipping repeated duplicate candidate");
            continue;
        }
        let score = candidate.similarity_score;
        if !score.is_finite() || score < threshold {
            let violation = ThresholdViolation {
                reply_id: candidate.id().to_string(),
                score,
                threshold,
            };
            warn!(
                reply_id = %violation.reply_id,
                score = violation.score,
                threshold = violation.threshold,
                "Duplicate below group threshold excluded"
            );
            violations.push(violation);
            continue;
        }
        candidate.votes.recompute();
        members.push(candidate);
    }

    members.sort_by(display_order);

    let mut group = DuplicateGroup::new(original, threshold);
    group.duplicates = members;

    debug!(
        group_id = %group.id,
        members = group.duplicates.len(),
        excluded = violations.len(),
        "Ranked duplicate group"
    );

    Ok(RankedGroup { group, violations })
}

/// Record `user_id`'s vote on `tally`.
pub fn apply_vote(tally: &mut VoteTally, user_id: &str, direction: VoteDirection) -> VoteChange {
    let change = tally.apply(user_id, direction);
    debug!(
        user_id = %user_id,
        direction = %direction,
        change = ?change,
        total_score = tally.total_score,
        "Vote applied"
    );
    change
}

/// Local result of a vote, with the pending submission to the authority.
#[derive(Debug)]
pub struct VoteReceipt {
    pub tally: VoteTally,
    pub change: VoteChange,
    submission: Option<JoinHandle<bool>>,
}

impl VoteReceipt {
    /// Wait for the submission; `true` if the authority accepted it.
    ///
    /// Unchanged votes are not submitted and report `false`.
    pub async fn confirmed(self) -> bool {
        match self.submission {
            Some(handle) => handle.await.unwrap_or(false),
            None => false,
        }
    }
}

/// Loads duplicate groups from the story service and forwards votes.
#[derive(Clone)]
pub struct DuplicateAggregator {
    source: Arc<dyn StoryDataSource>,
    threshold: f64,
}

impl DuplicateAggregator {
    pub fn new(source: Arc<dyn StoryDataSource>, config: &DuplicateConfig) -> Self {
        Self {
            source,
            threshold: config.threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Fetch candidates for `original` and rank them at the default threshold.
    pub async fn load_group(&self, original: Reply) -> AppResult<RankedGroup> {
        self.load_group_with_threshold(original, self.threshold).await
    }

    /// Fetch candidates for `original` and rank them at `threshold`.
    pub async fn load_group_with_threshold(
        &self,
        original: Reply,
        threshold: f64,
    ) -> AppResult<RankedGroup> {
        let candidates = self.source.fetch_duplicate_candidates(&original.id).await?;
        let ranked = group_and_rank(original, candidates, threshold)?;
        info!(
            original_id = %ranked.group.original_reply.id,
            members = ranked.group.duplicates.len(),
            excluded = ranked.violations.len(),
            "Duplicate group loaded"
        );
        Ok(ranked)
    }

    /// Apply a vote locally and forward it to the authority in the background.
    pub fn vote(
        &self,
        group: &mut DuplicateGroup,
        reply_id: &str,
        user_id: &str,
        direction: VoteDirection,
    ) -> Result<VoteReceipt, AggregationError> {
        let reply = group
            .duplicate_mut(reply_id)
            .ok_or_else(|| AggregationError::ReplyNotInGroup {
                reply_id: reply_id.to_string(),
            })?;

        let change = apply_vote(&mut reply.votes, user_id, direction);
        let tally = reply.votes.clone();

        let submission = if change == VoteChange::Unchanged {
            None
        } else {
            self.submit_in_background(reply_id, user_id, direction)
        };

        Ok(VoteReceipt {
            tally,
            change,
            submission,
        })
    }

    /// Replace a member's tally with the one the authority confirmed.
    pub fn reconcile(
        &self,
        group: &mut DuplicateGroup,
        reply_id: &str,
        confirmed: VoteTally,
    ) -> Result<VoteTally, AggregationError> {
        let reply = group
            .duplicate_mut(reply_id)
            .ok_or_else(|| AggregationError::ReplyNotInGroup {
                reply_id: reply_id.to_string(),
            })?;
        reply.votes.reconcile(confirmed);
        Ok(reply.votes.clone())
    }

    fn submit_in_background(
        &self,
        reply_id: &str,
        user_id: &str,
        direction: VoteDirection,
    ) -> Option<JoinHandle<bool>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(reply_id = %reply_id, "No async runtime, vote kept locally only");
                return None;
            }
        };

        let source = Arc::clone(&self.source);
        let reply_id = reply_id.to_string();
        let user_id = user_id.to_string();

        Some(runtime.spawn(async move {
            match source.submit_vote(&reply_id, &user_id, direction).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        reply_id = %reply_id,
                        error = %e,
                        "Vote submission failed, local tally kept until reconcile"
                    );
                    false
                }
            }
        }))
    }
}

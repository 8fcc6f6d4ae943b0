//! Reward verification.
//!
//! Turns accepted judge submissions into time. Each submission id is
//! claimed in the database before the reward is paid, so re-running a
//! verification never pays twice. If paying fails after the claim was
//! recorded, that reward is lost rather than duplicated.
//!
//! The verifier writes through [`TimeBalanceStore::add`] and does not
//! coordinate with a running lock engine; the engine picks the new balance
//! up on its next tick, its next sync while exhausted, or the next
//! restricted-app entry.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::balance::TimeBalanceStore;
use crate::error::{EarnError, Result, ValidationError};
use crate::storage::database::{self, SharedDatabase};
use crate::storage::RewardConfig;

/// Verdict the judge uses for an accepted solution.
pub const ACCEPTED_VERDICT: &str = "OK";

/// Envelope of the judge's `user.status` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeResponse {
    pub status: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub result: Option<Vec<Submission>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: i64,
    #[serde(default)]
    pub contest_id: Option<i64>,
    pub creation_time_seconds: i64,
    pub problem: Problem,
    #[serde(default)]
    pub verdict: Option<String>,
}

impl Submission {
    pub fn is_accepted(&self) -> bool {
        self.verdict.as_deref() == Some(ACCEPTED_VERDICT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(default)]
    pub contest_id: Option<i64>,
    pub index: String,
    pub name: String,
    #[serde(default)]
    pub rating: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Where recent submissions come from.
pub trait SubmissionSource: Send + Sync {
    /// The `count` most recent submissions of `handle`.
    fn recent_submissions(&self, handle: &str, count: u32) -> Result<JudgeResponse>;
}

/// Submissions read from a saved `user.status` response.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SubmissionSource for JsonFileSource {
    fn recent_submissions(&self, _handle: &str, count: u32) -> Result<JudgeResponse> {
        tracing::debug!(path = %self.path.display(), "reading saved submissions");
        let content = std::fs::read_to_string(&self.path)?;
        let mut response: JudgeResponse = serde_json::from_str(&content)?;
        if let Some(result) = response.result.as_mut() {
            result.truncate(count as usize);
        }
        Ok(response)
    }
}

/// Outcome of one verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EarnOutcome {
    Rewarded { problems: u32, earned_ms: u64 },
    NoNewSubmissions,
}

/// Pays time for newly accepted submissions.
pub struct RewardVerifier {
    source: Box<dyn SubmissionSource>,
    store: Arc<dyn TimeBalanceStore>,
    db: SharedDatabase,
    per_problem_ms: u64,
    recent_submissions: u32,
}

impl RewardVerifier {
    pub fn new(
        source: Box<dyn SubmissionSource>,
        store: Arc<dyn TimeBalanceStore>,
        db: SharedDatabase,
        config: &RewardConfig,
    ) -> Self {
        Self {
            source,
            store,
            db,
            per_problem_ms: config.per_problem_ms,
            recent_submissions: config.recent_submissions,
        }
    }

    pub fn verify_and_reward(&self, handle: &str) -> Result<EarnOutcome> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Err(ValidationError::Blank("handle".into()).into());
        }

        let response = self.source.recent_submissions(handle, self.recent_submissions)?;
        let submissions = match response.result {
            Some(result) if response.status == "OK" => result,
            _ => {
                let comment = response.comment.unwrap_or_else(|| "no result".into());
                return Err(EarnError::Judge(comment).into());
            }
        };

        let mut problems = 0u32;
        for submission in submissions.iter().filter(|s| s.is_accepted()) {
            let newly_claimed = database::lock(&self.db)?.claim_submission(submission.id, Utc::now())?;
            if !newly_claimed {
                continue;
            }
            let delta = i64::try_from(self.per_problem_ms).unwrap_or(i64::MAX);
            let balance_ms = self.store.add(delta)?;
            problems += 1;
            tracing::info!(
                submission_id = submission.id,
                problem = %submission.problem.name,
                balance_ms,
                "rewarded accepted submission"
            );
        }

        if problems == 0 {
            return Ok(EarnOutcome::NoNewSubmissions);
        }
        Ok(EarnOutcome::Rewarded {
            problems,
            earned_ms: u64::from(problems) * self.per_problem_ms,
        })
    }
}

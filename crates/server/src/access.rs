//! Access policy engine.
//!
//! Combines the pure policy from `dropit_core::policy` with the metadata
//! store: `check` reads and evaluates, `consume` performs the atomic
//! counted step, and `authorize_download` does both in order. Policy
//! outcomes are values; only store failures are errors.

use crate::metrics;
use dropit_core::{AccessDecision, AccessPolicy, Denial, FileId, FileRecord, PasswordHasher};
use dropit_metadata::{ConsumeOutcome, MetadataError, MetadataResult, MetadataStore};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;

/// Result of a read-only access check.
#[derive(Clone, Debug)]
pub struct AccessCheck {
    pub decision: AccessDecision,
    /// The record, when one exists.
    pub record: Option<FileRecord>,
}

/// Result of the counted step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumeResult {
    Consumed { download_count: u32, exhausted: bool },
    Denied(Denial),
}

/// A download that passed the policy and was counted.
#[derive(Clone, Debug)]
pub struct Grant {
    pub record: FileRecord,
    /// Count after this download.
    pub download_count: u32,
    /// This download used up the limit.
    pub exhausted: bool,
}

/// Outcome of [`AccessPolicyEngine::authorize_download`].
#[derive(Clone, Debug)]
pub enum Authorization {
    Granted(Grant),
    Denied(Denial),
}

pub struct AccessPolicyEngine {
    metadata: Arc<dyn MetadataStore>,
    policy: AccessPolicy,
}

impl AccessPolicyEngine {
    pub fn new(metadata: Arc<dyn MetadataStore>, hasher: PasswordHasher) -> Self {
        Self {
            metadata,
            policy: AccessPolicy::new(hasher),
        }
    }

    /// Evaluate access without changing any state.
    pub async fn check(&self, id: FileId, password: Option<&str>) -> MetadataResult<AccessCheck> {
        let record = self.metadata.find_by_id(id).await?;
        let now = OffsetDateTime::now_utc();

        let preview = AccessPolicy::preview(record.as_ref(), now);
        let needs_verify = preview == AccessDecision::Denied(Denial::PasswordRequired)
            && password.is_some_and(|p| !p.is_empty());

        let decision = match (&record, needs_verify) {
            (Some(found), true) => {
                let policy = self.policy;
                let found = found.clone();
                let supplied = password.map(str::to_string);
                let started = Instant::now();
                let decision = tokio::task::spawn_blocking(move || {
                    policy.evaluate(Some(&found), supplied.as_deref(), now)
                })
                .await
                .map_err(|e| MetadataError::Internal(format!("verification task failed: {e}")))?;
                metrics::PASSWORD_VERIFY_DURATION.observe(started.elapsed().as_secs_f64());
                decision
            }
            _ => preview,
        };

        Ok(AccessCheck { decision, record })
    }

    /// Count one download against `record`.
    ///
    /// Losing a race for the last download degrades to `LimitReached`.
    pub async fn consume(&self, record: &FileRecord) -> MetadataResult<ConsumeResult> {
        let outcome = self
            .metadata
            .increment_download_count_if_under_limit(record.id, OffsetDateTime::now_utc())
            .await?;

        Ok(match outcome {
            ConsumeOutcome::Consumed {
                download_count,
                exhausted,
            } => {
                if exhausted {
                    tracing::info!(
                        file_id = %record.id,
                        download_count,
                        "Download limit reached, file marked for deletion"
                    );
                }
                ConsumeResult::Consumed {
                    download_count,
                    exhausted,
                }
            }
            ConsumeOutcome::LimitReached => {
                tracing::debug!(file_id = %record.id, "Lost the race for the last download");
                ConsumeResult::Denied(Denial::LimitReached)
            }
            ConsumeOutcome::NotFound => ConsumeResult::Denied(Denial::NotFound),
        })
    }

    /// Check access and, if allowed, consume one download.
    #[tracing::instrument(skip(self, password), fields(file_id = %id))]
    pub async fn authorize_download(
        &self,
        id: FileId,
        password: Option<&str>,
    ) -> MetadataResult<Authorization> {
        let AccessCheck { decision, record } = self.check(id, password).await?;

        let record = match (decision, record) {
            (AccessDecision::Allowed, Some(record)) => record,
            (AccessDecision::Denied(denial), _) => return Ok(self.deny(id, denial)),
            (AccessDecision::Allowed, None) => return Ok(self.deny(id, Denial::NotFound)),
        };

        match self.consume(&record).await? {
            ConsumeResult::Consumed {
                download_count,
                exhausted,
            } => {
                metrics::DOWNLOADS_GRANTED.inc();
                Ok(Authorization::Granted(Grant {
                    record,
                    download_count,
                    exhausted,
                }))
            }
            ConsumeResult::Denied(denial) => Ok(self.deny(id, denial)),
        }
    }

    fn deny(&self, id: FileId, denial: Denial) -> Authorization {
        metrics::record_denial(denial.as_str());
        tracing::info!(file_id = %id, reason = denial.as_str(), "Download denied");
        Authorization::Denied(denial)
    }
}

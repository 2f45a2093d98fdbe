//! Service tiers and their admission policies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Admission policy of one service tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Maximum number of jobs of this tier in `PROCESSING` at once.
    pub max_concurrent: usize,
    /// Maximum serialized payload size accepted at enqueue.
    pub max_payload_bytes: usize,
    /// Weight applied to the priority ordinal when ranking pending jobs.
    pub priority_multiplier: f64,
}

impl TierPolicy {
    pub fn new(max_concurrent: usize, max_payload_bytes: usize, priority_multiplier: f64) -> Self {
        Self {
            max_concurrent,
            max_payload_bytes,
            priority_multiplier,
        }
    }

    fn validate(&self, name: &str) -> DomainResult<()> {
        if !self.priority_multiplier.is_finite() || self.priority_multiplier <= 0.0 {
            return Err(DomainError::validation(format!(
                "tier '{name}': priority_multiplier must be a positive number"
            )));
        }
        Ok(())
    }
}

/// Immutable tier name -> policy table, fixed at scheduler construction.
///
/// Deserialization goes through [`TierTable::new`], so a decoded table is
/// always valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, TierPolicy>",
    into = "BTreeMap<String, TierPolicy>"
)]
pub struct TierTable {
    tiers: BTreeMap<String, TierPolicy>,
}

impl TierTable {
    /// Build a table, rejecting policies that cannot be ranked.
    ///
    /// A tier with `max_concurrent == 0` is accepted; its jobs are admitted
    /// at enqueue but never selected.
    pub fn new(tiers: impl IntoIterator<Item = (String, TierPolicy)>) -> DomainResult<Self> {
        let tiers: BTreeMap<_, _> = tiers.into_iter().collect();
        if tiers.is_empty() {
            return Err(DomainError::validation("tier table must not be empty"));
        }
        for (name, policy) in &tiers {
            policy.validate(name)?;
        }
        Ok(Self { tiers })
    }

    /// Parse a JSON object of the form `{"free": {"max_concurrent": 1, ...}}`.
    pub fn from_json(raw: &str) -> DomainResult<Self> {
        serde_json::from_str(raw).map_err(|e| DomainError::validation(format!("tier table: {e}")))
    }

    pub fn get(&self, tier: &str) -> Option<&TierPolicy> {
        self.tiers.get(tier)
    }

    /// Look up a tier, failing with [`DomainError::UnknownTier`].
    pub fn require(&self, tier: &str) -> DomainResult<&TierPolicy> {
        self.tiers
            .get(tier)
            .ok_or_else(|| DomainError::UnknownTier(tier.to_string()))
    }

    /// Validate a submission against the tier's payload limit.
    pub fn admit(&self, tier: &str, payload_bytes: usize) -> DomainResult<&TierPolicy> {
        let policy = self.require(tier)?;
        if payload_bytes > policy.max_payload_bytes {
            return Err(DomainError::PayloadTooLarge {
                tier: tier.to_string(),
                size: payload_bytes,
                limit: policy.max_payload_bytes,
            });
        }
        Ok(policy)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TierPolicy)> {
        self.tiers.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl TryFrom<BTreeMap<String, TierPolicy>> for TierTable {
    type Error = DomainError;

    fn try_from(tiers: BTreeMap<String, TierPolicy>) -> DomainResult<Self> {
        Self::new(tiers)
    }
}

impl From<TierTable> for BTreeMap<String, TierPolicy> {
    fn from(table: TierTable) -> Self {
        table.tiers
    }
}

impl Default for TierTable {
    /// The stock free/plus/pro/max ladder.
    fn default() -> Self {
        const MB: usize = 1_000_000;
        let tiers = [
            ("free", TierPolicy::new(1, 10 * MB, 1.0)),
            ("plus", TierPolicy::new(2, 25 * MB, 1.5)),
            ("pro", TierPolicy::new(2, 50 * MB, 2.0)),
            ("max", TierPolicy::new(4, 100 * MB, 3.0)),
        ];
        Self {
            tiers: tiers
                .into_iter()
                .map(|(name, policy)| (name.to_string(), policy))
                .collect(),
        }
    }
}

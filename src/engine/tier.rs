use tracing::warn;

use crate::model::{ServiceId, Tier};
use crate::store::AvailabilityStore;

use super::{Engine, EngineError};

/// Cached tier of one service.
///
/// `epoch` moves on every configuration change, so a lookup that raced a
/// change never stores its (possibly outdated) answer.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct TierEntry {
    tier: Option<Tier>,
    epoch: u64,
}

impl<S: AvailabilityStore> Engine<S> {
    /// The tier governing every date of `service_id`: service-specific as soon
    /// as any service-specific row exists for it, regardless of date or flag.
    pub async fn tier(&self, service_id: ServiceId) -> Result<Tier, EngineError> {
        let cached = self.tiers.get(&service_id).map(|e| *e.value()).unwrap_or_default();
        if let Some(tier) = cached.tier {
            metrics::counter!(crate::observability::TIER_CACHE_LOOKUPS_TOTAL, "result" => "hit").increment(1);
            return Ok(tier);
        }
        metrics::counter!(crate::observability::TIER_CACHE_LOOKUPS_TOTAL, "result" => "miss").increment(1);

        let tier = if self.store.has_service_slots(service_id).await? {
            Tier::ServiceSpecific
        } else {
            Tier::General
        };

        let mut entry = self.tiers.entry(service_id).or_default();
        if entry.epoch == cached.epoch {
            entry.tier = Some(tier);
        }
        Ok(tier)
    }

    /// Whether the service runs on its own slot rows. Storage failures read
    /// as "not configured".
    pub async fn has_configuration(&self, service_id: ServiceId) -> bool {
        match self.tier(service_id).await {
            Ok(tier) => tier == Tier::ServiceSpecific,
            Err(e) => {
                warn!(%service_id, "tier lookup failed: {e}");
                false
            }
        }
    }

    /// Record a configuration change. `None` forces the next lookup to hit the store.
    pub(super) fn set_cached_tier(&self, service_id: ServiceId, tier: Option<Tier>) {
        let mut entry = self.tiers.entry(service_id).or_default();
        entry.epoch += 1;
        entry.tier = tier;
    }
}

//! Resolution of the effective limits of a channel.

use crate::error::Result;
use crate::limits::{ChannelLimits, StoreLimits};
use crate::subject::Sublist;

/// Built limits with the per-channel overrides indexed by subject pattern.
///
/// Once built the override map is gone; the subject matcher is the only
/// place overrides live.
#[derive(Debug)]
pub struct LimitsResolver {
    limits: StoreLimits,
    sublist: Sublist<ChannelLimits>,
}

impl LimitsResolver {
    /// Validate `limits`, apply inheritance and index the overrides.
    pub fn configure(limits: &StoreLimits) -> Result<Self> {
        let mut limits = limits.clone();
        limits.build()?;

        let mut sublist = Sublist::new();
        for (pattern, channel_limits) in std::mem::take(&mut limits.per_channel) {
            sublist.insert(&pattern, channel_limits)?;
        }
        Ok(Self { limits, sublist })
    }

    /// Effective limits for the literal `channel`.
    pub fn resolve(&self, channel: &str) -> ChannelLimits {
        // Matches come back widest first; only `channel` itself can be a
        // literal match, and it would be last.
        self.sublist
            .matches(channel)
            .pop()
            .unwrap_or(self.limits.channel)
    }

    /// Global limits, without the overrides.
    pub fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    /// Maximum number of channels, `None` when unlimited.
    pub fn max_channels(&self) -> Option<usize> {
        (self.limits.max_channels > 0).then_some(self.limits.max_channels as usize)
    }

    /// Number of indexed overrides.
    pub fn overrides_count(&self) -> usize {
        self.sublist.count()
    }
}

//! Store, channel, message and subscription limits.
//!
//! A value of `0` means "unlimited" in the global limits and "inherit" in a
//! per-channel override. Overrides are keyed by subject pattern and inherit
//! every unset field from the narrowest other override covering them, or from
//! the global limits when none does.

use crate::error::{Result, StoreError};
use crate::subject;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default maximum number of channels.
pub const DEFAULT_MAX_CHANNELS: i64 = 100;

/// Default maximum number of messages per channel.
pub const DEFAULT_MAX_MSGS: i64 = 1_000_000;

/// Default maximum number of bytes per channel.
pub const DEFAULT_MAX_BYTES: i64 = 1000 * 1024 * 1024;

/// Default maximum number of subscriptions per channel.
pub const DEFAULT_MAX_SUBSCRIPTIONS: i64 = 1000;

/// Message quotas of a channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MsgStoreLimits {
    pub max_msgs: i64,
    pub max_bytes: i64,
    pub max_age_secs: i64,
}

impl MsgStoreLimits {
    pub fn max_msgs(&self) -> Option<usize> {
        positive(self.max_msgs).map(|v| v as usize)
    }

    pub fn max_bytes(&self) -> Option<u64> {
        positive(self.max_bytes)
    }

    pub fn max_age(&self) -> Option<Duration> {
        positive(self.max_age_secs).map(Duration::from_secs)
    }
}

/// Subscription quota of a channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubStoreLimits {
    pub max_subscriptions: i64,
}

impl SubStoreLimits {
    pub fn max_subscriptions(&self) -> Option<usize> {
        positive(self.max_subscriptions).map(|v| v as usize)
    }
}

/// Effective limits of one channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelLimits {
    #[serde(flatten)]
    pub msgs: MsgStoreLimits,
    #[serde(flatten)]
    pub subs: SubStoreLimits,
}

impl ChannelLimits {
    /// Fill every unset field from `parent`.
    fn inherit_from(&mut self, parent: &ChannelLimits) {
        fn fill(v: &mut i64, p: i64) {
            if *v == 0 {
                *v = p;
            }
        }
        fill(&mut self.msgs.max_msgs, parent.msgs.max_msgs);
        fill(&mut self.msgs.max_bytes, parent.msgs.max_bytes);
        fill(&mut self.msgs.max_age_secs, parent.msgs.max_age_secs);
        fill(&mut self.subs.max_subscriptions, parent.subs.max_subscriptions);
    }
}

/// Store-wide limits plus per-channel overrides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLimits {
    #[serde(default)]
    pub max_channels: i64,

    #[serde(flatten)]
    pub channel: ChannelLimits,

    /// Overrides keyed by subject pattern.
    #[serde(default)]
    pub per_channel: BTreeMap<String, ChannelLimits>,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_channels: DEFAULT_MAX_CHANNELS,
            channel: ChannelLimits {
                msgs: MsgStoreLimits {
                    max_msgs: DEFAULT_MAX_MSGS,
                    max_bytes: DEFAULT_MAX_BYTES,
                    max_age_secs: 0,
                },
                subs: SubStoreLimits {
                    max_subscriptions: DEFAULT_MAX_SUBSCRIPTIONS,
                },
            },
            per_channel: BTreeMap::new(),
        }
    }
}

impl StoreLimits {
    /// Parse limits from a JSON document. Missing fields take their zero value.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load limits from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Add or replace the override for `pattern`.
    pub fn add_per_channel(&mut self, pattern: impl Into<String>, limits: ChannelLimits) {
        self.per_channel.insert(pattern.into(), limits);
    }

    /// Validate the limits and apply inheritance to every override.
    ///
    /// Nothing is modified when validation fails.
    pub fn build(&mut self) -> Result<()> {
        if self.max_channels < 0 {
            return Err(StoreError::InvalidLimits(format!(
                "max channels limit cannot be negative ({})",
                self.max_channels
            )));
        }
        check_channel_limits(&self.channel, "")?;

        let mut literals = 0;
        for (pattern, limits) in &self.per_channel {
            if !subject::is_valid_channel_name(pattern, true) {
                return Err(StoreError::InvalidLimits(format!(
                    "invalid channel name {:?}",
                    pattern
                )));
            }
            check_channel_limits(limits, pattern)?;
            if subject::is_literal(pattern) {
                literals += 1;
                if self.max_channels > 0 && literals > self.max_channels {
                    return Err(StoreError::InvalidLimits(format!(
                        "too many channels defined ({}), the max channels limit is set to {}",
                        literals, self.max_channels
                    )));
                }
            }
        }

        let mut order: Vec<String> = self.per_channel.keys().cloned().collect();
        order.sort_by(|a, b| subject::specificity_key(a).cmp(&subject::specificity_key(b)));

        let mut built: Vec<(String, ChannelLimits)> = Vec::with_capacity(order.len());
        for pattern in order {
            let mut limits = self.per_channel[&pattern];
            // Patterns are processed widest first, so the last covering one is
            // the narrowest and has already inherited its own parent's values.
            let parent = built
                .iter()
                .rev()
                .find(|(p, _)| subject::covers(p, &pattern))
                .map(|(_, l)| *l)
                .unwrap_or(self.channel);
            limits.inherit_from(&parent);
            built.push((pattern, limits));
        }
        self.per_channel = built.into_iter().collect();
        Ok(())
    }

    /// Human readable summary, one line per limit.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = vec![
            "---------- Store Limits ----------".to_string(),
            format!("Channels:        {:>7}", display(self.max_channels)),
            "--------- Channels Limits --------".to_string(),
        ];
        lines.extend(channel_lines(&self.channel, ""));
        for (pattern, limits) in &self.per_channel {
            lines.push(format!("Channel: {:?}", pattern));
            lines.extend(channel_lines(limits, "  "));
        }
        lines.push("----------------------------------".to_string());
        lines
    }
}

fn channel_lines(limits: &ChannelLimits, indent: &str) -> Vec<String> {
    vec![
        format!("{}Subscriptions:   {:>7}", indent, display(limits.subs.max_subscriptions)),
        format!("{}Messages:        {:>7}", indent, display(limits.msgs.max_msgs)),
        format!("{}Bytes:           {:>7}", indent, display(limits.msgs.max_bytes)),
        format!("{}Age (secs):      {:>7}", indent, display(limits.msgs.max_age_secs)),
    ]
}

fn display(v: i64) -> String {
    if v == 0 {
        "unlimited".to_string()
    } else {
        v.to_string()
    }
}

fn positive(v: i64) -> Option<u64> {
    (v > 0).then_some(v as u64)
}

fn check_channel_limits(limits: &ChannelLimits, channel: &str) -> Result<()> {
    let fields = [
        ("max messages", limits.msgs.max_msgs),
        ("max bytes", limits.msgs.max_bytes),
        ("max age", limits.msgs.max_age_secs),
        ("max subscriptions", limits.subs.max_subscriptions),
    ];
    for (name, value) in fields {
        if value < 0 {
            return Err(StoreError::InvalidLimits(format!(
                "{} for channel {:?} cannot be negative ({})",
                name, channel, value
            )));
        }
    }
    Ok(())
}

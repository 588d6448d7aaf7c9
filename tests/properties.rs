//! Property tests for message ordering, quotas and limits resolution.

use channel_store::{
    ChannelLimits, LimitsResolver, ManualClock, MemoryStore, MsgStoreLimits, Store, StoreLimits,
};
use proptest::prelude::*;
use std::sync::Arc;

/// Clock movements between stores, backward included.
fn arb_clock_steps() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-5_000_000_000i64..5_000_000_000, 1..60)
}

fn arb_payloads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..80)
}

/// Patterns over a small alphabet so that overlaps are common.
fn arb_pattern() -> impl Strategy<Value = String> {
    prop::collection::vec(prop_oneof!["a", "b", Just("*".to_string())], 1..4).prop_flat_map(
        |tokens| {
            let base = tokens.join(".");
            prop_oneof![Just(base.clone()), Just(format!("{}.>", base)), Just(">".to_string())]
        },
    )
}

fn arb_channel() -> impl Strategy<Value = String> {
    prop::collection::vec(prop_oneof!["a", "b", "c"], 1..5).prop_map(|t| t.join("."))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Sequences strictly increase and timestamps never decrease, whatever
    /// the wall clock does.
    #[test]
    fn prop_ordering_survives_clock_skew(steps in arb_clock_steps()) {
        let clock = Arc::new(ManualClock::new(1_000_000_000_000));
        let store = MemoryStore::with_clock(None, clock.clone()).unwrap();
        let (cs, _) = store.create_channel("foo", None).unwrap();

        let mut prev: Option<(u64, i64)> = None;
        for step in steps {
            clock.advance(step);
            let seq = cs.msgs.store(b"x").unwrap();
            let msg = cs.msgs.lookup(seq).unwrap().unwrap();
            if let Some((prev_seq, prev_ts)) = prev {
                prop_assert_eq!(seq, prev_seq + 1);
                prop_assert!(msg.timestamp >= prev_ts);
            }
            prev = Some((seq, msg.timestamp));
        }
    }

    /// Count and byte quotas hold after every store, except that the newest
    /// message is always kept.
    #[test]
    fn prop_quotas_hold(
        payloads in arb_payloads(),
        max_msgs in 0i64..10,
        max_bytes in 0i64..200,
    ) {
        let mut limits = StoreLimits::default();
        limits.channel.msgs = MsgStoreLimits { max_msgs, max_bytes, max_age_secs: 0 };
        let store = MemoryStore::new(Some(&limits)).unwrap();
        let (cs, _) = store.create_channel("foo", None).unwrap();

        for payload in &payloads {
            let seq = cs.msgs.store(payload).unwrap();
            let (count, bytes) = cs.msgs.state().unwrap();
            let (first, last) = cs.msgs.first_and_last_sequence().unwrap();

            prop_assert_eq!(last, seq);
            prop_assert!(count >= 1);
            prop_assert_eq!(count as u64, last - first + 1);
            if count > 1 {
                prop_assert!(max_msgs == 0 || count as i64 <= max_msgs);
                prop_assert!(max_bytes == 0 || bytes as i64 <= max_bytes);
            }
            let newest = cs.msgs.last_msg().unwrap().unwrap();
            prop_assert_eq!(&newest.data, payload);
        }
    }

    /// The resolved limits of a channel come from the narrowest override
    /// matching it, or the global limits when none does.
    #[test]
    fn prop_narrowest_override_wins(
        patterns in prop::collection::btree_set(arb_pattern(), 1..6),
        channel in arb_channel(),
    ) {
        let mut limits = StoreLimits::default();
        limits.max_channels = 0;
        let patterns: Vec<String> = patterns.into_iter().collect();
        for (i, pattern) in patterns.iter().enumerate() {
            limits.add_per_channel(pattern.clone(), ChannelLimits {
                msgs: MsgStoreLimits { max_msgs: i as i64 + 1, ..Default::default() },
                ..Default::default()
            });
        }
        let resolver = LimitsResolver::configure(&limits).unwrap();
        let resolved = resolver.resolve(&channel).msgs.max_msgs;

        let narrowest = patterns
            .iter()
            .enumerate()
            .filter(|(_, p)| channel_store::subject::covers(p, &channel))
            .max_by(|(_, a), (_, b)| {
                channel_store::subject::specificity_key(a)
                    .cmp(&channel_store::subject::specificity_key(b))
            })
            .map(|(i, _)| i as i64 + 1);
        prop_assert_eq!(resolved, narrowest.unwrap_or(limits.channel.msgs.max_msgs));
    }
}

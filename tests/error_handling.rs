//! Error handling and edge case tests.

use channel_store::{
    ChannelLimits, ErrorKind, GenericStore, MemoryStore, Store, StoreError, StoreLimits,
    SubState, SubStoreLimits,
};

fn limited(max_channels: i64, max_subscriptions: i64) -> StoreLimits {
    let mut limits = StoreLimits::default();
    limits.max_channels = max_channels;
    limits.channel.subs.max_subscriptions = max_subscriptions;
    limits
}

// --- Capacity Errors ---

#[test]
fn test_too_many_channels() {
    let store = MemoryStore::new(Some(&limited(2, 0))).unwrap();
    store.create_channel("a", None).unwrap();
    store.create_channel("b", None).unwrap();

    let err = store.create_channel("c", None).unwrap_err();
    assert!(matches!(err, StoreError::TooManyChannels));
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    assert_eq!(store.get_channels_count(), 2);
    assert!(store.lookup_channel("c").is_none());

    // Existing channels are still handed back at the limit.
    let (_, created) = store.create_channel("a", None).unwrap();
    assert!(!created);
}

#[test]
fn test_too_many_subscriptions() {
    let store = MemoryStore::new(Some(&limited(0, 2))).unwrap();
    let (cs, _) = store.create_channel("foo", None).unwrap();

    let mut ids = Vec::new();
    for _ in 0..2 {
        let mut sub = SubState::default();
        cs.subs.create_sub(&mut sub).unwrap();
        ids.push(sub.id);
    }
    let mut third = SubState::default();
    let err = cs.subs.create_sub(&mut third).unwrap_err();
    assert!(matches!(err, StoreError::TooManySubscriptions));
    assert_eq!(cs.subs.subs_count(), 2);

    // Deleting one frees a slot; the new one still gets a fresh ID.
    cs.subs.delete_sub(ids[0]).unwrap();
    cs.subs.create_sub(&mut third).unwrap();
    assert_eq!(third.id, 3);
}

#[test]
fn test_unlimited_channels() {
    let store = MemoryStore::new(Some(&limited(0, 0))).unwrap();
    for i in 0..250 {
        store.create_channel(&format!("ch.{}", i), None).unwrap();
    }
    assert_eq!(store.get_channels_count(), 250);
}

// --- Validation Errors ---

#[test]
fn test_negative_limits_rejected() {
    let mut limits = StoreLimits::default();
    limits.channel.msgs.max_bytes = -1;
    let err = MemoryStore::new(Some(&limits)).unwrap_err();
    assert!(matches!(err, StoreError::InvalidLimits(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_negative_override_rejected() {
    let mut limits = StoreLimits::default();
    limits.add_per_channel(
        "foo",
        ChannelLimits {
            subs: SubStoreLimits {
                max_subscriptions: -5,
            },
            ..Default::default()
        },
    );
    assert!(matches!(
        MemoryStore::new(Some(&limits)),
        Err(StoreError::InvalidLimits(_))
    ));
}

#[test]
fn test_invalid_override_pattern() {
    for pattern in ["", "foo..bar", "foo.>.bar", "fo*"] {
        let mut limits = StoreLimits::default();
        limits.add_per_channel(pattern, ChannelLimits::default());
        assert!(
            matches!(MemoryStore::new(Some(&limits)), Err(StoreError::InvalidLimits(_))),
            "pattern {:?} should be rejected",
            pattern
        );
    }
}

#[test]
fn test_literal_overrides_count_against_max_channels() {
    let mut limits = limited(2, 0);
    for name in ["a", "b", "c"] {
        limits.add_per_channel(name, ChannelLimits::default());
    }
    assert!(matches!(
        MemoryStore::new(Some(&limits)),
        Err(StoreError::InvalidLimits(_))
    ));

    // Wildcard overrides do not.
    let mut limits = limited(1, 0);
    limits.add_per_channel("a.*", ChannelLimits::default());
    limits.add_per_channel("b.>", ChannelLimits::default());
    assert!(MemoryStore::new(Some(&limits)).is_ok());
}

#[test]
fn test_invalid_channel_names() {
    let store = MemoryStore::new(None).unwrap();
    for name in ["", "foo.*", ">", "foo..bar", ".foo"] {
        let err = store.create_channel(name, None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidChannel(_)), "{:?}", name);
    }
    assert_eq!(store.get_channels_count(), 0);
}

#[test]
fn test_malformed_json_limits() {
    let err = StoreLimits::from_json("{ not json").unwrap_err();
    assert!(matches!(err, StoreError::Deserialization(_)));
}

// --- Unsupported Operations ---

#[test]
fn test_generic_store_operations() {
    let gs = GenericStore::new("generic", None).unwrap();
    let err = gs.create_channel("foo", None).unwrap_err();
    assert!(matches!(err, StoreError::NotImplemented(_)));
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
    assert!(matches!(
        gs.get_exclusive_lock(),
        Err(StoreError::NotSupported(_))
    ));
}

// --- Closed Store ---

#[test]
fn test_operations_after_close() {
    let store = MemoryStore::new(None).unwrap();
    let (cs, _) = store.create_channel("foo", None).unwrap();
    store.add_client("me", "hb", None).unwrap();
    store.close().unwrap();

    assert!(matches!(
        store.create_channel("bar", None),
        Err(StoreError::Closed)
    ));
    assert!(matches!(
        store.create_channel("foo", None),
        Err(StoreError::Closed)
    ));
    assert!(matches!(
        store.add_client("other", "hb", None),
        Err(StoreError::Closed)
    ));
    assert!(matches!(cs.msgs.store(b"x"), Err(StoreError::Closed)));
    assert!(matches!(
        cs.subs.create_sub(&mut SubState::default()),
        Err(StoreError::Closed)
    ));

    // Reads still answer from what is there.
    assert_eq!(store.get_channels_count(), 1);
    assert!(store.get_client("me").is_some());
    assert!(store.close().is_ok());
}

#[test]
fn test_unknown_subscription() {
    let store = MemoryStore::new(None).unwrap();
    let (cs, _) = store.create_channel("foo", None).unwrap();
    assert!(matches!(
        cs.subs.add_seq_pending(99, 1),
        Err(StoreError::SubscriptionNotFound(99))
    ));
    assert!(matches!(
        cs.subs.update_sub(&SubState {
            id: 99,
            ..Default::default()
        }),
        Err(StoreError::SubscriptionNotFound(99))
    ));
}

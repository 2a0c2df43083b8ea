// Test-specific lint overrides: property tests use unwrap/expect freely.
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property tests for the message store.
//!
//! Random interleavings of history loads, inbound deliveries, local sends,
//! confirmations, and read receipts must never leave two records with the
//! same id, and must keep records the owner did not send untouched by
//! receipts.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use proptest::prelude::*;

use chatsync::chat::store::{MessageStore, deduplicate};
use chatsync_proto::message::{Message, MessageId, MessageStatus, UserId};

const WINDOW: Duration = Duration::from_secs(10);

fn base() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn record(id: u8, from_me: bool, content: u8, offset_secs: i64) -> Message {
    let (sender, receiver) = if from_me { ("me", "you") } else { ("you", "me") };
    Message {
        id: MessageId::new(format!("srv-{id}")),
        sender_id: UserId::new(sender),
        receiver_id: UserId::new(receiver),
        content: format!("text {content}"),
        status: MessageStatus::Sent,
        created_at: base() + TimeDelta::seconds(offset_secs),
        sender: None,
    }
}

#[derive(Debug, Clone)]
enum Op {
    History(Vec<(u8, bool, u8, i64)>),
    Inbound(u8, bool, u8, i64),
    LocalSend(u8),
    /// Confirm the n-th provisional record (if any) as the given durable id.
    Confirm(usize, u8, i64),
    Receipt(Vec<u8>, bool),
}

fn arb_fields() -> impl Strategy<Value = (u8, bool, u8, i64)> {
    (0_u8..12, any::<bool>(), 0_u8..4, 0_i64..60)
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::collection::vec(arb_fields(), 0..8).prop_map(Op::History),
        arb_fields().prop_map(|(id, me, c, t)| Op::Inbound(id, me, c, t)),
        (0_u8..4).prop_map(Op::LocalSend),
        (0_usize..4, 0_u8..12, 0_i64..60).prop_map(|(n, id, t)| Op::Confirm(n, id, t)),
        (prop::collection::vec(0_u8..12, 0..6), any::<bool>()).prop_map(|(ids, by_me)| Op::Receipt(ids, by_me)),
    ]
}

fn apply(store: &mut MessageStore, op: Op) {
    match op {
        Op::History(records) => {
            store.replace_all(
                records
                    .into_iter()
                    .map(|(id, me, c, t)| record(id, me, c, t))
                    .collect(),
            );
        }
        Op::Inbound(id, me, c, t) => {
            store.apply_inbound(record(id, me, c, t), WINDOW);
        }
        Op::LocalSend(c) => {
            let content = format!("text {c}");
            if store.find_provisional(&UserId::new("me"), &content).is_none() {
                store.insert_or_update(Message::provisional(
                    UserId::new("me"),
                    UserId::new("you"),
                    content,
                    None,
                ));
            }
        }
        Op::Confirm(n, id, t) => {
            let provisional = store
                .messages()
                .iter()
                .filter(|m| m.is_provisional())
                .nth(n)
                .cloned();
            if let Some(p) = provisional {
                let c = p.content.trim_start_matches("text ").parse().unwrap();
                store.reconcile(record(id, true, c, t), &p.id, WINDOW);
            }
        }
        Op::Receipt(ids, by_me) => {
            let ids: Vec<_> = ids.into_iter().map(|i| MessageId::new(format!("srv-{i}"))).collect();
            let reader = UserId::new(if by_me { "me" } else { "you" });
            store.mark_read(&ids, &reader);
        }
    }
}

proptest! {
    #[test]
    fn ids_stay_unique(ops in prop::collection::vec(arb_op(), 0..40)) {
        let mut store = MessageStore::new(UserId::new("me"));
        for op in ops {
            apply(&mut store, op);
            let mut seen = HashSet::new();
            for m in store.messages() {
                prop_assert!(seen.insert(m.id.clone()), "duplicate id {}", m.id);
            }
        }
    }

    #[test]
    fn at_most_one_provisional_per_content(ops in prop::collection::vec(arb_op(), 0..40)) {
        let mut store = MessageStore::new(UserId::new("me"));
        for op in ops {
            apply(&mut store, op);
        }
        let mut contents = HashSet::new();
        for m in store.messages().iter().filter(|m| m.is_provisional()) {
            prop_assert!(contents.insert(m.content.clone()));
        }
    }

    #[test]
    fn receipts_only_touch_own_messages(
        history in prop::collection::vec(arb_fields(), 0..12),
        read in prop::collection::vec(0_u8..12, 0..12),
    ) {
        let mut store = MessageStore::new(UserId::new("me"));
        store.replace_all(history.into_iter().map(|(id, me, c, t)| record(id, me, c, t)).collect());
        let before = store.messages().to_vec();

        let ids: Vec<_> = read.into_iter().map(|i| MessageId::new(format!("srv-{i}"))).collect();
        let changed = store.mark_read(&ids, &UserId::new("you"));

        for (old, new) in before.iter().zip(store.messages()) {
            prop_assert_eq!(&old.id, &new.id);
            if changed.contains(&new.id) {
                prop_assert_eq!(&new.sender_id, &UserId::new("me"));
                prop_assert_eq!(new.status, MessageStatus::Read);
            } else {
                prop_assert_eq!(old.status, new.status);
            }
        }
    }

    #[test]
    fn deduplicate_is_idempotent(records in prop::collection::vec(arb_fields(), 0..30)) {
        let messages: Vec<_> = records.into_iter().map(|(id, me, c, t)| record(id, me, c, t)).collect();
        let once = deduplicate(messages);
        let twice = deduplicate(once.clone());
        prop_assert_eq!(once, twice);
    }
}

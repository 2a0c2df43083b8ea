// Test-specific lint overrides: property tests use unwrap/expect freely.
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property tests for the JSON frame codec and message identifiers.
//!
//! 1. Arbitrary text never panics the decoders.
//! 2. Frames above `MAX_FRAME_LEN` are refused before parsing.
//! 3. Any message record survives a server frame encode/decode.
//! 4. Provisional classification depends only on the id prefix.

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use chatsync_proto::codec::{self, CodecError, MAX_FRAME_LEN};
use chatsync_proto::events::ServerEvent;
use chatsync_proto::message::{
    Message, MessageId, MessageStatus, PROVISIONAL_PREFIX, SenderProfile, UserId,
};

fn arb_status() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::Sent),
        Just(MessageStatus::Delivered),
        Just(MessageStatus::Read),
    ]
}

fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    // 2001 to 2065, with sub-second precision.
    (1_000_000_000_i64..3_000_000_000, 0_u32..1_000_000_000)
        .prop_map(|(secs, nanos)| DateTime::from_timestamp(secs, nanos).unwrap())
}

fn arb_profile() -> impl Strategy<Value = Option<SenderProfile>> {
    proptest::option::of(
        ("\\PC{0,20}", "\\PC{0,20}", proptest::option::of("https://[a-z]{1,12}\\.png")).prop_map(
            |(first_name, last_name, profile_image)| SenderProfile {
                first_name,
                last_name,
                profile_image,
            },
        ),
    )
}

fn arb_message() -> impl Strategy<Value = Message> {
    (
        "[a-zA-Z0-9-]{1,36}",
        "[a-z0-9]{1,12}",
        "[a-z0-9]{1,12}",
        "\\PC{1,200}",
        arb_status(),
        arb_timestamp(),
        arb_profile(),
    )
        .prop_map(
            |(id, sender, receiver, content, status, created_at, profile)| Message {
                id: MessageId::new(id),
                sender_id: UserId::new(sender),
                receiver_id: UserId::new(receiver),
                content,
                status,
                created_at,
                sender: profile,
            },
        )
}

proptest! {
    #[test]
    fn decoders_never_panic(frame in "\\PC{0,512}") {
        let _ = codec::decode_server(&frame);
        let _ = codec::decode_client(&frame);
    }

    #[test]
    fn decoders_never_panic_on_envelope_shapes(
        event in "[a-z-]{0,20}",
        data in "\\PC{0,64}",
    ) {
        let frame = format!(r#"{{"event":"{event}","data":{data}}}"#);
        let _ = codec::decode_server(&frame);
        let _ = codec::decode_client(&frame);
    }

    #[test]
    fn oversized_frames_are_refused(extra in 1_usize..1024) {
        let frame = "x".repeat(MAX_FRAME_LEN + extra);
        let is_too_large = matches!(
            codec::decode_server(&frame),
            Err(CodecError::FrameTooLarge { .. })
        );
        prop_assert!(is_too_large);
    }

    #[test]
    fn message_frames_preserve_records(message in arb_message()) {
        let event = ServerEvent::MessageSent(message);
        let frame = codec::encode_server(&event).unwrap();
        prop_assert_eq!(codec::decode_server(&frame).unwrap(), event);
    }

    #[test]
    fn provisional_iff_prefixed(id in "[a-z0-9-]{0,40}") {
        let plain = MessageId::new(id.clone());
        prop_assert_eq!(plain.is_provisional(), id.starts_with(PROVISIONAL_PREFIX));

        let prefixed = MessageId::new(format!("{PROVISIONAL_PREFIX}{id}"));
        prop_assert!(prefixed.is_provisional());
    }
}

#[test]
fn generated_provisional_ids_are_unique() {
    let ids: std::collections::HashSet<_> = (0..1000).map(|_| MessageId::provisional()).collect();
    assert_eq!(ids.len(), 1000);
}

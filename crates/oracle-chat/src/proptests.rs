//! Property-based tests for the conversation reducer and the assembler
//!
//! - Applying an action never shortens the conversation
//! - Append actions only touch the last turn
//! - Fragments concatenate in arrival order, however they are split
//! - Sources keep their arrival order, duplicates included
//! - Nothing after a finish signal reaches the conversation

use oracle_wire::{ProtocolVersion, Source, StreamPayload, Turn};
use proptest::prelude::*;

use crate::{
    assembler::{DecodeErrorPolicy, assemble},
    store::{Action, Conversation},
};

// ============================================================================
// Strategies
// ============================================================================

fn arb_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 _.!?,\\[\\]]{0,40}"
}

fn arb_source() -> impl Strategy<Value = Source> {
    (1usize..20, -1i64..20, "[A-Za-z ]{1,20}", "[a-z]{1,10}", arb_text()).prop_map(
        |(ordinal, index, citation, host, origin_text)| {
            Source::new(ordinal, index, citation, format!("https://{host}.org"), origin_text)
        },
    )
}

fn arb_turn() -> impl Strategy<Value = Turn> {
    prop_oneof![
        arb_text().prop_map(Turn::User),
        (arb_text(), proptest::collection::vec(arb_source(), 0..3))
            .prop_map(|(text, sources)| Turn::Assistant(text, sources)),
    ]
}

fn arb_conversation() -> impl Strategy<Value = Conversation> {
    proptest::collection::vec(arb_turn(), 0..6).prop_map(Conversation::from)
}

/// A conversation whose last turn is an assistant turn
fn arb_pending_conversation() -> impl Strategy<Value = Conversation> {
    proptest::collection::vec(arb_turn(), 0..5).prop_map(|mut turns| {
        turns.push(Turn::assistant_empty());
        Conversation::from(turns)
    })
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        1 => arb_turn().prop_map(Action::AddTurn),
        3 => arb_text().prop_map(Action::AppendAssistantText),
        2 => arb_source().prop_map(Action::AppendAssistantSource),
    ]
}

// ============================================================================
// Reducer properties
// ============================================================================

proptest! {
    #[test]
    fn prop_apply_never_shrinks(conversation in arb_conversation(), action in arb_action()) {
        let grows = matches!(action, Action::AddTurn(_));
        if let Ok(next) = conversation.apply(action) {
            if grows {
                prop_assert_eq!(next.len(), conversation.len() + 1);
            } else {
                prop_assert_eq!(next.len(), conversation.len());
            }
        }
    }

    #[test]
    fn prop_appends_only_touch_last_turn(
        conversation in arb_pending_conversation(),
        action in prop_oneof![
            arb_text().prop_map(Action::AppendAssistantText),
            arb_source().prop_map(Action::AppendAssistantSource),
        ],
    ) {
        let next = conversation.apply(action).unwrap();
        let n = conversation.len();
        prop_assert_eq!(&next.turns()[..n - 1], &conversation.turns()[..n - 1]);
    }

    #[test]
    fn prop_failed_apply_leaves_input_alone(
        turns in proptest::collection::vec(arb_turn(), 0..5),
        text in arb_text(),
    ) {
        let mut turns = turns;
        turns.push(Turn::user("question"));
        let conversation = Conversation::from(turns);
        let snapshot = conversation.clone();
        prop_assert!(conversation.apply(Action::AppendAssistantText(text)).is_err());
        prop_assert_eq!(conversation, snapshot);
    }

    #[test]
    fn prop_fragments_concatenate_in_order(
        fragments in proptest::collection::vec(arb_text(), 0..10),
    ) {
        let folded = fragments
            .iter()
            .cloned()
            .try_fold(Conversation::from(vec![Turn::assistant_empty()]), |c, f| {
                c.apply(Action::AppendAssistantText(f))
            })
            .unwrap();
        prop_assert_eq!(folded.last().unwrap().text(), fragments.concat());
    }

    #[test]
    fn prop_sources_keep_arrival_order(
        sources in proptest::collection::vec(arb_source(), 0..8),
    ) {
        let folded = sources
            .iter()
            .cloned()
            .try_fold(Conversation::from(vec![Turn::assistant_empty()]), |c, s| {
                c.apply(Action::AppendAssistantSource(s))
            })
            .unwrap();
        prop_assert_eq!(folded.last().unwrap().sources(), sources.as_slice());
    }
}

// ============================================================================
// Assembler properties
// ============================================================================

proptest! {
    #[test]
    fn prop_nothing_after_finish(
        before in proptest::collection::vec(arb_text(), 0..6),
        after in proptest::collection::vec(arb_text(), 0..6),
    ) {
        let payloads: Vec<String> = before
            .iter()
            .map(|t| StreamPayload::content(t.clone()).to_json())
            .chain(std::iter::once(StreamPayload::finished("DONE").to_json()))
            .chain(after.iter().map(|t| StreamPayload::content(t.clone()).to_json()))
            .collect();

        let assembled = assemble(
            &Conversation::from(vec![Turn::assistant_empty()]),
            &payloads,
            ProtocolVersion::Current,
            DecodeErrorPolicy::Skip,
        )
        .unwrap();

        prop_assert_eq!(assembled.conversation.last().unwrap().text(), before.concat());
    }

    #[test]
    fn prop_garbage_never_reaches_conversation(
        fragments in proptest::collection::vec(arb_text(), 0..6),
        garbage in "[^{}]{1,20}",
    ) {
        let mut payloads: Vec<String> = vec![];
        for f in &fragments {
            payloads.push(StreamPayload::content(f.clone()).to_json());
            payloads.push(garbage.clone());
        }

        let assembled = assemble(
            &Conversation::from(vec![Turn::assistant_empty()]),
            &payloads,
            ProtocolVersion::Current,
            DecodeErrorPolicy::Skip,
        )
        .unwrap();

        prop_assert_eq!(assembled.conversation.last().unwrap().text(), fragments.concat());
    }
}

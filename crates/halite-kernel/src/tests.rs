//! Integration tests for halite-kernel.
//!
//! These exercise the apply path end to end: command in, state + reply +
//! effects out, plus the snapshot/restore and replay-determinism laws the
//! rest of the system leans on.

use bytes::Bytes;
use halite_types::{Credential, MessageId};
use proptest::prelude::*;

use crate::{apply_committed, ApplyReply, ChatState, Command, CommandKind, Effect, KernelError};

// ============================================================================
// Helper Functions
// ============================================================================

fn test_credential() -> Credential {
    Credential {
        hash: Bytes::from_static(b"not-a-real-hash"),
        salt: Bytes::from_static(b"not-a-real-salt"),
    }
}

fn with_account(state: ChatState, name: &str) -> ChatState {
    let (state, reply, _) = apply_committed(
        state,
        Command::CreateAccount {
            name: name.to_string(),
            credential: test_credential(),
        },
    );
    assert_eq!(reply, Ok(ApplyReply::AccountCreated));
    state
}

fn send(state: ChatState, from: &str, to: &str, content: &str) -> (ChatState, MessageId) {
    let (state, reply, _) = apply_committed(
        state,
        Command::SendMessage {
            sender: from.to_string(),
            recipient: to.to_string(),
            content: content.to_string(),
            deliver_read: false,
        },
    );
    match reply {
        Ok(ApplyReply::MessageSent { id, .. }) => (state, id),
        other => panic!("send failed: {other:?}"),
    }
}

// ============================================================================
// Account Lifecycle
// ============================================================================

#[test]
fn create_account_then_duplicate() {
    let state = with_account(ChatState::new(), "alice");
    assert!(state.account_exists("alice"));

    let (state, reply, _) = apply_committed(
        state,
        Command::CreateAccount {
            name: "alice".to_string(),
            credential: test_credential(),
        },
    );
    assert_eq!(reply, Err(KernelError::AccountTaken("alice".to_string())));
    // Exactly one account exists after the duplicate attempt.
    assert_eq!(state.list_users("", 0, -1), vec!["alice".to_string()]);
}

#[test]
fn create_account_empty_name_rejected() {
    let (state, reply, _) = apply_committed(
        ChatState::new(),
        Command::CreateAccount {
            name: String::new(),
            credential: test_credential(),
        },
    );
    assert_eq!(reply, Err(KernelError::AccountNameEmpty));
    assert!(state.list_users("", 0, -1).is_empty());
}

#[test]
fn delete_account_cascades_and_allows_recreation() {
    let state = with_account(ChatState::new(), "u");
    let state = with_account(state, "sender");
    let (state, _) = send(state, "sender", "u", "one");
    let (state, _) = send(state, "sender", "u", "two");
    let (state, _) = send(state, "sender", "u", "three");

    let (state, reply, effects) = apply_committed(
        state,
        Command::DeleteAccount {
            name: "u".to_string(),
        },
    );
    assert_eq!(reply, Ok(ApplyReply::AccountDeleted));
    assert_eq!(
        effects,
        vec![Effect::DropSubscriptions {
            name: "u".to_string()
        }]
    );
    assert!(!state.list_users("", 0, -1).contains(&"u".to_string()));

    // Sending to the deleted account now fails.
    let (state, reply, _) = apply_committed(
        state,
        Command::SendMessage {
            sender: "sender".to_string(),
            recipient: "u".to_string(),
            content: "late".to_string(),
            deliver_read: false,
        },
    );
    assert_eq!(reply, Err(KernelError::AccountNotFound("u".to_string())));

    // Recreation succeeds with empty mailboxes.
    let state = with_account(state, "u");
    let counts = state.counts("u").unwrap();
    assert_eq!((counts.unread, counts.read), (0, 0));
}

#[test]
fn delete_missing_account_is_idempotent() {
    let (state, reply, effects) = apply_committed(
        ChatState::new(),
        Command::DeleteAccount {
            name: "ghost".to_string(),
        },
    );
    assert_eq!(reply, Ok(ApplyReply::AccountDeleted));
    assert!(effects.is_empty());
    assert!(!state.account_exists("ghost"));
}

// ============================================================================
// Message Delivery
// ============================================================================

#[test]
fn message_ids_strictly_increase() {
    let state = with_account(ChatState::new(), "alice");
    let state = with_account(state, "bob");
    let (state, id1) = send(state, "alice", "bob", "first");
    let (state, id2) = send(state, "alice", "bob", "second");
    let (_, id3) = send(state, "bob", "alice", "third");
    assert!(id1 < id2 && id2 < id3);
    assert_eq!(id1, MessageId::new(1));
}

#[test]
fn send_to_missing_recipient_allocates_no_id() {
    let state = with_account(ChatState::new(), "alice");
    let before = state.last_message_id();
    let (state, reply, effects) = apply_committed(
        state,
        Command::SendMessage {
            sender: "alice".to_string(),
            recipient: "nobody".to_string(),
            content: "hi".to_string(),
            deliver_read: false,
        },
    );
    assert_eq!(reply, Err(KernelError::AccountNotFound("nobody".to_string())));
    assert!(effects.is_empty());
    assert_eq!(state.last_message_id(), before);
}

#[test]
fn online_hint_routes_to_read_mailbox() {
    let state = with_account(ChatState::new(), "alice");
    let state = with_account(state, "bob");
    let (state, reply, effects) = apply_committed(
        state,
        Command::SendMessage {
            sender: "alice".to_string(),
            recipient: "bob".to_string(),
            content: "hi".to_string(),
            deliver_read: true,
        },
    );
    match reply {
        Ok(ApplyReply::MessageSent { delivered_read, .. }) => assert!(delivered_read),
        other => panic!("unexpected reply: {other:?}"),
    }
    let counts = state.counts("bob").unwrap();
    assert_eq!((counts.unread, counts.read), (0, 1));
    // The live notification still fires for subscribers.
    assert!(matches!(
        effects.as_slice(),
        [Effect::NotifySubscribers { recipient, .. }] if recipient == "bob"
    ));
}

// ============================================================================
// Mailbox Operations
// ============================================================================

#[test]
fn pop_unread_partial_preserves_order() {
    let state = with_account(ChatState::new(), "alice");
    let state = with_account(state, "bob");
    let (state, _) = send(state, "alice", "bob", "one");
    let (state, _) = send(state, "alice", "bob", "two");
    let (state, _) = send(state, "alice", "bob", "three");

    let (state, reply, _) = apply_committed(
        state,
        Command::PopUnread {
            name: "bob".to_string(),
            count: 2,
        },
    );
    let messages = match reply {
        Ok(ApplyReply::UnreadPopped { messages }) => messages,
        other => panic!("unexpected reply: {other:?}"),
    };
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "two"]);

    let counts = state.counts("bob").unwrap();
    assert_eq!((counts.unread, counts.read), (1, 2));
}

#[test]
fn pop_unread_negative_count_drains_everything() {
    let state = with_account(ChatState::new(), "alice");
    let state = with_account(state, "bob");
    let (state, _) = send(state, "alice", "bob", "hi");

    let (state, reply, _) = apply_committed(
        state,
        Command::PopUnread {
            name: "bob".to_string(),
            count: -1,
        },
    );
    match reply {
        Ok(ApplyReply::UnreadPopped { messages }) => {
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].sender, "alice");
            assert_eq!(messages[0].content, "hi");
        }
        other => panic!("unexpected reply: {other:?}"),
    }
    let counts = state.counts("bob").unwrap();
    assert_eq!((counts.unread, counts.read), (0, 1));
}

#[test]
fn pop_unread_bounded_by_available() {
    let state = with_account(ChatState::new(), "bob");
    let (_, reply, _) = apply_committed(
        state,
        Command::PopUnread {
            name: "bob".to_string(),
            count: 10,
        },
    );
    assert_eq!(reply, Ok(ApplyReply::UnreadPopped { messages: vec![] }));
}

#[test]
fn delete_messages_hits_both_mailboxes_and_is_idempotent() {
    let state = with_account(ChatState::new(), "alice");
    let state = with_account(state, "bob");
    let (state, id_unread) = send(state, "alice", "bob", "stays unread");
    let (state, id_read) = send(state, "alice", "bob", "gets read");
    // Move only the first message into read... pop moves head, so pop one
    // then the remaining unread is id_read. Pop the head (id_unread):
    let (state, _, _) = apply_committed(
        state,
        Command::PopUnread {
            name: "bob".to_string(),
            count: 1,
        },
    );
    // Now unread = [id_read], read = [id_unread]. Delete both plus a bogus id.
    let ids = vec![id_unread, id_read, MessageId::new(999)];
    let (state, reply, _) = apply_committed(
        state,
        Command::DeleteMessages {
            name: "bob".to_string(),
            ids: ids.clone(),
        },
    );
    assert_eq!(reply, Ok(ApplyReply::MessagesDeleted));
    let counts = state.counts("bob").unwrap();
    assert_eq!((counts.unread, counts.read), (0, 0));

    // Second delete of the same ids is a no-op.
    let snapshot_before = state.snapshot();
    let (state, reply, _) = apply_committed(
        state,
        Command::DeleteMessages {
            name: "bob".to_string(),
            ids,
        },
    );
    assert_eq!(reply, Ok(ApplyReply::MessagesDeleted));
    assert_eq!(state.snapshot(), snapshot_before);
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn list_users_pattern_and_paging() {
    let state = with_account(ChatState::new(), "alice");
    let state = with_account(state, "bob");
    let state = with_account(state, "carol");

    assert_eq!(state.list_users("*", 0, -1).len(), 3);
    assert_eq!(state.list_users("a*", 0, -1), vec!["alice".to_string()]);
    assert_eq!(
        state.list_users("", 1, 1),
        vec!["bob".to_string()],
        "offset then limit over sorted names"
    );
    assert!(state.list_users("z*", 0, -1).is_empty());
}

#[test]
fn read_messages_pages_from_oldest() {
    let state = with_account(ChatState::new(), "alice");
    let state = with_account(state, "bob");
    let (state, _) = send(state, "alice", "bob", "one");
    let (state, _) = send(state, "alice", "bob", "two");
    let (state, _) = send(state, "alice", "bob", "three");
    let (state, _, _) = apply_committed(
        state,
        Command::PopUnread {
            name: "bob".to_string(),
            count: -1,
        },
    );

    let all = state.read_messages("bob", 0, -1).unwrap();
    let contents: Vec<&str> = all.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "two", "three"]);

    // Page of one, skipping the oldest: expect "two".
    let window = state.read_messages("bob", 1, 1).unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].content, "two");

    // Offset past the end yields an empty page, not a panic.
    assert!(state.read_messages("bob", 9, -1).unwrap().is_empty());
    // Limit past the end is clipped to what exists.
    let tail = state.read_messages("bob", 2, 10).unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].content, "three");

    assert!(state.read_messages("nobody", 0, -1).is_none());
}

// ============================================================================
// Encoding & Snapshot Laws
// ============================================================================

#[test]
fn command_payload_round_trip() {
    let cmd = Command::SendMessage {
        sender: "alice".to_string(),
        recipient: "bob".to_string(),
        content: "hi".to_string(),
        deliver_read: false,
    };
    let payload = cmd.encode_payload();
    let decoded = Command::decode(CommandKind::SendMessage, &payload).unwrap();
    assert_eq!(decoded, cmd);

    // A mismatched kind tag is rejected.
    let err = Command::decode(CommandKind::DeleteAccount, &payload).unwrap_err();
    assert!(matches!(err, KernelError::CommandShape { .. }));
}

#[test]
fn snapshot_restore_round_trip_is_byte_identical() {
    let state = with_account(ChatState::new(), "alice");
    let state = with_account(state, "bob");
    let (state, _) = send(state, "alice", "bob", "hello");
    let (state, _, _) = apply_committed(
        state,
        Command::PopUnread {
            name: "bob".to_string(),
            count: -1,
        },
    );

    let blob = state.snapshot();
    let restored = ChatState::restore(&blob).unwrap();
    assert_eq!(restored, state);
    assert_eq!(restored.snapshot(), blob);
}

// ============================================================================
// Replay Determinism
// ============================================================================

fn arb_command() -> impl Strategy<Value = Command> {
    let name = prop::sample::select(vec!["alice", "bob", "carol", ""]);
    prop_oneof![
        name.clone().prop_map(|n| Command::CreateAccount {
            name: n.to_string(),
            credential: Credential {
                hash: Bytes::from_static(b"h"),
                salt: Bytes::from_static(b"s"),
            },
        }),
        name.clone()
            .prop_map(|n| Command::DeleteAccount { name: n.to_string() }),
        (name.clone(), name.clone(), any::<bool>()).prop_map(|(from, to, hint)| {
            Command::SendMessage {
                sender: from.to_string(),
                recipient: to.to_string(),
                content: "x".to_string(),
                deliver_read: hint,
            }
        }),
        (name.clone(), -1i64..4).prop_map(|(n, count)| Command::PopUnread {
            name: n.to_string(),
            count,
        }),
        (name, prop::collection::vec(1u64..8, 0..4)).prop_map(|(n, ids)| {
            Command::DeleteMessages {
                name: n.to_string(),
                ids: ids.into_iter().map(MessageId::new).collect(),
            }
        }),
    ]
}

proptest! {
    /// Replaying the same committed command sequence on a fresh state
    /// yields an identical snapshot: apply is deterministic.
    #[test]
    fn replay_is_deterministic(commands in prop::collection::vec(arb_command(), 0..40)) {
        let mut a = ChatState::new();
        let mut b = ChatState::new();
        for cmd in &commands {
            let (next, _, _) = apply_committed(a, cmd.clone());
            a = next;
        }
        for cmd in &commands {
            let (next, _, _) = apply_committed(b, cmd.clone());
            b = next;
        }
        prop_assert_eq!(a.snapshot(), b.snapshot());
    }
}

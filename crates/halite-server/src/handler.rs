//! Client request routing.
//!
//! Reads are answered immediately from the local applied state; mutations
//! become replicated commands and the connection parks until the apply
//! pipeline produces the outcome. The split keeps this module pure
//! enough to unit test against a bare consensus state.

use halite_kernel::{ApplyReply, Command, KernelError};
use halite_raft::RaftState;
use halite_types::ErrorKind;
use halite_wire::{ErrorResponse, RequestPayload, ResponsePayload};
use mio::Token;

use crate::auth;
use crate::session::SessionTable;

/// What the server should do with a request.
#[derive(Debug)]
pub enum Action {
    /// Answer immediately.
    Reply(ResponsePayload),
    /// Replicate this command and park the connection on its log index.
    Mutate(Command),
    /// Bind the session to `account`, then answer `LoggedIn`.
    Bind(String),
    /// Clear the session, then answer `LoggedOut`.
    Unbind,
    /// Mark the connection subscribed, then answer `Subscribed`.
    Subscribe,
    /// Answer who we think leads (the server fills in the address).
    LeaderQuery,
}

fn error(code: ErrorKind, message: impl Into<String>) -> Action {
    Action::Reply(ResponsePayload::Error(ErrorResponse {
        code,
        message: message.into(),
        leader_hint: None,
    }))
}

/// Routes one request. `raft` supplies the applied chat state for reads;
/// `sessions` supplies the caller's identity and the online hint.
pub fn route(
    payload: RequestPayload,
    token: Token,
    raft: &RaftState,
    sessions: &SessionTable,
) -> Action {
    match payload {
        // ====================================================================
        // Account Registration & Authentication
        // ====================================================================
        RequestPayload::CreateAccount { name, password } => {
            if name.is_empty() {
                return error(ErrorKind::InvalidArgument, "account name must not be empty");
            }
            // Fast-path check; the state machine is the authority and
            // re-checks at apply time.
            if raft.chat().account_exists(&name) {
                return error(ErrorKind::AlreadyExists, format!("account '{name}' exists"));
            }
            let credential = auth::derive_credential(&password);
            Action::Mutate(Command::CreateAccount { name, credential })
        }

        RequestPayload::Login { name, password } => {
            let Some(credential) = raft.chat().credential(&name) else {
                return error(ErrorKind::NotFound, format!("no account '{name}'"));
            };
            if !auth::verify_password(&password, credential) {
                return error(ErrorKind::Unauthenticated, "invalid credentials");
            }
            Action::Bind(name)
        }

        RequestPayload::Logout => Action::Unbind,

        // ====================================================================
        // Account-Scoped Mutations
        // ====================================================================
        RequestPayload::DeleteAccount => match sessions.account(token) {
            Some(name) => Action::Mutate(Command::DeleteAccount {
                name: name.to_string(),
            }),
            None => error(ErrorKind::Unauthenticated, "login required"),
        },

        RequestPayload::SendMessage { recipient, content } => {
            let Some(sender) = sessions.account(token) else {
                return error(ErrorKind::Unauthenticated, "login required");
            };
            if !raft.chat().account_exists(&recipient) {
                return error(ErrorKind::NotFound, format!("no account '{recipient}'"));
            }
            // Online hint: decided here, at submission, from this node's
            // live sessions — and carried in the replicated payload so
            // every replica applies the same routing.
            let deliver_read = sessions.has_subscribers(&recipient);
            Action::Mutate(Command::SendMessage {
                sender: sender.to_string(),
                recipient,
                content,
                deliver_read,
            })
        }

        RequestPayload::PopUnread { count } => match sessions.account(token) {
            Some(name) => Action::Mutate(Command::PopUnread {
                name: name.to_string(),
                count,
            }),
            None => error(ErrorKind::Unauthenticated, "login required"),
        },

        RequestPayload::DeleteMessages { ids } => match sessions.account(token) {
            Some(name) => Action::Mutate(Command::DeleteMessages {
                name: name.to_string(),
                ids,
            }),
            None => error(ErrorKind::Unauthenticated, "login required"),
        },

        // ====================================================================
        // Reads (served from local applied state, any replica)
        // ====================================================================
        RequestPayload::ListUsers {
            pattern,
            offset,
            limit,
        } => Action::Reply(ResponsePayload::Users {
            names: raft.chat().list_users(&pattern, offset as usize, limit),
        }),

        RequestPayload::GetCounts => match sessions.account(token) {
            Some(name) => match raft.chat().counts(name) {
                Some(counts) => Action::Reply(ResponsePayload::Counts {
                    unread: counts.unread as u64,
                    read: counts.read as u64,
                }),
                None => error(ErrorKind::NotFound, "account no longer exists"),
            },
            None => error(ErrorKind::Unauthenticated, "login required"),
        },

        RequestPayload::GetReadMessages { offset, limit } => match sessions.account(token) {
            Some(name) => match raft.chat().read_messages(name, offset as usize, limit) {
                Some(messages) => Action::Reply(ResponsePayload::ReadMessages { messages }),
                None => error(ErrorKind::NotFound, "account no longer exists"),
            },
            None => error(ErrorKind::Unauthenticated, "login required"),
        },

        RequestPayload::Subscribe => match sessions.account(token) {
            Some(_) => Action::Subscribe,
            None => error(ErrorKind::Unauthenticated, "login required"),
        },

        RequestPayload::GetLeader => Action::LeaderQuery,
    }
}

/// Maps an apply outcome onto the wire response for the submitter.
pub fn reply_to_payload(reply: Result<ApplyReply, KernelError>) -> ResponsePayload {
    match reply {
        Ok(ApplyReply::AccountCreated) => ResponsePayload::AccountCreated,
        Ok(ApplyReply::AccountDeleted) => ResponsePayload::AccountDeleted,
        Ok(ApplyReply::MessageSent { id, delivered_read }) => ResponsePayload::MessageSent {
            id,
            delivered_read,
        },
        Ok(ApplyReply::UnreadPopped { messages }) => ResponsePayload::UnreadPopped { messages },
        Ok(ApplyReply::MessagesDeleted) => ResponsePayload::MessagesDeleted,
        Err(e) => ResponsePayload::Error(ErrorResponse {
            code: e.error_kind(),
            message: e.to_string(),
            leader_hint: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halite_raft::{ClusterConfig, RaftOptions, TimeoutKind};
    use halite_types::NodeId;

    /// A single-node leader whose submissions apply immediately: the
    /// closest thing to a database fixture the consensus layer offers.
    fn leader_with_accounts(names: &[&str]) -> RaftState {
        let cluster = ClusterConfig::new(vec![NodeId::new(0)]);
        let state = RaftState::new(NodeId::new(0), cluster, RaftOptions::default());
        let (mut state, _) = state.on_timeout(TimeoutKind::Election);
        assert!(state.is_leader());
        for name in names {
            let cmd = Command::CreateAccount {
                name: (*name).to_string(),
                credential: auth::derive_with_salt("pw", b"fixed-salt-16byte"),
            };
            let (next, submitted, _) = state.submit_command(&cmd);
            submitted.unwrap();
            state = next;
        }
        state
    }

    #[test]
    fn login_happy_path_binds() {
        let raft = leader_with_accounts(&["alice"]);
        let sessions = SessionTable::new(4);
        let action = route(
            RequestPayload::Login {
                name: "alice".to_string(),
                password: "pw".to_string(),
            },
            Token(1),
            &raft,
            &sessions,
        );
        assert!(matches!(action, Action::Bind(name) if name == "alice"));
    }

    #[test]
    fn login_wrong_password_unauthenticated() {
        let raft = leader_with_accounts(&["alice"]);
        let sessions = SessionTable::new(4);
        let action = route(
            RequestPayload::Login {
                name: "alice".to_string(),
                password: "wrong".to_string(),
            },
            Token(1),
            &raft,
            &sessions,
        );
        match action {
            Action::Reply(ResponsePayload::Error(e)) => {
                assert_eq!(e.code, ErrorKind::Unauthenticated);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn login_unknown_account_not_found() {
        let raft = leader_with_accounts(&[]);
        let sessions = SessionTable::new(4);
        let action = route(
            RequestPayload::Login {
                name: "ghost".to_string(),
                password: "pw".to_string(),
            },
            Token(1),
            &raft,
            &sessions,
        );
        match action {
            Action::Reply(ResponsePayload::Error(e)) => assert_eq!(e.code, ErrorKind::NotFound),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn mutations_require_session() {
        let raft = leader_with_accounts(&["alice", "bob"]);
        let sessions = SessionTable::new(4);
        for payload in [
            RequestPayload::DeleteAccount,
            RequestPayload::SendMessage {
                recipient: "bob".to_string(),
                content: "hi".to_string(),
            },
            RequestPayload::PopUnread { count: -1 },
            RequestPayload::DeleteMessages { ids: vec![] },
            RequestPayload::Subscribe,
            RequestPayload::GetCounts,
        ] {
            let action = route(payload, Token(1), &raft, &sessions);
            match action {
                Action::Reply(ResponsePayload::Error(e)) => {
                    assert_eq!(e.code, ErrorKind::Unauthenticated);
                }
                other => panic!("expected unauthenticated, got {other:?}"),
            }
        }
    }

    #[test]
    fn send_message_carries_online_hint() {
        let raft = leader_with_accounts(&["alice", "bob"]);
        let mut sessions = SessionTable::new(4);
        sessions.bind(Token(1), "alice");
        sessions.bind(Token(2), "bob");
        sessions.subscribe(Token(2));

        let action = route(
            RequestPayload::SendMessage {
                recipient: "bob".to_string(),
                content: "hi".to_string(),
            },
            Token(1),
            &raft,
            &sessions,
        );
        match action {
            Action::Mutate(Command::SendMessage {
                deliver_read,
                sender,
                ..
            }) => {
                assert!(deliver_read, "bob subscribes locally");
                assert_eq!(sender, "alice");
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn create_account_precheck_rejects_duplicates() {
        let raft = leader_with_accounts(&["alice"]);
        let sessions = SessionTable::new(4);
        let action = route(
            RequestPayload::CreateAccount {
                name: "alice".to_string(),
                password: "pw".to_string(),
            },
            Token(1),
            &raft,
            &sessions,
        );
        match action {
            Action::Reply(ResponsePayload::Error(e)) => {
                assert_eq!(e.code, ErrorKind::AlreadyExists);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn list_users_is_a_local_read() {
        let raft = leader_with_accounts(&["alice", "bob"]);
        let sessions = SessionTable::new(4);
        let action = route(
            RequestPayload::ListUsers {
                pattern: "a*".to_string(),
                offset: 0,
                limit: -1,
            },
            Token(1),
            &raft,
            &sessions,
        );
        match action {
            Action::Reply(ResponsePayload::Users { names }) => {
                assert_eq!(names, vec!["alice".to_string()]);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }
}

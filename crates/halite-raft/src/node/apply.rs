//! The apply pipeline.
//!
//! Drains newly committed entries in strict index order into the chat
//! state machine, exactly once per node lifetime: the `last_applied`
//! cursor only moves forward, and every move emits the entry's reply as
//! a [`Effect::Respond`] plus any state machine effects.

use halite_kernel::{apply_committed, Command};

use super::{Effect, RaftOutput, RaftState};

impl RaftState {
    /// Applies every committed-but-unapplied entry, appending the
    /// resulting effects to `output`.
    pub(crate) fn apply_committed_entries(&mut self, output: &mut RaftOutput) {
        while self.last_applied < self.commit_index {
            let index = self.last_applied.next();
            let entry = self
                .entry(index)
                .cloned()
                .expect("committed entries are always present in the log");

            let reply = match Command::decode(entry.kind, &entry.payload) {
                Ok(command) => {
                    let chat = std::mem::take(&mut self.chat);
                    let (chat, reply, chat_effects) = apply_committed(chat, command);
                    self.chat = chat;
                    for effect in chat_effects {
                        output.effects.push(Effect::Chat(effect));
                    }
                    reply
                }
                Err(e) => {
                    // The entry is committed, so it still consumes its
                    // index on every replica; only the submitter hears
                    // about the decode failure.
                    tracing::error!(
                        node = %self.id,
                        index = %index,
                        "committed entry payload failed to decode"
                    );
                    Err(e)
                }
            };

            output.effects.push(Effect::Respond { index, reply });
            self.last_applied = index;
            self.bytes_since_snapshot += entry.payload.len() as u64;
        }

        if self.opts.snapshot_threshold_bytes > 0
            && self.bytes_since_snapshot >= self.opts.snapshot_threshold_bytes
        {
            tracing::info!(
                node = %self.id,
                last_applied = %self.last_applied,
                bytes = self.bytes_since_snapshot,
                "snapshot threshold reached, checkpointing"
            );
            output.effects.push(Effect::PersistSnapshot {
                last_applied: self.last_applied,
                state: self.chat.snapshot(),
            });
            self.bytes_since_snapshot = 0;
        }
    }
}

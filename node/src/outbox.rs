//! Bounded retransmission of messages that are not refreshed periodically.
//!
//! Join and RoleChange are tracked here after their first send and resent
//! until the destination acknowledges the sequence number or the retry
//! budget runs out.

use crate::config::RetryPolicy;
use log::{debug, warn};
use shared::GameMessage;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug)]
struct Pending {
    message: GameMessage,
    remaining: u32,
    next_due: Instant,
}

#[derive(Debug)]
pub struct Outbox {
    policy: RetryPolicy,
    pending: HashMap<(u64, SocketAddr), Pending>,
}

impl Outbox {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pending: HashMap::new(),
        }
    }

    /// Starts tracking a message that has just been sent once.
    pub fn track(&mut self, message: GameMessage, to: SocketAddr, now: Instant) {
        if self.policy.attempts == 0 {
            return;
        }
        self.pending.insert(
            (message.msg_seq, to),
            Pending {
                message,
                remaining: self.policy.attempts,
                next_due: now + self.policy.interval,
            },
        );
    }

    /// Stops retransmitting `msg_seq` to `from`. Returns whether anything
    /// was pending.
    pub fn acknowledge(&mut self, msg_seq: u64, from: SocketAddr) -> bool {
        let acknowledged = self.pending.remove(&(msg_seq, from)).is_some();
        if acknowledged {
            debug!("{} acknowledged message {}", from, msg_seq);
        }
        acknowledged
    }

    /// Messages whose retry time has come, each paired with its destination.
    pub fn due(&mut self, now: Instant) -> Vec<(GameMessage, SocketAddr)> {
        let interval = self.policy.interval;
        let mut resend = Vec::new();

        self.pending.retain(|(msg_seq, to), pending| {
            if pending.next_due > now {
                return true;
            }
            resend.push((pending.message.clone(), *to));
            pending.remaining -= 1;
            pending.next_due = now + interval;
            if pending.remaining == 0 {
                warn!(
                    "Giving up on {} {} to {} after the last retry",
                    pending.message.kind(),
                    msg_seq,
                    to
                );
                return false;
            }
            true
        });

        resend
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

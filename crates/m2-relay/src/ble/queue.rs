//! Single-outstanding-write serializer
//!
//! GATT allows one write in flight per connection. Writes submitted while one
//! is outstanding wait in one of two FIFO queues. At each drain point (a
//! completion, or a submission while idle) the next write is taken from the
//! relay-status slot first, then the config queue, then the command queue.
//! Relay status is a single byte where only the latest value matters, so it
//! is a slot rather than a queue.

use bytes::Bytes;
use std::collections::VecDeque;

use crate::config::MAX_WRITE_ATTEMPTS;

/// Queue a caller-visible write goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    /// `KEY=VALUE` settings
    Config,
    /// Commands relayed from the server
    Command,
}

/// Characteristic a write is destined for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteTarget {
    /// Relay status byte
    RelayStatus,
    /// Config characteristic
    Config,
    /// Command characteristic
    Command,
}

impl From<WriteKind> for WriteTarget {
    fn from(kind: WriteKind) -> Self {
        match kind {
            WriteKind::Config => WriteTarget::Config,
            WriteKind::Command => WriteTarget::Command,
        }
    }
}

/// A write waiting for, or holding, the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    /// Destination
    pub target: WriteTarget,
    /// Value to write
    pub payload: Bytes,
    /// Times this write has been issued
    pub attempts: u8,
}

impl PendingWrite {
    fn new(target: WriteTarget, payload: Bytes) -> Self {
        Self {
            target,
            payload,
            attempts: 0,
        }
    }
}

/// Outbound queues of the GATT link
#[derive(Debug)]
pub struct WriteQueue {
    in_flight: Option<PendingWrite>,
    relay_status: Option<PendingWrite>,
    config: VecDeque<PendingWrite>,
    command: VecDeque<PendingWrite>,
    max_attempts: u8,
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::with_max_attempts(MAX_WRITE_ATTEMPTS)
    }

    /// Create an empty queue with a custom retry budget
    pub fn with_max_attempts(max_attempts: u8) -> Self {
        Self {
            in_flight: None,
            relay_status: None,
            config: VecDeque::new(),
            command: VecDeque::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Append a config or command write
    pub fn push(&mut self, kind: WriteKind, payload: Bytes) {
        let write = PendingWrite::new(kind.into(), payload);
        match kind {
            WriteKind::Config => self.config.push_back(write),
            WriteKind::Command => self.command.push_back(write),
        }
    }

    /// Replace the pending relay status value
    pub fn set_relay_status(&mut self, value: u8) {
        self.relay_status = Some(PendingWrite::new(
            WriteTarget::RelayStatus,
            Bytes::copy_from_slice(&[value]),
        ));
    }

    /// Take the next write if the link is idle
    ///
    /// The returned write is now in flight; the caller must issue it and
    /// report back through [`complete`](Self::complete) or [`fail`](Self::fail).
    pub fn next_write(&mut self) -> Option<PendingWrite> {
        if self.in_flight.is_some() {
            return None;
        }

        let mut write = self
            .relay_status
            .take()
            .or_else(|| self.config.pop_front())
            .or_else(|| self.command.pop_front())?;
        write.attempts += 1;
        self.in_flight = Some(write.clone());
        Some(write)
    }

    /// The in-flight write succeeded
    pub fn complete(&mut self) -> Option<PendingWrite> {
        self.in_flight.take()
    }

    /// The in-flight write failed
    ///
    /// The write goes back to the front of its queue so it is retried at the
    /// next drain point. Returns it instead when its attempts are used up.
    pub fn fail(&mut self) -> Option<PendingWrite> {
        let write = self.in_flight.take()?;
        if write.attempts >= self.max_attempts {
            return Some(write);
        }

        match write.target {
            WriteTarget::RelayStatus => {
                // a newer status supersedes the failed one
                if self.relay_status.is_none() {
                    self.relay_status = Some(write);
                }
            }
            WriteTarget::Config => self.config.push_front(write),
            WriteTarget::Command => self.command.push_front(write),
        }
        None
    }

    /// Whether a write is outstanding
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Writes waiting, in-flight excluded
    pub fn pending(&self) -> usize {
        self.config.len() + self.command.len() + usize::from(self.relay_status.is_some())
    }

    /// Drop everything without writing it
    pub fn clear(&mut self) {
        self.in_flight = None;
        self.relay_status = None;
        self.config.clear();
        self.command.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(tag: &str) -> Bytes {
        Bytes::copy_from_slice(tag.as_bytes())
    }

    fn drain(queue: &mut WriteQueue) -> Vec<Bytes> {
        let mut written = Vec::new();
        while let Some(write) = queue.next_write() {
            written.push(write.payload);
            queue.complete();
        }
        written
    }

    #[test]
    fn test_one_write_in_flight() {
        let mut queue = WriteQueue::new();
        queue.push(WriteKind::Command, payload("a"));
        queue.push(WriteKind::Command, payload("b"));

        let first = queue.next_write().unwrap();
        assert_eq!(first.payload, payload("a"));
        assert!(queue.is_busy());
        assert!(queue.next_write().is_none());

        queue.complete();
        assert_eq!(queue.next_write().unwrap().payload, payload("b"));
    }

    #[test]
    fn test_config_drains_before_command() {
        let mut queue = WriteQueue::new();
        queue.push(WriteKind::Command, payload("c0"));
        let _in_flight = queue.next_write().unwrap();

        queue.push(WriteKind::Command, payload("c1"));
        queue.push(WriteKind::Config, payload("k1"));
        queue.push(WriteKind::Command, payload("c2"));
        queue.push(WriteKind::Config, payload("k2"));
        queue.complete();

        assert_eq!(
            drain(&mut queue),
            vec![payload("k1"), payload("k2"), payload("c1"), payload("c2")]
        );
    }

    #[test]
    fn test_config_arriving_mid_drain_jumps_commands() {
        let mut queue = WriteQueue::new();
        for tag in ["c1", "c2", "c3"] {
            queue.push(WriteKind::Command, payload(tag));
        }

        let mut written = vec![queue.next_write().unwrap().payload];
        queue.complete();
        queue.push(WriteKind::Config, payload("k1"));
        written.extend(drain(&mut queue));

        assert_eq!(
            written,
            vec![payload("c1"), payload("k1"), payload("c2"), payload("c3")]
        );
    }

    #[test]
    fn test_fifo_within_queue_for_bursts() {
        let mut queue = WriteQueue::new();
        let mut expected_config = Vec::new();
        let mut expected_command = Vec::new();
        for i in 0..50 {
            let tag = payload(&i.to_string());
            if i % 3 == 0 {
                queue.push(WriteKind::Config, tag.clone());
                expected_config.push(tag);
            } else {
                queue.push(WriteKind::Command, tag.clone());
                expected_command.push(tag);
            }
        }

        let mut expected = expected_config;
        expected.extend(expected_command);
        assert_eq!(drain(&mut queue), expected);
    }

    #[test]
    fn test_relay_status_is_last_value_wins() {
        let mut queue = WriteQueue::new();
        queue.push(WriteKind::Config, payload("k1"));
        queue.set_relay_status(1);
        queue.set_relay_status(0);

        assert_eq!(
            drain(&mut queue),
            vec![Bytes::from_static(&[0]), payload("k1")]
        );
    }

    #[test]
    fn test_failed_write_retried_first() {
        let mut queue = WriteQueue::new();
        queue.push(WriteKind::Command, payload("c1"));
        queue.push(WriteKind::Command, payload("c2"));

        let first = queue.next_write().unwrap();
        assert_eq!(first.attempts, 1);
        assert!(queue.fail().is_none());
        assert!(!queue.is_busy());

        let retry = queue.next_write().unwrap();
        assert_eq!(retry.payload, payload("c1"));
        assert_eq!(retry.attempts, 2);
    }

    #[test]
    fn test_failed_write_dropped_after_max_attempts() {
        let mut queue = WriteQueue::with_max_attempts(2);
        queue.push(WriteKind::Config, payload("k1"));

        queue.next_write().unwrap();
        assert!(queue.fail().is_none());
        queue.next_write().unwrap();
        let dropped = queue.fail().unwrap();
        assert_eq!(dropped.payload, payload("k1"));
        assert!(queue.next_write().is_none());
    }

    #[test]
    fn test_failed_relay_status_superseded() {
        let mut queue = WriteQueue::new();
        queue.set_relay_status(1);
        queue.next_write().unwrap();
        queue.set_relay_status(0);
        assert!(queue.fail().is_none());

        assert_eq!(drain(&mut queue), vec![Bytes::from_static(&[0])]);
    }

    #[test]
    fn test_clear_discards_everything() {
        let mut queue = WriteQueue::new();
        queue.push(WriteKind::Config, payload("k1"));
        queue.push(WriteKind::Command, payload("c1"));
        queue.next_write().unwrap();
        queue.set_relay_status(1);

        queue.clear();
        assert!(!queue.is_busy());
        assert_eq!(queue.pending(), 0);
        assert!(queue.next_write().is_none());
    }
}

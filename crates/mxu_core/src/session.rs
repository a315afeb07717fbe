//! Per-request protocol state.
//!
//! A session is created when a serial request begins and dropped when it
//! completes or fails. It is never stored on the transport, so no state
//! survives from one request to the next.

use crate::handshake::Elapsed;
use log::debug;

/// Protocol step a request is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SendingA,
    AwaitingA,
    SendingB,
    AwaitingB,
    Starting,
    Computing,
    Triggering,
    Receiving,
    Complete,
    Failed,
}

#[derive(Debug)]
pub struct TransferSession {
    phase: Phase,
    words_sent: usize,
    words_expected: usize,
    words_received: usize,
    words_to_receive: usize,
    poll_budget_remaining: Option<u64>,
    polled: u64,
}

impl TransferSession {
    /// `words_expected` counts headers and operand words to send;
    /// `poll_budget` bounds clock units polled across all handshakes.
    pub fn new(words_expected: usize, words_to_receive: usize, poll_budget: Option<u64>) -> Self {
        Self {
            phase: Phase::Idle,
            words_sent: 0,
            words_expected,
            words_received: 0,
            words_to_receive,
            poll_budget_remaining: poll_budget,
            polled: 0,
        }
    }

    /// Phase the request is in.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Moves to `phase`. Transitions are logged at debug level.
    pub fn enter(&mut self, phase: Phase) {
        debug!("session {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Counts one word shifted out.
    pub fn record_sent(&mut self) {
        self.words_sent += 1;
    }

    /// Counts one product word shifted in.
    pub fn record_received(&mut self) {
        self.words_received += 1;
    }

    /// Words shifted out so far, headers included.
    pub fn words_sent(&self) -> usize {
        self.words_sent
    }

    /// Words to send, headers included.
    pub fn words_expected(&self) -> usize {
        self.words_expected
    }

    /// Product words shifted in so far.
    pub fn words_received(&self) -> usize {
        self.words_received
    }

    /// Product words the request will read, `M * N`.
    pub fn words_to_receive(&self) -> usize {
        self.words_to_receive
    }

    /// Clock units polled so far across all handshakes.
    pub fn polled(&self) -> u64 {
        self.polled
    }

    /// Iterations the next handshake may use: the per-flag budget, capped
    /// by what is left of the request budget.
    pub fn budget_for(&self, flag_budget: u32) -> u32 {
        match self.poll_budget_remaining {
            Some(remaining) => remaining.min(flag_budget as u64) as u32,
            None => flag_budget,
        }
    }

    /// Deducts a finished handshake from the request budget.
    pub fn charge(&mut self, elapsed: Elapsed) {
        self.polled += elapsed.0 as u64;
        if let Some(remaining) = self.poll_budget_remaining.as_mut() {
            *remaining = remaining.saturating_sub(elapsed.0 as u64);
        }
    }

    /// True when the request finished with every word accounted for.
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
            && self.words_sent == self.words_expected
            && self.words_received == self.words_to_receive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_budget_caps_flag_budget() {
        let mut session = TransferSession::new(4, 1, Some(150));
        assert_eq!(session.budget_for(100), 100);
        session.charge(Elapsed(80));
        assert_eq!(session.budget_for(100), 70);
        session.charge(Elapsed(70));
        assert_eq!(session.budget_for(100), 0);
        assert_eq!(session.polled(), 150);
    }

    #[test]
    fn unbounded_request_uses_flag_budget() {
        let mut session = TransferSession::new(4, 1, None);
        session.charge(Elapsed(1_000_000));
        assert_eq!(session.budget_for(100), 100);
    }

    #[test]
    fn completion_requires_all_words() {
        let mut session = TransferSession::new(1, 1, None);
        session.enter(Phase::Complete);
        assert!(!session.is_complete());
        session.record_sent();
        session.record_received();
        assert!(session.is_complete());
    }
}

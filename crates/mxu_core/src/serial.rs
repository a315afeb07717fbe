//! Bit-serial transport over the four-wire link.
//!
//! A word transfer is an explicit clock-phase state machine ([`WordShift`])
//! stepped by [`WordShift::advance`]. [`SerialTransport`] drives a shift to
//! completion synchronously, so a started word always runs all 32 bits.
//!
//! Phase order for one word, one clock unit per hold:
//!
//! ```text
//! frame-select low
//! 32 x { data-out = bit (send only); clock low; hold; clock high; hold; sample data-in (receive only) }
//! clock low; hold (trailing margin)
//! frame-select high
//! ```

use crate::codec::{Tag, encode_header, float_to_word, word_to_float};
use crate::config::OffloadConfig;
use crate::driver::MatmulTransport;
use crate::handshake::{HandshakeMonitor, StatusFlag};
use crate::link::{AcceleratorLink, Line};
use crate::matrix::Matrix;
use crate::session::{Phase, TransferSession};
use crate::{OffloadError, Result};
use bitvec::prelude::*;
use log::{debug, trace, warn};
use mxu_common::timing::{START_PULSE_UNITS, TRAILING_UNITS};
use mxu_common::wire::WORD_BITS;

/// Which way a word moves across the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockPhase {
    Select,
    Low,
    High,
    Trailing,
    Release,
    Done,
}

/// What a single [`WordShift::advance`] step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseObservation {
    /// Frame-select asserted.
    FrameOpened,
    /// Clock driven low for bit `bit` (0 = most significant).
    ClockLow { bit: u32 },
    /// Clock driven high for bit `bit`; `sampled` holds data-in on receive.
    ClockHigh { bit: u32, sampled: Option<bool> },
    /// Trailing margin held with the clock low.
    Margin,
    /// Frame-select released; carries the word sent or assembled.
    Complete(u32),
}

/// Clock-phase state machine moving one 32-bit word, MSB first.
#[derive(Debug, Clone)]
pub struct WordShift {
    direction: Direction,
    phase: ClockPhase,
    bit: u32,
    register: BitArray<u32, Msb0>,
}

impl WordShift {
    /// Steps needed to take a fresh shift to [`PhaseObservation::Complete`].
    pub const PHASES: u32 = 2 * WORD_BITS + 3;

    /// Shift that transmits `word`, MSB first.
    pub fn send(word: u32) -> Self {
        Self {
            direction: Direction::Send,
            phase: ClockPhase::Select,
            bit: 0,
            register: BitArray::new(word),
        }
    }

    /// Shift that samples 32 bits from data-in.
    pub fn receive() -> Self {
        Self {
            direction: Direction::Receive,
            phase: ClockPhase::Select,
            bit: 0,
            register: BitArray::ZERO,
        }
    }

    /// Whether the shift transmits or receives.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// True once frame-select has been released after the last bit.
    pub fn is_complete(&self) -> bool {
        self.phase == ClockPhase::Done
    }

    /// Performs the next clock phase on `link`.
    ///
    /// Once complete, further calls return `Complete` without touching the
    /// link.
    pub fn advance<L: AcceleratorLink + ?Sized>(&mut self, link: &mut L) -> Result<PhaseObservation> {
        match self.phase {
            ClockPhase::Select => {
                link.drive_line(Line::FrameSelectN, false)?;
                self.phase = ClockPhase::Low;
                Ok(PhaseObservation::FrameOpened)
            }
            ClockPhase::Low => {
                let bit = self.bit;
                if self.direction == Direction::Send {
                    link.drive_line(Line::DataOut, self.register[bit as usize])?;
                }
                link.drive_line(Line::Clock, false)?;
                link.advance_clock(1)?;
                self.phase = ClockPhase::High;
                Ok(PhaseObservation::ClockLow { bit })
            }
            ClockPhase::High => {
                let bit = self.bit;
                link.drive_line(Line::Clock, true)?;
                link.advance_clock(1)?;
                let sampled = match self.direction {
                    Direction::Send => None,
                    Direction::Receive => {
                        let level = link.sample_line(Line::DataIn)?;
                        self.register.set(bit as usize, level);
                        Some(level)
                    }
                };
                self.bit += 1;
                self.phase = if self.bit == WORD_BITS {
                    ClockPhase::Trailing
                } else {
                    ClockPhase::Low
                };
                Ok(PhaseObservation::ClockHigh { bit, sampled })
            }
            ClockPhase::Trailing => {
                link.drive_line(Line::Clock, false)?;
                link.advance_clock(TRAILING_UNITS)?;
                self.phase = ClockPhase::Release;
                Ok(PhaseObservation::Margin)
            }
            ClockPhase::Release => {
                link.drive_line(Line::FrameSelectN, true)?;
                if self.direction == Direction::Send {
                    link.drive_line(Line::DataOut, false)?;
                }
                self.phase = ClockPhase::Done;
                Ok(PhaseObservation::Complete(self.register.data))
            }
            ClockPhase::Done => Ok(PhaseObservation::Complete(self.register.data)),
        }
    }
}

/// Host side of the serial link.
///
/// Owns the link for its lifetime; borrowing the transport mutably for a
/// whole request is what keeps a second request off the accelerator.
pub struct SerialTransport<L: AcceleratorLink> {
    link: L,
    words_sent: u64,
    words_received: u64,
}

impl<L: AcceleratorLink> SerialTransport<L> {
    /// Wraps `link` with both word counters at zero.
    ///
    /// # Arguments
    ///
    /// * `link` - Accelerator lines, already out of reset or about to be
    ///   reset by the driver
    pub fn new(link: L) -> Self {
        Self {
            link,
            words_sent: 0,
            words_received: 0,
        }
    }

    /// Borrows the underlying link, e.g. to read its clock count.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutable access to the link. Driving lines through it mid-request
    /// desynchronizes the protocol.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Releases the link.
    pub fn into_inner(self) -> L {
        self.link
    }

    /// Lifetime count of words shifted in each direction.
    pub fn word_counts(&self) -> (u64, u64) {
        (self.words_sent, self.words_received)
    }

    /// Shifts one word into the accelerator.
    pub fn send_word(&mut self, word: u32) -> Result<()> {
        trace!("send {word:#010x}");
        self.shift(WordShift::send(word))?;
        self.words_sent += 1;
        Ok(())
    }

    /// Shifts one word out of the accelerator.
    pub fn receive_word(&mut self) -> Result<u32> {
        let word = self.shift(WordShift::receive())?;
        trace!("recv {word:#010x}");
        self.words_received += 1;
        Ok(word)
    }

    fn shift(&mut self, mut shift: WordShift) -> Result<u32> {
        for _ in 0..WordShift::PHASES {
            if let PhaseObservation::Complete(word) = shift.advance(&mut self.link)? {
                return Ok(word);
            }
        }
        Err(OffloadError::link("word shift did not complete"))
    }

    /// Holds `line` high for `units` clock units, then drives it low.
    pub fn pulse(&mut self, line: Line, units: u32) -> Result<()> {
        self.link.drive_line(line, true)?;
        self.link.advance_clock(units)?;
        self.link.drive_line(line, false)
    }

    /// Returns every host-driven line to idle and pulses the active-low
    /// reset for `hold_units`. Required after any failed request.
    pub fn reset(&mut self, hold_units: u32) -> Result<()> {
        debug!("resetting accelerator ({hold_units} units)");
        self.link.drive_line(Line::FrameSelectN, true)?;
        self.link.drive_line(Line::Clock, false)?;
        self.link.drive_line(Line::DataOut, false)?;
        self.link.drive_line(Line::MultiplyStart, false)?;
        self.link.drive_line(Line::ResultTrigger, false)?;
        self.link.drive_line(Line::ResetN, false)?;
        self.link.advance_clock(hold_units)?;
        self.link.drive_line(Line::ResetN, true)?;
        self.link.advance_clock(1)
    }

    fn send_operand(&mut self, session: &mut TransferSession, header: u32, operand: &Matrix) -> Result<()> {
        self.send_word(header)?;
        session.record_sent();
        for &value in operand.values() {
            self.send_word(float_to_word(value))?;
            session.record_sent();
        }
        Ok(())
    }

    fn await_flag(
        &mut self,
        session: &mut TransferSession,
        flag: StatusFlag,
        config: &OffloadConfig,
    ) -> Result<()> {
        let budget = session.budget_for(config.flag_budget);
        let elapsed = HandshakeMonitor::new(&mut self.link).await_flag(flag, budget)?;
        session.charge(elapsed);
        Ok(())
    }

    fn run_protocol(
        &mut self,
        session: &mut TransferSession,
        a: &Matrix,
        b: &Matrix,
        headers: (u32, u32),
        config: &OffloadConfig,
    ) -> Result<Matrix> {
        session.enter(Phase::SendingA);
        self.send_operand(session, headers.0, a)?;
        session.enter(Phase::AwaitingA);
        self.await_flag(session, StatusFlag::ALoaded, config)?;

        session.enter(Phase::SendingB);
        self.send_operand(session, headers.1, b)?;
        session.enter(Phase::AwaitingB);
        self.await_flag(session, StatusFlag::BLoaded, config)?;

        session.enter(Phase::Starting);
        self.pulse(Line::MultiplyStart, START_PULSE_UNITS)?;
        session.enter(Phase::Computing);
        self.await_flag(session, StatusFlag::MultiplyDone, config)?;

        session.enter(Phase::Triggering);
        self.pulse(Line::ResultTrigger, config.result_pulse_units)?;

        session.enter(Phase::Receiving);
        let mut values = Vec::with_capacity(session.words_to_receive());
        for _ in 0..session.words_to_receive() {
            values.push(word_to_float(self.receive_word()?));
            session.record_received();
        }
        let product = Matrix::new(a.rows(), b.cols(), values)?;
        session.enter(Phase::Complete);
        Ok(product)
    }
}

impl<L: AcceleratorLink> MatmulTransport for SerialTransport<L> {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn execute(&mut self, a: &Matrix, b: &Matrix, config: &OffloadConfig) -> Result<Matrix> {
        // Both headers are encoded before the first word moves so an
        // unrepresentable shape never reaches the accelerator.
        let headers = (
            encode_header(Tag::OperandA, a.rows(), a.cols())?,
            encode_header(Tag::OperandB, b.rows(), b.cols())?,
        );
        let mut session = TransferSession::new(
            2 + a.values().len() + b.values().len(),
            a.rows() * b.cols(),
            config.request_budget,
        );

        match self.run_protocol(&mut session, a, b, headers, config) {
            Ok(product) => {
                debug!(
                    "serial request complete: {} words sent, {} received, {} units polled",
                    session.words_sent(),
                    session.words_received(),
                    session.polled()
                );
                Ok(product)
            }
            Err(e) => {
                warn!(
                    "serial request failed in {:?} after {}/{} words sent: {e}",
                    session.phase(),
                    session.words_sent(),
                    session.words_expected()
                );
                session.enter(Phase::Failed);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Captures data-out on every rising clock edge inside a frame and
    /// plays back `outgoing` on data-in, one bit per rising edge.
    #[derive(Default)]
    struct ProbeLink {
        levels: HashMap<Line, bool>,
        captured: Vec<bool>,
        outgoing: u32,
        rising_in_frame: u32,
        units: u32,
        frames_opened: u32,
        frames_closed: u32,
    }

    impl ProbeLink {
        fn level(&self, line: Line) -> bool {
            self.levels
                .get(&line)
                .copied()
                .unwrap_or(matches!(line, Line::FrameSelectN | Line::ResetN))
        }
    }

    impl AcceleratorLink for ProbeLink {
        fn drive_line(&mut self, line: Line, level: bool) -> Result<()> {
            let prev = self.level(line);
            self.levels.insert(line, level);
            match line {
                Line::FrameSelectN if prev && !level => {
                    self.frames_opened += 1;
                    self.rising_in_frame = 0;
                }
                Line::FrameSelectN if !prev && level => self.frames_closed += 1,
                Line::Clock if !prev && level && !self.level(Line::FrameSelectN) => {
                    self.captured.push(self.level(Line::DataOut));
                    self.rising_in_frame += 1;
                }
                _ => {}
            }
            Ok(())
        }

        fn sample_line(&mut self, line: Line) -> Result<bool> {
            match line {
                Line::DataIn if (1..=32).contains(&self.rising_in_frame) => {
                    Ok((self.outgoing >> (32 - self.rising_in_frame)) & 1 == 1)
                }
                other => Ok(self.level(other)),
            }
        }

        fn advance_clock(&mut self, units: u32) -> Result<()> {
            self.units += units;
            Ok(())
        }
    }

    fn bits_to_word(bits: &[bool]) -> u32 {
        bits.iter().fold(0, |acc, &b| (acc << 1) | b as u32)
    }

    #[test]
    fn send_word_shifts_msb_first() {
        let mut transport = SerialTransport::new(ProbeLink::default());
        transport.send_word(0x0A00_2002).unwrap();

        let link = transport.link();
        assert_eq!(link.captured.len(), 32);
        assert_eq!(bits_to_word(&link.captured), 0x0A00_2002);
        assert!(!link.captured[0]);
        assert!(!link.captured[31] && link.captured[30]);
        assert_eq!((link.frames_opened, link.frames_closed), (1, 1));
        assert!(link.level(Line::FrameSelectN));
        assert!(!link.level(Line::Clock));
        assert_eq!(link.units, 2 * 32 + TRAILING_UNITS);
    }

    #[test]
    fn each_call_is_one_frame() {
        let mut transport = SerialTransport::new(ProbeLink::default());
        for word in [0xFFFF_FFFFu32, 0, 0x8000_0001] {
            transport.send_word(word).unwrap();
        }
        let link = transport.link();
        assert_eq!(link.frames_opened, 3);
        assert_eq!(link.captured.len(), 96);
        assert_eq!(bits_to_word(&link.captured[64..]), 0x8000_0001);
        assert_eq!(transport.word_counts(), (3, 0));
    }

    #[test]
    fn receive_word_assembles_msb_first() {
        let mut link = ProbeLink::default();
        link.outgoing = float_to_word(-3.25);
        let mut transport = SerialTransport::new(link);
        let word = transport.receive_word().unwrap();
        assert_eq!(word_to_float(word), -3.25);
        assert_eq!(transport.link().frames_closed, 1);
        assert_eq!(transport.word_counts(), (0, 1));
    }

    #[test]
    fn shift_observations_follow_phase_order() {
        let mut link = ProbeLink::default();
        let mut shift = WordShift::send(0x1);
        let mut observed = Vec::new();
        while !shift.is_complete() {
            observed.push(shift.advance(&mut link).unwrap());
        }
        assert_eq!(observed.len() as u32, WordShift::PHASES);
        assert_eq!(observed[0], PhaseObservation::FrameOpened);
        assert_eq!(observed[1], PhaseObservation::ClockLow { bit: 0 });
        assert_eq!(
            observed[2],
            PhaseObservation::ClockHigh { bit: 0, sampled: None }
        );
        assert_eq!(observed[observed.len() - 2], PhaseObservation::Margin);
        assert_eq!(observed[observed.len() - 1], PhaseObservation::Complete(0x1));
        assert_eq!(shift.advance(&mut link).unwrap(), PhaseObservation::Complete(0x1));
    }

    #[test]
    fn pulse_and_reset_leave_lines_idle() {
        let mut transport = SerialTransport::new(ProbeLink::default());
        transport.pulse(Line::ResultTrigger, 2).unwrap();
        transport.reset(10).unwrap();
        let link = transport.link();
        assert!(!link.level(Line::ResultTrigger));
        assert!(link.level(Line::ResetN));
        assert!(link.level(Line::FrameSelectN));
        assert_eq!(link.units, 2 + 10 + 1);
    }
}

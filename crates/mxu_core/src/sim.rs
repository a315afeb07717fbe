//! Behavioral model of the matrix accelerator.
//!
//! The model is stepped one clock unit at a time through
//! [`AcceleratorLink::advance_clock`] and reacts to line edges as they are
//! driven. It follows the same contract the RTL does:
//!
//! * while frame-select is low, data-out is shifted in on every rising clock
//!   edge; the word is taken when frame-select rises after 32 bits,
//! * a header word starts an operand; the matching loaded flag rises
//!   `load_latency` units after its last word,
//! * multiply-start sampled high on a clock unit with both operands loaded
//!   starts the product; multiply-done rises after the compute latency,
//! * a rising result trigger with the product ready switches the link to
//!   transmit; each frame then shifts one product word out on data-in,
//!   changing bits on falling clock edges,
//! * reset low clears everything except the word log.

use crate::codec::{Tag, decode_header, float_to_word, word_to_float};
use crate::link::{AcceleratorLink, Line};
use crate::matrix::Matrix;
use crate::{OffloadError, Result};
use bitvec::prelude::*;
use log::{debug, trace, warn};
use std::collections::VecDeque;

const LINE_SLOTS: usize = 10;

fn slot(line: Line) -> usize {
    match line {
        Line::FrameSelectN => 0,
        Line::Clock => 1,
        Line::DataOut => 2,
        Line::DataIn => 3,
        Line::MultiplyStart => 4,
        Line::ResultTrigger => 5,
        Line::ResetN => 6,
        Line::ALoaded => 7,
        Line::BLoaded => 8,
        Line::MultiplyDone => 9,
    }
}

#[derive(Debug, Clone)]
struct Operand {
    rows: usize,
    cols: usize,
    words: Vec<u32>,
}

impl Operand {
    fn to_matrix(&self) -> Result<Matrix> {
        Matrix::new(
            self.rows,
            self.cols,
            self.words.iter().map(|&w| word_to_float(w)).collect(),
        )
    }
}

#[derive(Debug)]
enum LoadState {
    AwaitHeader,
    Loading { tag: Tag, operand: Operand },
}

/// Cycle-stepped accelerator model implementing [`AcceleratorLink`].
pub struct SimAccelerator {
    levels: [bool; LINE_SLOTS],
    rx: BitArray<u32, Msb0>,
    rx_bits: u32,
    load: LoadState,
    a: Option<Operand>,
    b: Option<Operand>,
    pending: Vec<(Line, u64)>,
    computing: bool,
    product: Vec<u32>,
    trigger_latched: bool,
    transmitting: bool,
    tx: VecDeque<u32>,
    tx_word: BitArray<u32, Msb0>,
    tx_pos: u32,
    cycle: u64,
    received: Vec<u32>,
    load_latency: u64,
    macs_per_unit: u64,
    stuck: Option<Line>,
}

impl Default for SimAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimAccelerator {
    /// Accelerator in its post-reset state with every flag low.
    pub fn new() -> Self {
        let mut levels = [false; LINE_SLOTS];
        levels[slot(Line::FrameSelectN)] = true;
        levels[slot(Line::ResetN)] = true;
        Self {
            levels,
            rx: BitArray::ZERO,
            rx_bits: 0,
            load: LoadState::AwaitHeader,
            a: None,
            b: None,
            pending: Vec::new(),
            computing: false,
            product: Vec::new(),
            trigger_latched: false,
            transmitting: false,
            tx: VecDeque::new(),
            tx_word: BitArray::ZERO,
            tx_pos: 0,
            cycle: 0,
            received: Vec::new(),
            load_latency: 4,
            macs_per_unit: 16,
            stuck: None,
        }
    }

    /// Units between the last operand word and its loaded flag.
    pub fn with_load_latency(mut self, units: u64) -> Self {
        self.load_latency = units;
        self
    }

    /// Multiply-accumulates completed per clock unit.
    pub fn with_macs_per_unit(mut self, macs: u64) -> Self {
        self.macs_per_unit = macs.max(1);
        self
    }

    /// Never raises `flag`, modelling a hung accelerator.
    pub fn with_stuck_flag(mut self, flag: Line) -> Self {
        self.stuck = Some(flag);
        self
    }

    /// Clock units elapsed since construction.
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Every complete word shifted in, headers included, in arrival order.
    pub fn received_words(&self) -> &[u32] {
        &self.received
    }

    /// Current level of `line`, as the host would sample it.
    pub fn level(&self, line: Line) -> bool {
        self.levels[slot(line)]
    }

    fn set(&mut self, line: Line, level: bool) {
        self.levels[slot(line)] = level;
    }

    fn in_reset(&self) -> bool {
        !self.level(Line::ResetN)
    }

    fn clear_state(&mut self) {
        let received = std::mem::take(&mut self.received);
        let (load_latency, macs_per_unit, stuck, cycle) =
            (self.load_latency, self.macs_per_unit, self.stuck, self.cycle);
        let levels = self.levels;
        *self = Self::new();
        self.received = received;
        self.load_latency = load_latency;
        self.macs_per_unit = macs_per_unit;
        self.stuck = stuck;
        self.cycle = cycle;
        // Host-driven levels are owned by the host; only outputs clear.
        for line in Line::ALL.into_iter().filter(|l| l.is_host_driven()) {
            self.levels[slot(line)] = levels[slot(line)];
        }
    }

    fn schedule(&mut self, flag: Line, after: u64) {
        self.pending.push((flag, self.cycle + after));
    }

    fn on_word(&mut self, word: u32) {
        trace!("sim: word {word:#010x}");
        self.received.push(word);

        match std::mem::replace(&mut self.load, LoadState::AwaitHeader) {
            LoadState::AwaitHeader => match decode_header(word) {
                Ok(header) if header.rows > 0 && header.cols > 0 => {
                    debug!("sim: header {:?} {}x{}", header.tag, header.rows, header.cols);
                    match header.tag {
                        Tag::OperandA => {
                            self.a = None;
                            self.b = None;
                            self.set(Line::ALoaded, false);
                            self.set(Line::BLoaded, false);
                            self.pending.clear();
                        }
                        Tag::OperandB => {
                            self.b = None;
                            self.set(Line::BLoaded, false);
                            self.pending.retain(|&(flag, _)| flag == Line::ALoaded);
                        }
                    }
                    self.set(Line::MultiplyDone, false);
                    self.computing = false;
                    let operand = Operand {
                        rows: header.rows as usize,
                        cols: header.cols as usize,
                        words: Vec::with_capacity(header.rows as usize * header.cols as usize),
                    };
                    self.load = LoadState::Loading {
                        tag: header.tag,
                        operand,
                    };
                }
                Ok(header) => warn!("sim: ignoring empty {:?} header", header.tag),
                Err(unknown) => warn!("sim: ignoring header with unknown tag {:#04x}", unknown.tag),
            },
            LoadState::Loading { tag, mut operand } => {
                operand.words.push(word);
                if operand.words.len() < operand.rows * operand.cols {
                    self.load = LoadState::Loading { tag, operand };
                    return;
                }
                let flag = match tag {
                    Tag::OperandA => {
                        self.a = Some(operand);
                        Line::ALoaded
                    }
                    Tag::OperandB => {
                        self.b = Some(operand);
                        Line::BLoaded
                    }
                };
                self.schedule(flag, self.load_latency);
            }
        }
    }

    fn start_multiply(&mut self) {
        let (Some(a), Some(b)) = (&self.a, &self.b) else {
            return;
        };
        let product = a
            .to_matrix()
            .and_then(|a_mat| b.to_matrix().and_then(|b_mat| a_mat.matmul_reference(&b_mat)));
        match product {
            Ok(c) => {
                let macs = (a.rows * a.cols * b.cols) as u64;
                let latency = macs.div_ceil(self.macs_per_unit).max(1);
                debug!("sim: multiply started, {macs} MACs over {latency} units");
                self.product = c.values().iter().map(|&v| float_to_word(v)).collect();
                self.computing = true;
                self.schedule(Line::MultiplyDone, latency);
            }
            Err(e) => warn!("sim: multiply rejected: {e}"),
        }
    }

    fn tick(&mut self) {
        self.cycle += 1;
        if self.in_reset() {
            return;
        }

        let now = self.cycle;
        let mut due = Vec::new();
        self.pending.retain(|&(flag, at)| {
            if at <= now {
                due.push(flag);
                false
            } else {
                true
            }
        });
        for flag in due {
            if flag == Line::MultiplyDone {
                self.computing = false;
            }
            if self.stuck == Some(flag) {
                trace!("sim: holding {} low", flag.name());
                continue;
            }
            self.set(flag, true);
        }

        let loaded = self.level(Line::ALoaded) && self.level(Line::BLoaded);
        if self.level(Line::MultiplyStart)
            && loaded
            && !self.computing
            && !self.level(Line::MultiplyDone)
        {
            self.start_multiply();
        }

        if self.level(Line::ResultTrigger) {
            if !self.trigger_latched {
                self.trigger_latched = true;
                if self.level(Line::MultiplyDone) {
                    debug!("sim: transmitting {} result words", self.product.len());
                    self.transmitting = true;
                    self.tx = self.product.iter().copied().collect();
                }
            }
        } else {
            self.trigger_latched = false;
        }
    }

    fn on_frame_open(&mut self) {
        self.rx_bits = 0;
        self.rx = BitArray::ZERO;
        self.tx_pos = 0;
        if self.transmitting {
            self.tx_word = BitArray::new(self.tx.pop_front().unwrap_or(0));
            let msb = self.tx_word[0];
            self.set(Line::DataIn, msb);
        } else {
            self.set(Line::DataIn, false);
        }
    }

    fn on_frame_close(&mut self) {
        if self.transmitting {
            if self.tx_pos == 32 && self.tx.is_empty() {
                self.transmitting = false;
            }
            self.set(Line::DataIn, false);
            return;
        }
        match self.rx_bits {
            32 => self.on_word(self.rx.data),
            0 => {}
            n => warn!("sim: dropping partial frame of {n} bits"),
        }
    }

    fn on_clock_edge(&mut self, rising: bool) {
        if self.level(Line::FrameSelectN) {
            return;
        }
        if rising {
            if self.transmitting {
                self.tx_pos = (self.tx_pos + 1).min(32);
            } else if self.rx_bits < 32 {
                let bit = self.level(Line::DataOut);
                self.rx.set(self.rx_bits as usize, bit);
                self.rx_bits += 1;
            }
        } else if self.transmitting && (1..32).contains(&self.tx_pos) {
            let bit = self.tx_word[self.tx_pos as usize];
            self.set(Line::DataIn, bit);
        }
    }
}

impl AcceleratorLink for SimAccelerator {
    fn drive_line(&mut self, line: Line, level: bool) -> Result<()> {
        if !line.is_host_driven() {
            return Err(OffloadError::link(format!(
                "{} is driven by the accelerator",
                line.name()
            )));
        }
        let prev = self.level(line);
        self.set(line, level);
        if prev == level {
            return Ok(());
        }

        if line == Line::ResetN {
            if !level {
                debug!("sim: reset asserted");
                self.clear_state();
            }
            return Ok(());
        }
        if self.in_reset() {
            return Ok(());
        }

        match line {
            Line::FrameSelectN if !level => self.on_frame_open(),
            Line::FrameSelectN => self.on_frame_close(),
            Line::Clock => self.on_clock_edge(level),
            _ => {}
        }
        Ok(())
    }

    fn sample_line(&mut self, line: Line) -> Result<bool> {
        Ok(self.level(line))
    }

    fn advance_clock(&mut self, units: u32) -> Result<()> {
        for _ in 0..units {
            self.tick();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_header;
    use crate::serial::SerialTransport;

    #[test]
    fn loads_operand_and_raises_flag_after_latency() {
        let mut t = SerialTransport::new(SimAccelerator::new().with_load_latency(3));
        t.send_word(encode_header(Tag::OperandA, 1, 2).unwrap()).unwrap();
        t.send_word(float_to_word(1.5)).unwrap();
        t.send_word(float_to_word(-2.0)).unwrap();

        let sim = t.link_mut();
        assert_eq!(
            sim.received_words(),
            &[0x0A00_1002, float_to_word(1.5), float_to_word(-2.0)]
        );
        assert!(!sim.level(Line::ALoaded));
        sim.advance_clock(2).unwrap();
        assert!(!sim.level(Line::ALoaded));
        sim.advance_clock(1).unwrap();
        assert!(sim.level(Line::ALoaded));
    }

    #[test]
    fn unknown_header_is_ignored() {
        let mut t = SerialTransport::new(SimAccelerator::new());
        t.send_word(0xAA00_1001).unwrap();
        t.send_word(float_to_word(1.0)).unwrap();
        t.link_mut().advance_clock(20).unwrap();
        assert!(!t.link().level(Line::ALoaded));
        assert_eq!(t.link().received_words().len(), 2);
    }

    #[test]
    fn refuses_to_drive_status_lines() {
        let mut sim = SimAccelerator::new();
        assert!(matches!(
            sim.drive_line(Line::MultiplyDone, true),
            Err(OffloadError::Link { .. })
        ));
    }

    #[test]
    fn reset_clears_flags_but_keeps_log() {
        let mut t = SerialTransport::new(SimAccelerator::new().with_load_latency(0));
        t.send_word(encode_header(Tag::OperandA, 1, 1).unwrap()).unwrap();
        t.send_word(float_to_word(1.0)).unwrap();
        t.link_mut().advance_clock(1).unwrap();
        assert!(t.link().level(Line::ALoaded));

        t.reset(4).unwrap();
        assert!(!t.link().level(Line::ALoaded));
        assert_eq!(t.link().received_words().len(), 2);
    }

    #[test]
    fn partial_frame_is_dropped() {
        let mut sim = SimAccelerator::new();
        sim.drive_line(Line::FrameSelectN, false).unwrap();
        for _ in 0..5 {
            sim.drive_line(Line::Clock, true).unwrap();
            sim.drive_line(Line::Clock, false).unwrap();
        }
        sim.drive_line(Line::FrameSelectN, true).unwrap();
        assert!(sim.received_words().is_empty());
    }
}

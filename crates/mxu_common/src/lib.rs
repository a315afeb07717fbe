//! Common definitions and constants shared across the matrix offload system.
//!
//! This crate provides the wire-level constants of the offload protocol
//! (operand tags and header field layout), the enumerated set of accelerator
//! lines together with their register addresses on the simulation bridge,
//! and the default timing budgets used by the host driver. It is shared by
//! the protocol core, the artifact I/O crate and the host tools.

#![no_std]

// Header and data word layout for the bit-serial protocol.
//
// Every transfer on the serial link is one 32-bit word. A header word
// announces the operand that follows and its shape; data words carry one
// binary32 matrix element each, row-major.
pub mod wire {
    /// Number of bits shifted per word transfer.
    pub const WORD_BITS: u32 = 32;

    /// Tag announcing that operand A (left-hand matrix) follows.
    pub const TAG_OPERAND_A: u8 = 0x0A;

    /// Tag announcing that operand B (right-hand matrix) follows.
    pub const TAG_OPERAND_B: u8 = 0x0B;

    /// Bit position of the tag field inside a header word.
    pub const TAG_SHIFT: u32 = 24;

    /// Bit position of the row-count field inside a header word.
    ///
    /// The column count occupies the low 12 bits, so rows sit directly
    /// above it and below the tag byte.
    pub const ROWS_SHIFT: u32 = 12;

    /// Width in bits of the row and column fields.
    pub const DIM_BITS: u32 = 12;

    /// Largest row or column count a header can carry (4095).
    pub const DIM_MAX: u32 = (1 << DIM_BITS) - 1;
}

// Accelerator line definitions.
//
// The accelerator is driven through a fixed set of named lines. Lines driven
// by the host carry the serial link and the control pulses; lines driven by
// the accelerator carry serial data back and the level status flags.
pub mod signals {
    /// Base address of the line register window on the simulation bridge.
    ///
    /// Each line is exposed as one 32-bit register at `BRIDGE_BASE + index`.
    /// Writing a non-zero value drives the line high, reading returns its
    /// current level in bit 0.
    pub const BRIDGE_BASE: u32 = 0x4000_0000;

    /// Logical lines between the host and the accelerator.
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Line {
        /// Frame select, active low while a word is in flight.
        FrameSelectN = 0x00,
        /// Serial clock.
        Clock = 0x01,
        /// Serial data from host to accelerator.
        DataOut = 0x02,
        /// Serial data from accelerator to host.
        DataIn = 0x03,
        /// Starts the multiply when sampled high on a clock unit.
        MultiplyStart = 0x04,
        /// Pulsed high to make the accelerator transmit the product.
        ResultTrigger = 0x05,
        /// Active-low accelerator reset.
        ResetN = 0x06,
        /// Level flag: operand A fully loaded.
        ALoaded = 0x10,
        /// Level flag: operand B fully loaded.
        BLoaded = 0x11,
        /// Level flag: product ready for transmission.
        MultiplyDone = 0x12,
    }

    impl Line {
        /// Every line, in register order.
        pub const ALL: [Line; 10] = [
            Line::FrameSelectN,
            Line::Clock,
            Line::DataOut,
            Line::DataIn,
            Line::MultiplyStart,
            Line::ResultTrigger,
            Line::ResetN,
            Line::ALoaded,
            Line::BLoaded,
            Line::MultiplyDone,
        ];

        /// Inverse of [`Line::bridge_addr`].
        pub fn from_bridge_addr(addr: u32) -> Option<Line> {
            Line::ALL.into_iter().find(|line| line.bridge_addr() == addr)
        }

        /// Returns true for lines the host drives; false for lines the
        /// accelerator drives and the host only samples.
        pub const fn is_host_driven(self) -> bool {
            !matches!(
                self,
                Line::DataIn | Line::ALoaded | Line::BLoaded | Line::MultiplyDone
            )
        }

        /// Register address of this line on the simulation bridge.
        pub const fn bridge_addr(self) -> u32 {
            BRIDGE_BASE + self as u32
        }

        /// Human-readable signal name, as used in logs and errors.
        pub const fn name(self) -> &'static str {
            match self {
                Line::FrameSelectN => "frame-select",
                Line::Clock => "clock",
                Line::DataOut => "data-out",
                Line::DataIn => "data-in",
                Line::MultiplyStart => "multiply-start",
                Line::ResultTrigger => "result-transmit-trigger",
                Line::ResetN => "reset",
                Line::ALoaded => "A-loaded",
                Line::BLoaded => "B-loaded",
                Line::MultiplyDone => "multiply-done",
            }
        }
    }
}

// Default timing budgets, expressed in clock units.
//
// One clock unit is the hold time of a single clock phase on the serial
// link. All waits in the driver are bounded by these values unless the
// caller overrides them.
pub mod timing {
    /// Nominal duration of one clock unit on the reference simulation, in ns.
    pub const CLOCK_UNIT_NS: u64 = 10;

    /// Units multiply-start is held high.
    pub const START_PULSE_UNITS: u32 = 1;

    /// Units the result-transmit trigger is held high.
    pub const RESULT_PULSE_UNITS: u32 = 2;

    /// Units of margin after the last bit before frame-select is released.
    pub const TRAILING_UNITS: u32 = 1;

    /// Units the reset line is held low.
    pub const RESET_HOLD_UNITS: u32 = 10;

    /// Poll budget for each handshake flag.
    pub const DEFAULT_FLAG_BUDGET: u32 = 200_000;

    /// Poll interval for the batch result artifact, in ms.
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

    /// Maximum wait for the batch result artifact, in ms.
    pub const DEFAULT_MAX_WAIT_MS: u64 = 30_000;

    /// Maximum run time of the batch external step, in ms.
    pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 300_000;
}

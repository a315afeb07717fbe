use crate::link::{AcceleratorLink, Line};
use crate::{OffloadError, Result, Waited};
use core::fmt;
use log::{debug, warn};

/// Level flags the accelerator raises when a protocol phase completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFlag {
    ALoaded,
    BLoaded,
    MultiplyDone,
}

impl StatusFlag {
    /// Line carrying this flag.
    pub fn line(self) -> Line {
        match self {
            StatusFlag::ALoaded => Line::ALoaded,
            StatusFlag::BLoaded => Line::BLoaded,
            StatusFlag::MultiplyDone => Line::MultiplyDone,
        }
    }
}

impl fmt::Display for StatusFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.line().name())
    }
}

/// Clock units polled before a flag was observed high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Elapsed(pub u32);

/// Polls accelerator status flags at clock granularity.
///
/// Each iteration advances the clock by one unit and then samples the flag,
/// so a flag that rises during unit `n` is reported as `Elapsed(n)`.
pub struct HandshakeMonitor<'a, L: AcceleratorLink + ?Sized> {
    link: &'a mut L,
}

impl<'a, L: AcceleratorLink + ?Sized> HandshakeMonitor<'a, L> {
    /// Monitor borrowing `link` for the duration of the wait.
    pub fn new(link: &'a mut L) -> Self {
        Self { link }
    }

    /// Waits for `flag` for at most `max_iterations` clock units.
    ///
    /// Returns [`OffloadError::Timeout`] after exactly `max_iterations`
    /// iterations without observing the flag high. A budget of zero fails
    /// immediately without touching the clock.
    pub fn await_flag(&mut self, flag: StatusFlag, max_iterations: u32) -> Result<Elapsed> {
        let line = flag.line();
        for iteration in 1..=max_iterations {
            self.link.advance_clock(1)?;
            if self.link.sample_line(line)? {
                debug!("{flag} observed after {iteration} clock units");
                return Ok(Elapsed(iteration));
            }
        }
        warn!("{flag} not observed within {max_iterations} clock units");
        Err(OffloadError::timeout(
            flag.to_string(),
            Waited::Iterations(max_iterations),
        ))
    }
}

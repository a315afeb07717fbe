use crate::Result;
pub use mxu_common::signals::Line;

/// The capability set an accelerator exposes to the host.
///
/// Lines are an enumerated set; there is no free-form attribute access. All
/// calls are synchronous. Implementations that talk to a remote simulation
/// report transport failures as [`crate::OffloadError::Link`]; the protocol
/// itself has no error signalling on the wire.
pub trait AcceleratorLink {
    /// Sets a host-driven line to `level` (true = high).
    fn drive_line(&mut self, line: Line, level: bool) -> Result<()>;

    /// Reads the current level of any line.
    fn sample_line(&mut self, line: Line) -> Result<bool>;

    /// Advances the accelerator clock by `units` clock units.
    fn advance_clock(&mut self, units: u32) -> Result<()>;
}

impl<L: AcceleratorLink + ?Sized> AcceleratorLink for &mut L {
    fn drive_line(&mut self, line: Line, level: bool) -> Result<()> {
        (**self).drive_line(line, level)
    }

    fn sample_line(&mut self, line: Line) -> Result<bool> {
        (**self).sample_line(line)
    }

    fn advance_clock(&mut self, units: u32) -> Result<()> {
        (**self).advance_clock(units)
    }
}

impl<L: AcceleratorLink + ?Sized> AcceleratorLink for Box<L> {
    fn drive_line(&mut self, line: Line, level: bool) -> Result<()> {
        (**self).drive_line(line, level)
    }

    fn sample_line(&mut self, line: Line) -> Result<bool> {
        (**self).sample_line(line)
    }

    fn advance_clock(&mut self, units: u32) -> Result<()> {
        (**self).advance_clock(units)
    }
}

//! Hardware-in-the-loop link to an RTL simulation of the accelerator.
//!
//! The simulation exposes each accelerator line as a 32-bit register behind
//! a small TCP bridge. This module speaks that bridge protocol and presents
//! it as an [`AcceleratorLink`], so the serial transport drives the RTL
//! exactly as it drives the behavioral model.

use log::{debug, info};
use mxu_common::signals::Line;
use mxu_core::{AcceleratorLink, OffloadError};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Command opcode for advancing the simulation clock.
///
/// Followed by a little-endian `u32` unit count. The bridge answers with a
/// 4-byte acknowledgement once the clock has advanced.
pub const CMD_STEP: u8 = 0x01;

/// Command opcode for writing a line register.
///
/// Followed by the little-endian register address and value. The bridge
/// answers with a 4-byte acknowledgement.
pub const CMD_WRITE: u8 = 0x02;

/// Command opcode for reading a line register.
///
/// Followed by the little-endian register address. The bridge answers with
/// the little-endian register value.
pub const CMD_READ: u8 = 0x03;

/// TCP connection to the simulation bridge.
///
/// Every operation is synchronous and blocks until the bridge responds or
/// the I/O timeout expires. A timed-out or dropped connection surfaces as
/// [`OffloadError::Link`]; the bridge state is then unknown.
pub struct BridgeLink {
    stream: TcpStream,
}

impl BridgeLink {
    /// Connects to the bridge at `addr`.
    ///
    /// # Arguments
    ///
    /// * `addr` - Bridge address in "host:port" form (e.g. "127.0.0.1:8000")
    /// * `io_timeout` - Upper bound on any single bridge round trip
    ///
    /// # Returns
    ///
    /// The connected link, or an I/O error if the connection or socket
    /// configuration fails.
    pub fn connect<A: ToSocketAddrs>(addr: A, io_timeout: Duration) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(io_timeout))?;
        stream.set_write_timeout(Some(io_timeout))?;
        info!("connected to accelerator bridge at {}", stream.peer_addr()?);
        Ok(Self { stream })
    }

    /// Advances the simulation by `units` clock units.
    pub fn step(&mut self, units: u32) -> io::Result<()> {
        let mut frame = [0u8; 5];
        frame[0] = CMD_STEP;
        frame[1..].copy_from_slice(&units.to_le_bytes());
        self.stream.write_all(&frame)?;
        self.read_word().map(|_| ())
    }

    /// Writes `data` to the register at `addr`.
    pub fn write(&mut self, addr: u32, data: u32) -> io::Result<()> {
        let mut frame = [0u8; 9];
        frame[0] = CMD_WRITE;
        frame[1..5].copy_from_slice(&addr.to_le_bytes());
        frame[5..].copy_from_slice(&data.to_le_bytes());
        self.stream.write_all(&frame)?;
        self.read_word().map(|_| ())
    }

    /// Reads the register at `addr`.
    pub fn read(&mut self, addr: u32) -> io::Result<u32> {
        let mut frame = [0u8; 5];
        frame[0] = CMD_READ;
        frame[1..].copy_from_slice(&addr.to_le_bytes());
        self.stream.write_all(&frame)?;
        self.read_word()
    }

    fn read_word(&mut self) -> io::Result<u32> {
        let mut word = [0u8; 4];
        self.stream.read_exact(&mut word)?;
        Ok(u32::from_le_bytes(word))
    }
}

fn bridge_error(what: &str, line: Option<Line>, e: io::Error) -> OffloadError {
    match line {
        Some(line) => OffloadError::link(format!("bridge {what} of {} failed: {e}", line.name())),
        None => OffloadError::link(format!("bridge {what} failed: {e}")),
    }
}

impl AcceleratorLink for BridgeLink {
    fn drive_line(&mut self, line: Line, level: bool) -> mxu_core::Result<()> {
        debug!("drive {} = {}", line.name(), level as u8);
        self.write(line.bridge_addr(), level as u32)
            .map_err(|e| bridge_error("write", Some(line), e))
    }

    fn sample_line(&mut self, line: Line) -> mxu_core::Result<bool> {
        self.read(line.bridge_addr())
            .map(|value| value & 1 == 1)
            .map_err(|e| bridge_error("read", Some(line), e))
    }

    fn advance_clock(&mut self, units: u32) -> mxu_core::Result<()> {
        self.step(units).map_err(|e| bridge_error("step", None, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mxu_core::sim::SimAccelerator;
    use mxu_core::{Matrix, OffloadDriver, SerialTransport};
    use std::net::TcpListener;
    use std::thread;

    /// Serves the bridge protocol for one connection on top of a
    /// behavioral model, the way the RTL testbench does.
    fn serve_one(listener: TcpListener) {
        let (mut stream, _) = listener.accept().unwrap();
        let mut sim = SimAccelerator::new();
        let mut opcode = [0u8; 1];
        while stream.read_exact(&mut opcode).is_ok() {
            let mut word = [0u8; 4];
            stream.read_exact(&mut word).unwrap();
            let arg = u32::from_le_bytes(word);
            let reply = match opcode[0] {
                CMD_STEP => {
                    sim.advance_clock(arg).unwrap();
                    0
                }
                CMD_WRITE => {
                    stream.read_exact(&mut word).unwrap();
                    let line = Line::from_bridge_addr(arg).unwrap();
                    sim.drive_line(line, u32::from_le_bytes(word) != 0).unwrap();
                    0
                }
                CMD_READ => {
                    let line = Line::from_bridge_addr(arg).unwrap();
                    sim.sample_line(line).unwrap() as u32
                }
                other => panic!("unknown opcode {other:#x}"),
            };
            stream.write_all(&reply.to_le_bytes()).unwrap();
        }
    }

    fn spawn_bridge() -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (addr, thread::spawn(move || serve_one(listener)))
    }

    #[test]
    fn multiply_over_bridge() {
        let (addr, server) = spawn_bridge();
        let link = BridgeLink::connect(addr.as_str(), Duration::from_secs(5)).unwrap();
        let mut transport = SerialTransport::new(link);

        let a = Matrix::from_rows(&[&[1.0, 2.0], &[3.0, 4.0]]).unwrap();
        let b = Matrix::from_rows(&[&[5.0, 6.0], &[7.0, 8.0]]).unwrap();
        let c = OffloadDriver::default()
            .multiply(&a, &b, &mut transport)
            .unwrap();
        assert_eq!(c.values(), &[19.0, 22.0, 43.0, 50.0]);

        drop(transport);
        server.join().unwrap();
    }

    #[test]
    fn dropped_bridge_is_link_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let mut link = BridgeLink::connect(addr, Duration::from_secs(5)).unwrap();
        server.join().unwrap();

        let err = link.sample_line(Line::ALoaded).unwrap_err();
        assert!(matches!(err, OffloadError::Link { .. }));
    }
}

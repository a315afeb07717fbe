//! Ready-made external step for the batch transport.
//!
//! Reads the request artifact, offloads it over the serial protocol and
//! publishes the result artifact atomically. Paths normally arrive through
//! the environment set by `CommandStep`.

use crate::hil::BridgeLink;
use anyhow::{Context, Result};
use log::info;
use mxu_core::sim::SimAccelerator;
use mxu_core::{AcceleratorLink, OffloadConfig, OffloadDriver, SerialTransport};
use mxu_io::loader::{load_request_file, write_result_file};
use std::path::Path;
use std::time::Duration;

/// Accelerator the serve step talks to.
pub enum Backend {
    /// In-process behavioral model.
    Simulated,
    /// RTL simulation behind the TCP bridge.
    Bridge { addr: String, io_timeout: Duration },
}

/// Serves one batch request end to end.
///
/// # Arguments
///
/// * `request_path` - Request artifact written by the host
/// * `result_path` - Where the product is written on success
/// * `backend` - Accelerator to offload to
/// * `config` - Bounds for the serial offload
///
/// # Returns
///
/// `Ok(())` once the result artifact is on disk. Nothing is written on
/// failure.
pub fn serve_request(
    request_path: &Path,
    result_path: &Path,
    backend: &Backend,
    config: OffloadConfig,
) -> Result<()> {
    let request = load_request_file(request_path)?;
    let (m, k, n) = request.dims();
    info!("serving {m}x{k} * {k}x{n} from {}", request_path.display());

    let driver = OffloadDriver::new(config);
    let c = match backend {
        Backend::Simulated => offload(&driver, &request, SimAccelerator::new())?,
        Backend::Bridge { addr, io_timeout } => {
            let link = BridgeLink::connect(addr.as_str(), *io_timeout)
                .with_context(|| format!("Failed to connect to bridge at {addr}"))?;
            offload(&driver, &request, link)?
        }
    };

    write_result_file(result_path, &c)?;
    info!("result written to {}", result_path.display());
    Ok(())
}

fn offload<L: AcceleratorLink>(
    driver: &OffloadDriver,
    request: &mxu_io::RequestArtifact,
    link: L,
) -> Result<mxu_core::Matrix> {
    let mut transport = SerialTransport::new(link);
    driver.reset(&mut transport).context("accelerator reset failed")?;
    let c = driver
        .multiply(&request.a, &request.b, &mut transport)
        .context("serial offload failed")?;
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mxu_core::Matrix;
    use mxu_io::RequestArtifact;
    use mxu_io::loader::write_request_file;
    use std::fs;

    #[test]
    fn serves_request_on_simulator() {
        let dir = tempfile::tempdir().unwrap();
        let request_path = dir.path().join("req.txt");
        let result_path = dir.path().join("res.txt");
        let a = Matrix::from_rows(&[&[1.0, 2.0], &[3.0, 4.0]]).unwrap();
        let b = Matrix::from_rows(&[&[5.0, 6.0], &[7.0, 8.0]]).unwrap();
        write_request_file(&request_path, &RequestArtifact::new(a, b)).unwrap();

        serve_request(
            &request_path,
            &result_path,
            &Backend::Simulated,
            OffloadConfig::default(),
        )
        .unwrap();

        assert_eq!(fs::read_to_string(&result_path).unwrap(), "C 19 22 43 50\n");
    }

    #[test]
    fn missing_request_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let result_path = dir.path().join("res.txt");

        let err = serve_request(
            &dir.path().join("absent.txt"),
            &result_path,
            &Backend::Simulated,
            OffloadConfig::default(),
        );

        assert!(err.is_err());
        assert!(!result_path.exists());
    }
}

use crate::config::OffloadConfig;
use crate::link::AcceleratorLink;
use crate::matrix::Matrix;
use crate::serial::SerialTransport;
use crate::{OffloadError, Result};
use log::{info, warn};
use std::time::Instant;

/// A way of getting `A * B` computed by the accelerator.
///
/// The driver only calls [`MatmulTransport::execute`] with operands that
/// already passed the shape check. Implementations must not retry
/// internally and must not keep request state between calls.
pub trait MatmulTransport {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Runs one full request/response cycle for compatible operands.
    fn execute(&mut self, a: &Matrix, b: &Matrix, config: &OffloadConfig) -> Result<Matrix>;
}

impl<T: MatmulTransport + ?Sized> MatmulTransport for &mut T {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn execute(&mut self, a: &Matrix, b: &Matrix, config: &OffloadConfig) -> Result<Matrix> {
        (**self).execute(a, b, config)
    }
}

impl<T: MatmulTransport + ?Sized> MatmulTransport for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn execute(&mut self, a: &Matrix, b: &Matrix, config: &OffloadConfig) -> Result<Matrix> {
        (**self).execute(a, b, config)
    }
}

/// Entry point for offloaded matrix multiplication.
///
/// Holds only configuration; every call to [`OffloadDriver::multiply`] is
/// independent. Callers sharing one accelerator between threads must wrap
/// the transport in a mutex: the protocol supports a single request in
/// flight.
#[derive(Debug, Clone, Default)]
pub struct OffloadDriver {
    config: OffloadConfig,
}

impl OffloadDriver {
    /// Driver applying `config` to every request.
    pub fn new(config: OffloadConfig) -> Self {
        Self { config }
    }

    /// Bounds applied to each request.
    pub fn config(&self) -> &OffloadConfig {
        &self.config
    }

    /// Computes `a * b` through `transport`.
    ///
    /// Fails with [`OffloadError::ShapeMismatch`] before any transport I/O
    /// when `a.cols() != b.rows()`. Transport failures are returned as-is.
    /// After any error the accelerator state is unknown and it must be
    /// reset before the next request.
    pub fn multiply<T: MatmulTransport + ?Sized>(
        &self,
        a: &Matrix,
        b: &Matrix,
        transport: &mut T,
    ) -> Result<Matrix> {
        if !a.is_compatible(b) {
            return Err(OffloadError::ShapeMismatch {
                a: a.shape(),
                b: b.shape(),
            });
        }

        info!(
            "offloading {}x{} * {}x{} via {}",
            a.rows(),
            a.cols(),
            b.rows(),
            b.cols(),
            transport.name()
        );
        let start = Instant::now();

        let product = transport.execute(a, b, &self.config).inspect_err(|e| {
            warn!("{} request failed: {e}", transport.name());
        })?;

        let expected = (a.rows(), b.cols());
        if product.shape() != expected {
            return Err(OffloadError::malformed(format!(
                "product shape {:?}, expected {:?}",
                product.shape(),
                expected
            )));
        }

        info!(
            "{} request complete in {:?}",
            transport.name(),
            start.elapsed()
        );
        Ok(product)
    }

    /// Resets the accelerator behind a serial transport using the
    /// configured reset hold.
    pub fn reset<L: AcceleratorLink>(&self, transport: &mut SerialTransport<L>) -> Result<()> {
        transport.reset(self.config.reset_hold_units)
    }
}

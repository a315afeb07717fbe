//! Request generator for offload runs and benchmarks.
//!
//! Produces operand pairs with elements drawn uniformly from `[-2, 2)`,
//! either in memory or written out as a request artifact for the `run`
//! and `serve` commands.

use anyhow::{Context, Result, bail};
use log::info;
use mxu_core::Matrix;
use mxu_io::RequestArtifact;
use mxu_io::loader::write_request_file;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Lower bound of generated elements.
const VALUE_MIN: f32 = -2.0;

/// Upper bound (exclusive) of generated elements.
const VALUE_MAX: f32 = 2.0;

/// Seeded generator when `seed` is given, entropy-seeded otherwise.
pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Draws a `rows x cols` matrix. Empty or overflowing shapes are rejected.
pub fn random_matrix<R: Rng>(rng: &mut R, rows: usize, cols: usize) -> Result<Matrix> {
    let Some(len) = rows.checked_mul(cols) else {
        bail!("{rows}x{cols} matrix is too large");
    };
    let values = (0..len)
        .map(|_| rng.gen_range(VALUE_MIN..VALUE_MAX))
        .collect();
    Matrix::new(rows, cols, values).context("invalid dimensions")
}

/// Draws an `m x k` by `k x n` operand pair.
pub fn random_request<R: Rng>(rng: &mut R, m: usize, k: usize, n: usize) -> Result<RequestArtifact> {
    let a = random_matrix(rng, m, k)?;
    let b = random_matrix(rng, k, n)?;
    Ok(RequestArtifact::new(a, b))
}

/// Writes a random request artifact to `path`.
///
/// # Arguments
///
/// * `path` - Output path for the request artifact
/// * `m`, `k`, `n` - Operand dimensions: A is `m x k`, B is `k x n`
/// * `seed` - Fixed RNG seed for reproducible requests; entropy if `None`
pub fn generate_request(path: &str, m: usize, k: usize, n: usize, seed: Option<u64>) -> Result<()> {
    let mut rng = rng_from_seed(seed);
    let request = random_request(&mut rng, m, k, n)?;
    write_request_file(path, &request)?;
    info!("wrote {m}x{k} * {k}x{n} request to {path}");
    Ok(())
}

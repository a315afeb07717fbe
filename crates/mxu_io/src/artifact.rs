use crate::parser;
use anyhow::{Context, anyhow, bail};
use mxu_core::{Matrix, OffloadError};
use std::fmt::Write as _;

/// Operands of one batch request, as written to the request artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestArtifact {
    pub a: Matrix,
    pub b: Matrix,
}

impl RequestArtifact {
    /// Request for `a * b`. Shapes are not checked here.
    pub fn new(a: Matrix, b: Matrix) -> Self {
        Self { a, b }
    }

    /// `(M, K, N)` as announced in the artifact.
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.a.rows(), self.a.cols(), self.b.cols())
    }

    /// Renders the five request records.
    ///
    /// Values use the shortest decimal that parses back to the same
    /// binary32, so operands survive the round trip bit for bit.
    pub fn render(&self) -> String {
        let (m, k, n) = self.dims();
        let mut out = format!("M {m}\nK {k}\nN {n}\n");
        push_record(&mut out, 'A', self.a.values());
        push_record(&mut out, 'B', self.b.values());
        out
    }

    /// Parses a request artifact and checks element counts against the
    /// announced dimensions.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let (_, raw) = parser::request(text)
            .map_err(|e| anyhow!("unparseable request artifact: {e}"))?;

        let Some(a_len) = raw.m.checked_mul(raw.k) else {
            bail!("A shape {}x{} overflows", raw.m, raw.k);
        };
        let Some(b_len) = raw.k.checked_mul(raw.n) else {
            bail!("B shape {}x{} overflows", raw.k, raw.n);
        };

        if raw.a.len() != a_len {
            bail!(
                "A has {} values, expected {}x{}",
                raw.a.len(),
                raw.m,
                raw.k
            );
        }
        if raw.b.len() != b_len {
            bail!(
                "B has {} values, expected {}x{}",
                raw.b.len(),
                raw.k,
                raw.n
            );
        }

        let a = Matrix::new(raw.m, raw.k, raw.a).context("invalid A operand")?;
        let b = Matrix::new(raw.k, raw.n, raw.b).context("invalid B operand")?;
        Ok(Self { a, b })
    }
}

/// Product record written by the external step.
pub struct ResultArtifact;

impl ResultArtifact {
    /// Renders `c` as a single `C` record, row-major.
    pub fn render(c: &Matrix) -> String {
        let mut out = String::new();
        push_record(&mut out, 'C', c.values());
        out
    }

    /// Parses the single `C` record and reshapes it to `rows x cols`.
    ///
    /// Any deviation (missing prefix, foreign tokens, wrong element count)
    /// is reported as [`OffloadError::MalformedResult`].
    pub fn parse(text: &str, rows: usize, cols: usize) -> mxu_core::Result<Matrix> {
        let (_, values) = parser::result(text)
            .map_err(|e| OffloadError::malformed(format!("unparseable C record: {e}")))?;

        if values.len() != rows * cols {
            return Err(OffloadError::malformed(format!(
                "C has {} values, expected {rows}x{cols}",
                values.len()
            )));
        }
        Matrix::new(rows, cols, values)
            .map_err(|e| OffloadError::malformed(format!("cannot shape C: {e}")))
    }
}

fn push_record(out: &mut String, prefix: char, values: &[f32]) {
    out.push(prefix);
    for v in values {
        // Writing to a String cannot fail.
        let _ = write!(out, " {v}");
    }
    out.push('\n');
}

use crate::artifact::{RequestArtifact, ResultArtifact};
use log::{debug, info, warn};
use mxu_core::{Matrix, MatmulTransport, OffloadConfig, OffloadError, Result, Waited};
use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Environment variable carrying the request artifact path to a
/// [`CommandStep`].
pub const REQUEST_PATH_ENV: &str = "MXU_REQUEST_PATH";
/// Environment variable carrying the result artifact path to a
/// [`CommandStep`].
pub const RESULT_PATH_ENV: &str = "MXU_RESULT_PATH";

static NEXT_REQUEST: AtomicUsize = AtomicUsize::new(0);

/// How often a running [`CommandStep`] child is checked for exit.
const STEP_POLL: Duration = Duration::from_millis(10);

/// Where the artifacts of one batch request live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    id: String,
    dir: PathBuf,
}

impl RequestContext {
    /// Creates a context for request `id` with artifacts under `dir`.
    ///
    /// # Arguments
    ///
    /// * `id` - Prefix of both artifact file names
    /// * `dir` - Directory shared with the external step
    pub fn new(id: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            dir: dir.into(),
        }
    }

    /// Context with an id unique across processes sharing `dir`.
    pub fn unique(dir: impl Into<PathBuf>) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = NEXT_REQUEST.fetch_add(1, Ordering::Relaxed);
        Self::new(format!("{}-{nanos:x}-{seq}", std::process::id()), dir)
    }

    /// Request id, as used in artifact names and logs.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Directory holding both artifacts.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the request artifact, `<dir>/<id>.request.txt`.
    pub fn request_path(&self) -> PathBuf {
        self.dir.join(format!("{}.request.txt", self.id))
    }

    /// Path of the result artifact, `<dir>/<id>.result.txt`.
    ///
    /// # Returns
    ///
    /// The file the external step must write the product to. It is
    /// deleted by [`BatchFileTransport::submit`] before every request.
    pub fn result_path(&self) -> PathBuf {
        self.dir.join(format!("{}.result.txt", self.id))
    }
}

/// The process that turns a request artifact into a result artifact.
///
/// Runs to completion before returning. It may write the result artifact
/// itself or leave that to something [`BatchFileTransport::await_result`]
/// will observe later.
pub trait ExternalStep {
    /// Serves the request described by `ctx`, giving up after `timeout`.
    fn run(&mut self, ctx: &RequestContext, timeout: Duration) -> Result<()>;
}

/// In-process steps cannot be interrupted and always run to completion.
impl<F> ExternalStep for F
where
    F: FnMut(&RequestContext) -> Result<()>,
{
    fn run(&mut self, ctx: &RequestContext, _timeout: Duration) -> Result<()> {
        self(ctx)
    }
}

/// External step backed by a child process.
///
/// The artifact paths are passed in [`REQUEST_PATH_ENV`] and
/// [`RESULT_PATH_ENV`]. A non-zero exit becomes
/// [`OffloadError::ExternalStepFailed`] carrying the trimmed stderr. A child
/// still running when the step timeout expires is killed and the step fails
/// with [`OffloadError::Timeout`].
#[derive(Debug, Clone)]
pub struct CommandStep {
    program: OsString,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
}

impl CommandStep {
    /// Step running `program` with no arguments in the current directory.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every argument of `args`, in order.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Runs the child in `dir` instead of the current directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

impl ExternalStep for CommandStep {
    fn run(&mut self, ctx: &RequestContext, timeout: Duration) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(REQUEST_PATH_ENV, ctx.request_path())
            .env(RESULT_PATH_ENV, ctx.result_path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        debug!("spawning {:?} for request {}", self.program, ctx.id());
        let start = Instant::now();
        let mut child = command.spawn()?;

        // Drained concurrently; a full pipe would stall the child.
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            let waited = start.elapsed();
            if waited >= timeout {
                warn!(
                    "external step for request {} still running after {:?}, killing it",
                    ctx.id(),
                    waited
                );
                if let Err(e) = child.kill() {
                    warn!("failed to kill external step: {e}");
                }
                child.wait()?;
                return Err(OffloadError::timeout(
                    "external step",
                    Waited::Millis(waited.as_millis() as u64),
                ));
            }
            thread::sleep(STEP_POLL.min(timeout - waited));
        };

        if !status.success() {
            let stderr = stderr
                .and_then(|reader| reader.join().ok())
                .unwrap_or_default();
            return Err(OffloadError::ExternalStepFailed {
                exit_code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Hands requests to an external step through files in `dir`.
///
/// Each request gets its own [`RequestContext`]. A result artifact left
/// over from anything earlier is deleted before the request artifact is
/// written, so a stale product is never returned.
pub struct BatchFileTransport<S> {
    dir: PathBuf,
    step: S,
}

impl<S: ExternalStep> BatchFileTransport<S> {
    /// Transport exchanging artifacts in `dir` and serving them with `step`.
    pub fn new(dir: impl Into<PathBuf>, step: S) -> Self {
        Self {
            dir: dir.into(),
            step,
        }
    }

    /// Artifact directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Mutable access to the external step.
    pub fn step_mut(&mut self) -> &mut S {
        &mut self.step
    }

    /// Clears the result artifact then writes the request artifact.
    pub fn submit(&self, ctx: &RequestContext, a: &Matrix, b: &Matrix) -> Result<()> {
        remove_if_present(&ctx.result_path())?;

        let request = RequestArtifact::new(a.clone(), b.clone());
        fs::write(ctx.request_path(), request.render())?;
        debug!(
            "request {} written to {}",
            ctx.id(),
            ctx.request_path().display()
        );
        Ok(())
    }

    /// Runs the external step and blocks until it returns or `timeout`
    /// expires.
    pub fn invoke_external_step(&mut self, ctx: &RequestContext, timeout: Duration) -> Result<()> {
        self.step.run(ctx, timeout)
    }

    /// Polls for the result artifact every `poll_interval` for at most
    /// `max_wait`, then parses it as a `rows x cols` product.
    pub fn await_result(
        &self,
        ctx: &RequestContext,
        rows: usize,
        cols: usize,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Result<Matrix> {
        let path = ctx.result_path();
        let start = Instant::now();

        loop {
            match fs::read(&path) {
                Ok(bytes) => {
                    let text = String::from_utf8(bytes)
                        .map_err(|_| OffloadError::malformed("result artifact is not UTF-8"))?;
                    return ResultArtifact::parse(&text, rows, cols);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            let waited = start.elapsed();
            if waited >= max_wait {
                return Err(OffloadError::timeout(
                    "result artifact",
                    Waited::Millis(waited.as_millis() as u64),
                ));
            }
            thread::sleep(poll_interval.min(max_wait - waited));
        }
    }

    /// Removes both artifacts of `ctx`. Missing files are not an error.
    pub fn cleanup(&self, ctx: &RequestContext) -> Result<()> {
        remove_if_present(&ctx.request_path())?;
        remove_if_present(&ctx.result_path())
    }

    fn run_request(
        &mut self,
        ctx: &RequestContext,
        a: &Matrix,
        b: &Matrix,
        config: &OffloadConfig,
    ) -> Result<Matrix> {
        self.submit(ctx, a, b)?;
        self.invoke_external_step(ctx, config.step_timeout)?;
        self.await_result(
            ctx,
            a.rows(),
            b.cols(),
            config.poll_interval,
            config.max_wait,
        )
    }
}

impl<S: ExternalStep> MatmulTransport for BatchFileTransport<S> {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn execute(&mut self, a: &Matrix, b: &Matrix, config: &OffloadConfig) -> Result<Matrix> {
        let ctx = RequestContext::unique(&self.dir);
        let outcome = self.run_request(&ctx, a, b, config);

        if config.keep_artifacts {
            info!("keeping artifacts of request {} in {}", ctx.id(), self.dir.display());
        } else if let Err(e) = self.cleanup(&ctx) {
            warn!("failed to remove artifacts of request {}: {e}", ctx.id());
        }
        outcome
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

use mxu_core::sim::SimAccelerator;
use mxu_core::{Matrix, OffloadConfig, OffloadDriver, OffloadError, SerialTransport, Waited};
use mxu_io::loader::write_result_file;
use mxu_io::{BatchFileTransport, RequestArtifact, RequestContext};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::time::{Duration, Instant};

fn quick_config() -> OffloadConfig {
    OffloadConfig::default()
        .with_poll_interval(Duration::from_millis(5))
        .with_max_wait(Duration::from_millis(200))
        .with_step_timeout(Duration::from_secs(10))
}

fn example_operands() -> (Matrix, Matrix) {
    let a = Matrix::from_rows(&[&[1.0, 2.0], &[3.0, 4.0]]).unwrap();
    let b = Matrix::from_rows(&[&[5.0, 6.0], &[7.0, 8.0]]).unwrap();
    (a, b)
}

/// External step that serves the request through the serial protocol
/// against a simulated accelerator.
fn serial_step(ctx: &RequestContext) -> mxu_core::Result<()> {
    let text = fs::read_to_string(ctx.request_path())?;
    let request =
        RequestArtifact::parse(&text).map_err(|e| OffloadError::malformed(e.to_string()))?;
    let mut transport = SerialTransport::new(SimAccelerator::new());
    let c = OffloadDriver::default().multiply(&request.a, &request.b, &mut transport)?;
    write_result_file(ctx.result_path(), &c).map_err(|e| OffloadError::malformed(e.to_string()))
}

#[test]
fn batch_round_trip_through_serial_step() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = example_operands();
    let mut transport = BatchFileTransport::new(dir.path(), serial_step);

    let c = OffloadDriver::new(quick_config())
        .multiply(&a, &b, &mut transport)
        .unwrap();

    assert_eq!(c.values(), &[19.0, 22.0, 43.0, 50.0]);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn random_batch_products_match_reference() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let driver = OffloadDriver::new(quick_config());
    let mut transport = BatchFileTransport::new(dir.path(), serial_step);

    for &(m, k, n) in &[(1, 1, 1), (4, 3, 5), (7, 7, 2)] {
        let a_vals = (0..m * k).map(|_| rng.gen_range(-2.0f32..2.0)).collect();
        let b_vals = (0..k * n).map(|_| rng.gen_range(-2.0f32..2.0)).collect();
        let a = Matrix::new(m, k, a_vals).unwrap();
        let b = Matrix::new(k, n, b_vals).unwrap();

        let c = driver.multiply(&a, &b, &mut transport).unwrap();
        assert!(c.approx_eq(&a.matmul_reference(&b).unwrap(), 1e-3));
    }
}

#[test]
fn keep_artifacts_leaves_files() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = example_operands();
    let mut transport = BatchFileTransport::new(dir.path(), serial_step);

    OffloadDriver::new(quick_config().with_keep_artifacts(true))
        .multiply(&a, &b, &mut transport)
        .unwrap();

    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names[0].ends_with(".request.txt"));
    assert!(names[1].ends_with(".result.txt"));
}

#[test]
fn silent_step_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = example_operands();
    let mut transport =
        BatchFileTransport::new(dir.path(), |_: &RequestContext| -> mxu_core::Result<()> { Ok(()) });

    let err = OffloadDriver::new(quick_config())
        .multiply(&a, &b, &mut transport)
        .unwrap_err();

    assert!(matches!(
        err,
        OffloadError::Timeout { waited: Waited::Millis(_), .. }
    ));
}

#[test]
fn stale_result_is_never_returned() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = example_operands();
    let ctx = RequestContext::new("reused", dir.path());
    fs::write(ctx.result_path(), "C 1 1 1 1\n").unwrap();

    let mut transport =
        BatchFileTransport::new(dir.path(), |_: &RequestContext| -> mxu_core::Result<()> { Ok(()) });
    transport.submit(&ctx, &a, &b).unwrap();
    transport
        .invoke_external_step(&ctx, Duration::from_secs(1))
        .unwrap();
    let err = transport
        .await_result(&ctx, 2, 2, Duration::from_millis(5), Duration::from_millis(50))
        .unwrap_err();

    assert!(matches!(err, OffloadError::Timeout { .. }));
}

#[test]
fn short_result_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = example_operands();
    let mut transport = BatchFileTransport::new(
        dir.path(),
        |ctx: &RequestContext| -> mxu_core::Result<()> {
            fs::write(ctx.result_path(), "C 19 22 43\n")?;
            Ok(())
        },
    );

    let err = OffloadDriver::new(quick_config())
        .multiply(&a, &b, &mut transport)
        .unwrap_err();
    assert!(matches!(err, OffloadError::MalformedResult { .. }));
}

#[test]
fn non_utf8_result_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = example_operands();
    let mut transport = BatchFileTransport::new(
        dir.path(),
        |ctx: &RequestContext| -> mxu_core::Result<()> {
            fs::write(ctx.result_path(), [0xFF, 0xFE, 0x20, 0x31])?;
            Ok(())
        },
    );

    let err = OffloadDriver::new(quick_config())
        .multiply(&a, &b, &mut transport)
        .unwrap_err();
    match err {
        OffloadError::MalformedResult { reason } => assert!(reason.contains("UTF-8")),
        other => panic!("unexpected error: {other}"),
    }
}

#[cfg(unix)]
mod command {
    use super::*;
    use mxu_io::CommandStep;

    #[test]
    fn failing_command_reports_exit_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = example_operands();
        let step = CommandStep::new("sh").args(["-c", "echo 'sim crashed' >&2; exit 3"]);
        let mut transport = BatchFileTransport::new(dir.path(), step);

        let err = OffloadDriver::new(quick_config())
            .multiply(&a, &b, &mut transport)
            .unwrap_err();

        match err {
            OffloadError::ExternalStepFailed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "sim crashed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn command_receives_artifact_paths() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = example_operands();
        let script = r#"test -s "$MXU_REQUEST_PATH" && printf 'C 19 22 43 50\n' > "$MXU_RESULT_PATH""#;
        let step = CommandStep::new("sh").arg("-c").arg(script);
        let mut transport = BatchFileTransport::new(dir.path(), step);

        let c = OffloadDriver::new(quick_config())
            .multiply(&a, &b, &mut transport)
            .unwrap();
        assert_eq!(c.values(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn hung_command_is_killed_at_step_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = example_operands();
        let step = CommandStep::new("sh").args(["-c", "sleep 5"]);
        let mut transport = BatchFileTransport::new(dir.path(), step);
        let config = quick_config().with_step_timeout(Duration::from_millis(100));

        let start = Instant::now();
        let err = OffloadDriver::new(config)
            .multiply(&a, &b, &mut transport)
            .unwrap_err();

        match err {
            OffloadError::Timeout { target, waited: Waited::Millis(ms) } => {
                assert_eq!(target, "external step");
                assert!(ms >= 100);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

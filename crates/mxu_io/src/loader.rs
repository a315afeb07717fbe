use crate::artifact::{RequestArtifact, ResultArtifact};
use anyhow::{Context, Result};
use mxu_core::Matrix;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Reads and validates a request artifact.
pub fn load_request_file<P: AsRef<Path>>(path: P) -> Result<RequestArtifact> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read request artifact {}", path.display()))?;
    RequestArtifact::parse(&text).with_context(|| format!("Bad request artifact {}", path.display()))
}

/// Writes a request artifact, replacing any previous content.
pub fn write_request_file<P: AsRef<Path>>(path: P, request: &RequestArtifact) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create request artifact {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(request.render().as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Writes a result artifact atomically.
///
/// The record goes to a sibling temporary file which is then renamed over
/// `path`, so a concurrent poller sees either nothing or the whole record.
pub fn write_result_file<P: AsRef<Path>>(path: P, c: &Matrix) -> Result<()> {
    let path = path.as_ref();
    let tmp = staging_path(path);
    {
        let file = File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(ResultArtifact::render(c).as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to publish result artifact {}", path.display()))?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("req.txt");
        let a = Matrix::from_rows(&[&[1.0, 2.0, 3.0]]).unwrap();
        let b = Matrix::from_rows(&[&[4.0], &[5.0], &[6.0]]).unwrap();
        let request = RequestArtifact::new(a, b);

        write_request_file(&path, &request).unwrap();
        assert_eq!(load_request_file(&path).unwrap(), request);
    }

    #[test]
    fn result_write_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("res.txt");
        let c = Matrix::from_rows(&[&[32.0]]).unwrap();

        write_result_file(&path, &c).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "C 32\n");
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn missing_request_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_request_file(dir.path().join("absent.txt")).unwrap_err();
        assert!(err.to_string().contains("absent.txt"));
    }
}

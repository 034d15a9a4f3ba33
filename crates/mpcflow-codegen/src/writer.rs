//! Writes an assembled program under `<code_dir>/<class>_code/<class>.<ext>`.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use mpcflow_core::error::{Error, Result};

pub fn job_dir(code_dir: impl AsRef<Path>, class_name: &str) -> PathBuf {
    code_dir.as_ref().join(format!("{class_name}_code"))
}

pub fn source_path(code_dir: impl AsRef<Path>, class_name: &str, ext: &str) -> PathBuf {
    job_dir(code_dir, class_name).join(format!("{class_name}.{ext}"))
}

/// Create the job directory if needed and write `code`, replacing any
/// previous program. Returns the file written.
pub fn write_job(
    code_dir: impl AsRef<Path>,
    class_name: &str,
    ext: &str,
    code: &str,
) -> Result<PathBuf> {
    let dir = job_dir(&code_dir, class_name);
    fs::create_dir_all(&dir).map_err(|e| Error::Io(format!("mkdir {}: {e}", dir.display())))?;
    let path = source_path(&code_dir, class_name, ext);
    let mut f =
        File::create(&path).map_err(|e| Error::Io(format!("create {}: {e}", path.display())))?;
    f.write_all(code.as_bytes())
        .map_err(|e| Error::Io(format!("write {}: {e}", path.display())))?;
    f.flush()
        .map_err(|e| Error::Io(format!("flush {}: {e}", path.display())))?;
    info!(path = %path.display(), bytes = code.len(), "wrote job");
    Ok(path)
}

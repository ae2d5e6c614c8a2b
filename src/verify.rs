//! Checks run by verification tasks against resolved directories.

use camino::Utf8PathBuf;

use crate::core::Directory;
use crate::error::WiringError;

/// Fails with [`WiringError::ValidationFailed`] unless `dir` contains the file
/// `name`.
pub fn expect_file(dir: &Directory, name: &str) -> Result<Utf8PathBuf, WiringError> {
    let path = dir.file(name);

    if !path.is_file() {
        return Err(WiringError::ValidationFailed {
            artifact: name.to_string(),
            location: dir.path().to_path_buf(),
        });
    }

    Ok(path)
}

/// Fails unless `dir` does *not* contain `name`.
pub fn expect_absent(dir: &Directory, name: &str) -> Result<(), WiringError> {
    if dir.file(name).exists() {
        return Err(WiringError::ValidationFailed {
            artifact: format!("absence of {name}"),
            location: dir.path().to_path_buf(),
        });
    }

    Ok(())
}

/// Picks the directory named `name` out of a flattened source list and checks
/// that it contains `file`.
pub fn expect_in_sources<'a>(
    sources: &'a [Directory],
    name: &str,
    file: &str,
) -> Result<&'a Directory, WiringError> {
    let dir = sources
        .iter()
        .find(|dir| dir.name() == Some(name))
        .ok_or_else(|| WiringError::ValidationFailed {
            artifact: name.to_string(),
            location: "<all sources>".into(),
        })?;

    expect_file(dir, file)?;
    Ok(dir)
}

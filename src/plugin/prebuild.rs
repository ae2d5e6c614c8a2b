use std::fs;

use camino::Utf8PathBuf;

use crate::core::Directory;
use crate::deferred::Deferred;
use crate::error::WiringError;
use crate::hooks::HookKind;
use crate::plugin::Plugin;
use crate::project::Project;
use crate::task::TaskContext;
use crate::verify::expect_file;

const OUTPUT_DIR: &str = "preBuildOutput";
const VERSION_FILE: &str = "gradle_version.txt";

/// Records the tool version before any variant is built.
///
/// A single `preBuildValidation` task is shared by all variants and attached
/// to each of them as pre-work, so it only runs when a variant is assembled.
///
/// `validate<Variant>` reads the output directory through a literal path, not
/// through the task's output. It therefore does not depend on the pre-build
/// task and only passes once an earlier assemble left the file on disk.
#[derive(Debug, Clone, Default)]
pub struct PreBuildPlugin {
    version: Option<String>,
}

impl PreBuildPlugin {
    /// Uses the tool version from the project settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
        }
    }
}

impl Plugin for PreBuildPlugin {
    fn name(&self) -> &'static str {
        "pre-build"
    }

    fn apply(&self, project: &mut Project) -> Result<(), WiringError> {
        let version = self
            .version
            .clone()
            .unwrap_or_else(|| project.settings().tool_version.clone());
        let path = project.settings().build_root.join(OUTPUT_DIR);
        let output = Deferred::<Directory>::new(OUTPUT_DIR);

        let task = project
            .tasks()
            .task("preBuildValidation")
            .description("Validates the tool version and records it")
            .input(Deferred::fixed("toolVersion", version))
            .output(&output)
            .run({
                let path = path.clone();
                move |ctx: &mut TaskContext<'_>, version: String| {
                    write_version(&path, &version)?;
                    ctx.fulfill(&output, Directory::new(path.clone()))?;
                    Ok(())
                }
            })?;

        project.on_variant(move |project, variant| {
            project.register_hook(variant, HookKind::PreWork, &task)?;

            let literal = Deferred::fixed(
                format!("{}.preBuildOutputPath", variant.name()),
                Directory::new(path.clone()),
            );

            project
                .tasks()
                .task(format!("validate{}", variant.capitalized()))
                .description("Checks the pre-build output of an earlier run")
                .input(literal)
                .run(|_: &mut TaskContext<'_>, dir: Directory| {
                    expect_file(&dir, VERSION_FILE)?;
                    Ok(())
                })?;

            Ok(())
        })
    }
}

fn write_version(path: &Utf8PathBuf, version: &str) -> anyhow::Result<()> {
    if version.is_empty() {
        anyhow::bail!("tool version must not be empty");
    }

    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    fs::create_dir_all(path)?;
    fs::write(path.join(VERSION_FILE), version)?;

    tracing::info!("recorded tool version {} in {}", version, path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_version() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let path = root.join(OUTPUT_DIR);

        assert!(write_version(&path, "").is_err());
        assert!(!path.exists());

        // Only the empty string is rejected.
        write_version(&path, " ").unwrap();
        assert_eq!(fs::read_to_string(path.join(VERSION_FILE)).unwrap(), " ");

        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("stale.txt"), "old").unwrap();

        write_version(&path, "8.9").unwrap();

        assert!(!path.join("stale.txt").exists());
        assert_eq!(fs::read_to_string(path.join(VERSION_FILE)).unwrap(), "8.9");
    }
}

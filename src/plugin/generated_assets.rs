use std::fs;

use crate::core::Directory;
use crate::deferred::Deferred;
use crate::error::WiringError;
use crate::plugin::Plugin;
use crate::project::Project;
use crate::task::TaskContext;
use crate::variant::{ArtifactKind, SourceKind, Variant};
use crate::verify::{expect_file, expect_in_sources};

const ASSET_FILE: &str = "custom_asset.txt";
const ASSET_TEXT: &str = "some real asset file";

/// Generates an asset file for every variant and feeds it into the variant's
/// asset sources.
///
/// Per variant this registers:
/// - `create<Variant>Asset`, writing `custom_asset.txt` into its output
///   directory, added as a generated layer of the `assets` sources;
/// - `verify<Variant>Asset`, checking that the file made it into both the
///   merged assets and the flattened source list.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratedAssetsPlugin;

impl Plugin for GeneratedAssetsPlugin {
    fn name(&self) -> &'static str {
        "generated-assets"
    }

    fn apply(&self, project: &mut Project) -> Result<(), WiringError> {
        project.on_variant(wire_variant)
    }
}

fn wire_variant(project: &mut Project, variant: &Variant) -> Result<(), WiringError> {
    let capitalized = variant.capitalized();
    let output = Deferred::<Directory>::new(format!("{}.generatedAssets", variant.name()));

    let create = project
        .tasks()
        .task(format!("create{capitalized}Asset"))
        .description("Writes a generated asset file")
        .output(&output)
        .run({
            let output = output.clone();
            move |ctx: &mut TaskContext<'_>| {
                let dir = ctx.output_dir();
                fs::create_dir_all(&dir)?;
                fs::write(dir.join(ASSET_FILE), ASSET_TEXT)?;
                ctx.fulfill(&output, Directory::new(dir))?;
                Ok(())
            }
        })?;

    project.add_generated_source(variant, SourceKind::Assets, &create, &output)?;

    let merged = variant.artifact(ArtifactKind::MergedAssets)?;
    let sources = variant.require_sources(SourceKind::Assets)?.flatten();
    let contributor = create.name().to_string();

    project
        .tasks()
        .task(format!("verify{capitalized}Asset"))
        .description("Checks the generated asset reached the merged assets")
        .input((merged, sources))
        .run(
            move |_: &mut TaskContext<'_>, (merged, sources): (Directory, Vec<Directory>)| {
                expect_file(&merged, ASSET_FILE)?;
                expect_in_sources(&sources, &contributor, ASSET_FILE)?;
                Ok(())
            },
        )?;

    Ok(())
}

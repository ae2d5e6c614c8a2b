//! Plugins wiring tasks into a project.
//!
//! A plugin is applied once per project. Everything variant specific is done
//! from a callback registered with [`Project::on_variant`], since variants are
//! only known once discovery starts.

mod generated_assets;
mod prebuild;

use crate::error::WiringError;
use crate::project::Project;

pub use generated_assets::GeneratedAssetsPlugin;
pub use prebuild::PreBuildPlugin;

pub trait Plugin {
    /// Short identifier, used in logs.
    fn name(&self) -> &'static str;

    fn apply(&self, project: &mut Project) -> Result<(), WiringError>;
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::config::Settings;
    use crate::hooks::HookKind;
    use crate::variant::{ArtifactKind, SourceKind, Variant};

    fn variants() -> Vec<Variant> {
        vec![
            Variant::named("debug"),
            Variant::named("release"),
            Variant::new("debug", ["free"]),
            Variant::new("release", ["free"]),
        ]
    }

    fn rooted() -> (tempfile::TempDir, Settings) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, Settings::rooted(root).with_tool_version("8.9"))
    }

    #[test]
    fn test_every_variant_gets_its_own_contributor_and_pre_work() {
        let mut project = Project::new(Settings::default());
        project
            .apply(GeneratedAssetsPlugin)
            .unwrap()
            .apply(PreBuildPlugin::new())
            .unwrap();
        project.discover_all(variants()).unwrap();

        let build = project.close().unwrap();
        let hooks = build.hooks();
        let mut contributors = vec![];

        for variant in build.variants() {
            let sources = hooks.hooks_for(variant.name(), HookKind::SourceContributor);
            assert_eq!(sources.len(), 1);
            assert_eq!(
                sources[0].name(),
                format!("create{}Asset", variant.capitalized())
            );
            contributors.push(sources[0].clone());

            let pre_work = hooks.hooks_for(variant.name(), HookKind::PreWork);
            assert_eq!(pre_work.len(), 1);
            assert_eq!(pre_work[0].name(), "preBuildValidation");

            // Static source sets plus the generated layer.
            assert_eq!(
                variant.sources(SourceKind::Assets).unwrap().layers(),
                2
            );
        }

        contributors.dedup();
        assert_eq!(contributors.len(), 4);
    }

    #[test]
    fn test_configuration_resolves_nothing() {
        let (_guard, settings) = rooted();
        let mut project = Project::new(settings.clone());
        project.apply(GeneratedAssetsPlugin).unwrap();
        project.discover(Variant::named("debug")).unwrap();

        let build = project.close().unwrap();
        let merged = build
            .variant("debug")
            .unwrap()
            .artifact(ArtifactKind::MergedAssets)
            .unwrap();

        assert!(!merged.is_available());
        assert!(!settings.build_root.exists());
    }

    #[test]
    fn test_verify_generated_asset() {
        let (_guard, settings) = rooted();
        let mut project = Project::new(settings);
        project.apply(GeneratedAssetsPlugin).unwrap();
        project.discover(Variant::named("debug")).unwrap();

        let mut build = project.close().unwrap();
        let diagnostics = build.run(&["verifyDebugAsset"]).unwrap();

        assert_eq!(
            diagnostics.names(),
            ["createDebugAsset", "mergeDebugAssets", "verifyDebugAsset"]
        );

        let merged = build
            .variant("debug")
            .unwrap()
            .artifact(ArtifactKind::MergedAssets)
            .unwrap();
        let merged = build.resolve(&merged).unwrap();

        assert_eq!(
            std::fs::read_to_string(merged.file("custom_asset.txt")).unwrap(),
            "some real asset file"
        );
        assert!(matches!(
            crate::verify::expect_absent(&merged, "custom_asset.txt"),
            Err(WiringError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn test_generated_layer_after_static_layers() {
        let (_guard, settings) = rooted();
        let mut project = Project::new(settings.clone());
        project.apply(GeneratedAssetsPlugin).unwrap();
        project.discover(Variant::new("release", ["free"])).unwrap();

        let mut build = project.close().unwrap();
        let all = build
            .variant("freeRelease")
            .unwrap()
            .sources(SourceKind::Assets)
            .unwrap()
            .flatten();
        let dirs = build.resolve(&all).unwrap();

        let names: Vec<_> = dirs.iter().map(|dir| dir.path().to_owned()).collect();
        assert_eq!(
            names,
            [
                settings.source_root.join("main/assets"),
                settings.source_root.join("free/assets"),
                settings.source_root.join("release/assets"),
                settings.source_root.join("freeRelease/assets"),
                settings.intermediates().join("createFreeReleaseAsset"),
            ]
        );
        assert!(build.has_run("createFreeReleaseAsset"));
        assert!(!build.has_run("mergeFreeReleaseAssets"));
    }

    #[test]
    fn test_empty_version_writes_nothing() {
        let (_guard, settings) = rooted();
        let mut project = Project::new(settings.clone());
        project
            .apply(GeneratedAssetsPlugin)
            .unwrap()
            .apply(PreBuildPlugin::with_version(""))
            .unwrap();
        project.discover(Variant::named("debug")).unwrap();

        let mut build = project.close().unwrap();
        let err = build.assemble("debug").unwrap_err();

        assert!(matches!(&err, WiringError::Task { task, .. } if task == "preBuildValidation"));
        assert!(!settings.build_root.join("preBuildOutput").exists());
        assert!(!build.has_run("mergeDebugAssets"));
    }

    #[test]
    fn test_pre_work_is_not_a_dependency() {
        let (_guard, settings) = rooted();
        let mut project = Project::new(settings);
        project
            .apply(GeneratedAssetsPlugin)
            .unwrap()
            .apply(PreBuildPlugin::new())
            .unwrap();
        project.discover(Variant::named("debug")).unwrap();

        let mut build = project.close().unwrap();
        build.run(&["verifyDebugAsset"]).unwrap();

        assert!(!build.has_run("preBuildValidation"));
    }

    #[test]
    fn test_validate_relies_on_an_earlier_invocation() {
        let (_guard, settings) = rooted();

        let configure = || {
            let mut project = Project::new(settings.clone());
            project.apply(PreBuildPlugin::new()).unwrap();
            project.discover(Variant::named("debug")).unwrap();
            project.close().unwrap()
        };

        // Nothing ran before, and asking for validation does not schedule the
        // pre-build task.
        let mut build = configure();
        let err = build.run(&["validateDebug"]).unwrap_err();
        assert!(matches!(err.root(), WiringError::ValidationFailed { .. }));
        assert!(!build.has_run("preBuildValidation"));

        let mut build = configure();
        let diagnostics = build.assemble("debug").unwrap();
        assert_eq!(diagnostics.names()[0], "preBuildValidation");
        assert_eq!(
            std::fs::read_to_string(settings.build_root.join("preBuildOutput/gradle_version.txt"))
                .unwrap(),
            "8.9"
        );

        let mut build = configure();
        build.run(&["validateDebug"]).unwrap();
    }

    #[test]
    fn test_shared_pre_work_runs_once() {
        let (_guard, settings) = rooted();
        let mut project = Project::new(settings);
        project.apply(PreBuildPlugin::new()).unwrap();
        project.discover_all(variants()).unwrap();

        let mut build = project.close().unwrap();
        let first = build.assemble("debug").unwrap();
        let second = build.assemble("freeRelease").unwrap();

        assert!(first.executed("preBuildValidation"));
        assert!(!second.executed("preBuildValidation"));
        assert!(second.executed("mergeFreeReleaseAssets"));
    }

    #[test]
    fn test_duplicate_hook_keeps_list() {
        let mut project = Project::new(Settings::default());
        project.apply(PreBuildPlugin::new()).unwrap();
        project.discover(Variant::named("debug")).unwrap();

        let variant = project.variant("debug").unwrap().clone();
        let task = project.tasks().get("preBuildValidation").unwrap();

        let result = project.register_hook(&variant, HookKind::PreWork, &task);

        assert!(matches!(
            result,
            Err(WiringError::DuplicateHookRegistration { .. })
        ));
        assert_eq!(project.hooks().hooks_for("debug", HookKind::PreWork), [task]);
    }

    #[test]
    fn test_flatten_handle_survives_close() {
        let mut project = Project::new(Settings::default());
        project.apply(GeneratedAssetsPlugin).unwrap();
        project.discover(Variant::named("debug")).unwrap();

        let sources = project
            .variant("debug")
            .unwrap()
            .sources(SourceKind::Assets)
            .unwrap()
            .clone();
        let before = sources.flatten();

        let build = project.close().unwrap();

        assert_eq!(sources.flatten().id(), before.id());
        assert_eq!(before.producers()[0].name(), "createDebugAsset");
        drop(build);
    }
}

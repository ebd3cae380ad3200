//! Discovery of the applications a suite flashes to its devices.
//!
//! Application sources live next to the suite file. Precompiled binaries, if any, are looked up in
//! `<binary dir>/<platform name>/<suite dir>` and take precedence over sources with the same name.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use glob::Pattern;
use hil_device::Platform;
use tracing::debug;

use crate::{Error, Result, suite::FixtureDecl};

const APP_SOURCE_EXTENSIONS: [&str; 7] = ["c", "cpp", "cc", "h", "hpp", "hh", "mk"];
const BINARY_EXTENSION: &str = "bin";

/// Builds applications from sources. Compilation happens outside of this crate.
pub trait AppBuilder: Send + Sync {
    /// Build the application in `app_dir` for `platform` and return the path to the binary.
    fn build_app(
        &self,
        app_dir: &Path,
        platform: &Platform,
    ) -> impl Future<Output = anyhow::Result<PathBuf>> + Send;
}

/// Builder for stations that only run precompiled binaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBuilder;

impl AppBuilder for NoBuilder {
    async fn build_app(&self, app_dir: &Path, _: &Platform) -> anyhow::Result<PathBuf> {
        anyhow::bail!(
            "No precompiled binary found and building from source is not available: {}",
            app_dir.display()
        )
    }
}

/// Where an application comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppSource {
    /// Precompiled binary
    Binary(PathBuf),
    /// Source directory, relative to the test directory
    Sources(String),
}

fn base_name(dir: &str) -> &str {
    dir.rsplit('/').next().unwrap_or(dir)
}

fn files_with_extension(root: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/**/*.{ext}", Pattern::escape(&root.to_string_lossy()));
    let files = glob::glob(&pattern)?
        .filter_map(|entry| match entry {
            Ok(p) => Some(p),
            Err(e) => {
                debug!("Skipping unreadable path: {e}");
                None
            }
        })
        .filter(|p| p.is_file())
        .filter_map(|p| p.strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    Ok(files)
}

/// Application source directories of the suite in `suite_dir`, relative to `test_dir`.
///
/// Sources in the suite directory itself make a single application. Otherwise every first-level
/// subdirectory holding sources is an application, unless there is only one of them.
pub fn find_apps(test_dir: &Path, suite_dir: &str) -> Result<Vec<String>> {
    let root = test_dir.join(suite_dir);

    let mut src_files = Vec::new();
    for ext in APP_SOURCE_EXTENSIONS {
        src_files.extend(files_with_extension(&root, ext)?);
    }
    if src_files.is_empty() {
        return Ok(Vec::new());
    }

    let mut app_dirs = BTreeSet::new();
    for f in &src_files {
        let mut components = f.components();
        let first = components.next();
        match (first, components.next()) {
            (Some(dir), Some(_)) => {
                app_dirs.insert(dir.as_os_str().to_string_lossy().to_string());
            }
            // A source file in the suite directory
            _ => return Ok(vec![suite_dir.to_string()]),
        }
    }

    if app_dirs.len() < 2 {
        return Ok(vec![suite_dir.to_string()]);
    }
    Ok(app_dirs
        .into_iter()
        .map(|d| format!("{suite_dir}/{d}"))
        .collect())
}

/// Precompiled binaries of the suite in `suite_dir` for `platform`, by application name.
pub fn find_binaries(
    binary_dir: &Path,
    platform: &Platform,
    suite_dir: &str,
) -> Result<BTreeMap<String, PathBuf>> {
    let root = binary_dir.join(platform.name()).join(suite_dir);

    Ok(files_with_extension(&root, BINARY_EXTENSION)?
        .into_iter()
        .filter_map(|f| {
            let name = f.file_stem()?.to_string_lossy().to_string();
            Some((name, root.join(f)))
        })
        .collect())
}

/// All the applications available to the suite in `suite_dir` on `platform`, by name.
pub fn collect_apps(
    test_dir: &Path,
    binary_dir: Option<&Path>,
    platform: &Platform,
    suite_dir: &str,
) -> Result<BTreeMap<String, AppSource>> {
    let mut apps: BTreeMap<String, AppSource> = match binary_dir {
        Some(dir) => find_binaries(dir, platform, suite_dir)?
            .into_iter()
            .map(|(name, path)| (name, AppSource::Binary(path)))
            .collect(),
        None => BTreeMap::new(),
    };

    for dir in find_apps(test_dir, suite_dir)? {
        apps.entry(base_name(&dir).to_string())
            .or_insert(AppSource::Sources(dir));
    }

    Ok(apps)
}

/// Name of the application to flash on a device.
///
/// A fixture device runs the fixture's application, or the application named after the fixture.
/// A device outside of fixtures runs the only application there is. Otherwise the application is
/// named after the suite directory.
pub fn select_app<V>(
    apps: &BTreeMap<String, V>,
    fixture: Option<&FixtureDecl>,
    suite_dir: &str,
) -> Result<String> {
    let name = match fixture {
        Some(FixtureDecl { app: Some(app), .. }) => Some(app.clone()),
        Some(FixtureDecl { name, .. }) => apps.contains_key(name).then(|| name.clone()),
        None if apps.len() == 1 => apps.keys().next().cloned(),
        None => None,
    };
    let name = name.unwrap_or_else(|| base_name(suite_dir).to_string());

    if apps.contains_key(&name) {
        Ok(name)
    } else {
        Err(Error::AppNotFound(name))
    }
}

/// Read a firmware binary.
pub async fn read_firmware(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|source| Error::Firmware {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use hil_device::platform;

    use super::*;

    fn touch(root: &Path, file: &str) {
        let path = root.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn single_app_in_suite_dir() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "wiring/gpio/gpio.spec");
        touch(dir.path(), "wiring/gpio/application.cpp");
        touch(dir.path(), "wiring/gpio/lib/helper.h");

        assert_eq!(find_apps(dir.path(), "wiring/gpio").unwrap(), ["wiring/gpio"]);
    }

    #[test]
    fn apps_in_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "wiring/i2c/master/master.cpp");
        touch(dir.path(), "wiring/i2c/slave/src/slave.cpp");
        touch(dir.path(), "wiring/i2c/slave/build.mk");
        touch(dir.path(), "wiring/i2c/README.md");

        assert_eq!(
            find_apps(dir.path(), "wiring/i2c").unwrap(),
            ["wiring/i2c/master", "wiring/i2c/slave"]
        );

        // A lone subdirectory is the suite's application
        touch(dir.path(), "wiring/spi/app/app.c");
        assert_eq!(find_apps(dir.path(), "wiring/spi").unwrap(), ["wiring/spi"]);

        assert!(find_apps(dir.path(), "wiring/none").unwrap().is_empty());
    }

    #[test]
    fn binaries_take_precedence() {
        let tests = tempfile::tempdir().unwrap();
        let bins = tempfile::tempdir().unwrap();
        touch(tests.path(), "wiring/i2c/master/master.cpp");
        touch(tests.path(), "wiring/i2c/slave/slave.cpp");
        touch(bins.path(), "boron/wiring/i2c/master.bin");
        touch(bins.path(), "argon/wiring/i2c/slave.bin");

        let boron = platform::for_name("boron").unwrap();
        let apps = collect_apps(tests.path(), Some(bins.path()), boron, "wiring/i2c").unwrap();
        assert_eq!(
            apps["master"],
            AppSource::Binary(bins.path().join("boron/wiring/i2c/master.bin"))
        );
        assert_eq!(
            apps["slave"],
            AppSource::Sources("wiring/i2c/slave".to_string())
        );
    }

    #[test]
    fn app_selection() {
        let apps: BTreeMap<String, ()> = [("master".to_string(), ()), ("slave".to_string(), ())]
            .into_iter()
            .collect();
        let fixture = |name: &str, app: Option<&str>| FixtureDecl {
            name: name.to_string(),
            app: app.map(str::to_string),
        };

        assert_eq!(
            select_app(&apps, Some(&fixture("i2c_a", Some("slave"))), "wiring/i2c").unwrap(),
            "slave"
        );
        assert_eq!(
            select_app(&apps, Some(&fixture("master", None)), "wiring/i2c").unwrap(),
            "master"
        );
        assert!(matches!(
            select_app(&apps, None, "wiring/i2c"),
            Err(Error::AppNotFound(ref name)) if name == "i2c"
        ));

        let single: BTreeMap<String, ()> = [("gpio_app".to_string(), ())].into_iter().collect();
        assert_eq!(select_app(&single, None, "wiring/gpio").unwrap(), "gpio_app");
    }
}

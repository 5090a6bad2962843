//! Discovery of plugin library files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;

/// Separator for lists held in environment variables.
const ENV_LIST_SEPARATOR: char = ';';

/// Finds plugin files in directories and environment variables.
///
/// Files named `<name>.<ext>` are accepted, optionally with a numeric version
/// suffix such as `libfoo.so.1.2`. When several files share a name, the highest
/// version wins.
#[derive(Debug, Clone, Default)]
pub struct PluginCollector {
    extensions: Vec<String>,
    directories: Vec<PathBuf>,
    path_env_var: Option<String>,
    file_env_var: Option<String>,
}

#[derive(Debug)]
struct Candidate {
    path: PathBuf,
    version: Vec<u64>,
}

impl PluginCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_extension(&mut self, extension: impl Into<String>) -> &mut Self {
        self.extensions.push(extension.into());
        self
    }

    pub fn add_directory(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.directories.push(dir.into());
        self
    }

    pub fn add_directories<I, P>(&mut self, dirs: I) -> &mut Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.directories.extend(dirs.into_iter().map(Into::into));
        self
    }

    /// Also scan the `;`-separated directories listed in `name`.
    pub fn enable_path_env_var(&mut self, name: impl Into<String>) -> &mut Self {
        self.path_env_var = Some(name.into());
        self
    }

    /// Also load the `;`-separated files listed in `name`. They come first.
    pub fn enable_file_env_var(&mut self, name: impl Into<String>) -> &mut Self {
        self.file_env_var = Some(name.into());
        self
    }

    pub fn collect(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = self
            .file_env_var
            .as_deref()
            .map(env_list)
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect();

        let mut dirs = self.directories.clone();
        if let Some(var) = self.path_env_var.as_deref() {
            dirs.extend(env_list(var).into_iter().map(PathBuf::from));
        }

        let patterns = self.patterns();
        let mut found: BTreeMap<String, Candidate> = BTreeMap::new();
        for dir in &dirs {
            scan_directory(dir, &patterns, &mut found);
        }

        out.extend(found.into_values().map(|c| c.path));
        out
    }

    fn patterns(&self) -> Vec<Regex> {
        self.extensions
            .iter()
            .filter_map(|ext| {
                let pattern = format!(r"^(.+)\.{}(\.[.0-9]*)?$", regex::escape(ext));
                match Regex::new(&pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::warn!(extension = %ext, error = %e, "Ignoring plugin extension");
                        None
                    }
                }
            })
            .collect()
    }
}

fn env_list(var: &str) -> Vec<String> {
    std::env::var(var)
        .map(|value| {
            value
                .split(ENV_LIST_SEPARATOR)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn scan_directory(dir: &Path, patterns: &[Regex], found: &mut BTreeMap<String, Candidate>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "Skipping plugin directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((name, version)) = match_file_name(file_name, patterns) else {
            continue;
        };

        // Highest version wins; equal versions fall back to the greater path.
        let keep_existing = found
            .get(&name)
            .is_some_and(|existing| (&existing.version, &existing.path) > (&version, &path));
        if !keep_existing {
            found.insert(name, Candidate { path, version });
        }
    }
}

fn match_file_name(file_name: &str, patterns: &[Regex]) -> Option<(String, Vec<u64>)> {
    patterns.iter().find_map(|re| {
        let caps = re.captures(file_name)?;
        let name = caps.get(1)?.as_str().to_string();
        let version = caps
            .get(2)
            .map(|m| parse_version(m.as_str()))
            .unwrap_or_default();
        Some((name, version))
    })
}

/// `.1.10.2` → `[1, 10, 2]`; empty segments are skipped.
fn parse_version(raw: &str) -> Vec<u64> {
    raw.split('.')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn nothing_without_directories() {
        let mut c = PluginCollector::new();
        c.add_extension("so");
        assert!(c.collect().is_empty());
    }

    #[test]
    fn only_matching_extensions_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        let b1 = touch(dir.path(), "libplugin_b1.so");
        let b2 = touch(dir.path(), "libplugin_b2.so");
        touch(dir.path(), "libplugin_b3.plugin");
        touch(dir.path(), "libplugin_b2.txt");

        let mut c = PluginCollector::new();
        c.add_extension("so").add_directory(dir.path());
        assert_eq!(c.collect(), vec![b1, b2]);
    }

    #[test]
    fn several_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "liba.so");
        let b = touch(dir.path(), "libb.plugin");

        let mut c = PluginCollector::new();
        c.add_extension("so")
            .add_extension("plugin")
            .add_directory(dir.path());
        assert_eq!(c.collect(), vec![a, b]);
    }

    #[test]
    fn highest_version_wins() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libplugin_a1.so");
        touch(dir.path(), "libplugin_a1.so.1");
        touch(dir.path(), "libplugin_a1.so.1.1");
        touch(dir.path(), "libplugin_a1.so.1.1.1");
        let newest = touch(dir.path(), "libplugin_a1.so.1.10");
        touch(dir.path(), "libplugin_a1.so.1.9");
        let a2 = touch(dir.path(), "libplugin_a2.so");

        let mut c = PluginCollector::new();
        c.add_extension("so").add_directory(dir.path());
        assert_eq!(c.collect(), vec![newest, a2]);
    }

    #[test]
    fn missing_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "liba.so");

        let mut c = PluginCollector::new();
        c.add_extension("so")
            .add_directories([dir.path().join("absent"), dir.path().to_path_buf()]);
        assert_eq!(c.collect(), vec![a]);
    }

    #[test]
    fn env_files_come_first_and_env_dirs_are_scanned() {
        let listed = tempfile::tempdir().unwrap();
        let scanned = tempfile::tempdir().unwrap();
        let extra = touch(listed.path(), "libzzz.so");
        let found = touch(scanned.path(), "libaaa.so");

        let file_var = "PLUGKIT_TEST_COLLECTOR_FILES";
        let path_var = "PLUGKIT_TEST_COLLECTOR_PATH";
        std::env::set_var(file_var, format!("{};", extra.display()));
        std::env::set_var(path_var, scanned.path());

        let mut c = PluginCollector::new();
        c.add_extension("so")
            .enable_file_env_var(file_var)
            .enable_path_env_var(path_var);
        assert_eq!(c.collect(), vec![extra, found]);

        std::env::remove_var(file_var);
        std::env::remove_var(path_var);
    }

    #[test]
    fn version_parsing_and_ordering() {
        assert_eq!(parse_version(".1.10.2"), vec![1, 10, 2]);
        assert!(parse_version("").is_empty());
        assert!(parse_version(".1.10") > parse_version(".1.9"));
        assert!(parse_version("") < parse_version(".0"));
    }

    #[test]
    fn equal_versions_resolve_by_path() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libfoo.so");
        let dotted = touch(dir.path(), "libfoo.so.");

        let mut c = PluginCollector::new();
        c.add_extension("so").add_directory(dir.path());
        assert_eq!(c.collect(), vec![dotted]);
    }

    #[test]
    fn equal_versions_ignore_directory_order() {
        let root = tempfile::tempdir().unwrap();
        let (a, b) = (root.path().join("a"), root.path().join("b"));
        fs::create_dir(&a).unwrap();
        fs::create_dir(&b).unwrap();
        touch(&a, "libfoo.so.2");
        let winner = touch(&b, "libfoo.so.2");

        for dirs in [[a.clone(), b.clone()], [b.clone(), a.clone()]] {
            let mut c = PluginCollector::new();
            c.add_extension("so").add_directories(dirs);
            assert_eq!(c.collect(), vec![winner.clone()]);
        }
    }
}

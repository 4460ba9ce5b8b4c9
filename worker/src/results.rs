//! Result files left behind by a task.
//!
//! A task writes into the directory exported as `OTS_RESULTS_DIR`. Files at
//! `<environment>/<package>/<file>` are attributed to that package and
//! environment; anything else is shipped unattributed.

use protocol::{Message, ResultObject};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Environment variable pointing a task at its results directory.
pub const RESULTS_DIR_ENV: &str = "OTS_RESULTS_DIR";

#[derive(Debug, Default)]
pub struct CollectedResults {
    /// Packages found per environment.
    pub packages: BTreeMap<String, BTreeSet<String>>,
    pub files: Vec<ResultObject>,
}

impl CollectedResults {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Package lists first, then one result message per file.
    pub fn into_messages(self) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .packages
            .into_iter()
            .map(|(environment, packages)| {
                Message::package_list(environment, packages.into_iter().collect())
            })
            .collect();
        messages.extend(self.files.into_iter().map(Message::result));
        messages
    }
}

/// Read every regular file below `dir`, in path order.
pub fn collect_results(dir: &Path, origin: &str) -> std::io::Result<CollectedResults> {
    let mut collected = CollectedResults::default();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        let (environment, package, filename) = match parts.as_slice() {
            [environment, package, filename] => {
                collected
                    .packages
                    .entry(environment.clone())
                    .or_default()
                    .insert(package.clone());
                (environment.clone(), package.clone(), filename.clone())
            }
            _ => (String::new(), String::new(), parts.join("/")),
        };

        let content = fs::read(path)?;
        debug!(file = %relative.display(), size = content.len(), "Collected result file");
        collected.files.push(ResultObject {
            filename,
            content,
            origin: origin.to_string(),
            package,
            environment,
        });
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_files_by_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("hardware").join("pkgA-tests");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("results.json"), b"{}").unwrap();
        fs::write(dir.path().join("flash.log"), b"ok").unwrap();

        let collected = collect_results(dir.path(), "bench-1").unwrap();
        assert_eq!(collected.files.len(), 2);

        let log = &collected.files[0];
        assert_eq!(log.filename, "flash.log");
        assert_eq!(log.environment, "");

        let result = &collected.files[1];
        assert_eq!(result.filename, "results.json");
        assert_eq!(result.environment, "hardware");
        assert_eq!(result.package, "pkgA-tests");
        assert_eq!(result.origin, "bench-1");

        let messages = collected.into_messages();
        assert!(matches!(&messages[0], Message::TestpackageList(list)
            if list.environment == "hardware" && list.packages == vec!["pkgA-tests".to_string()]));
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn nested_files_come_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        for (env, pkg) in [("host", "pkgB"), ("hardware", "pkgA"), ("hardware", "pkgC")] {
            let pkg_dir = dir.path().join(env).join(pkg);
            fs::create_dir_all(&pkg_dir).unwrap();
            fs::write(pkg_dir.join("results.json"), b"{}").unwrap();
        }
        fs::create_dir_all(dir.path().join("logs").join("deep").join("er")).unwrap();
        fs::write(dir.path().join("logs/deep/er/dmesg.txt"), b"").unwrap();

        let collected = collect_results(dir.path(), "w").unwrap();
        let seen: Vec<(String, String, String)> = collected
            .files
            .iter()
            .map(|f| (f.environment.clone(), f.package.clone(), f.filename.clone()))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("hardware".into(), "pkgA".into(), "results.json".into()),
                ("hardware".into(), "pkgC".into(), "results.json".into()),
                ("host".into(), "pkgB".into(), "results.json".into()),
                (String::new(), String::new(), "logs/deep/er/dmesg.txt".into()),
            ]
        );
        assert_eq!(collected.packages.len(), 2);
    }

    #[test]
    fn empty_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let collected = collect_results(dir.path(), "w").unwrap();
        assert!(collected.is_empty());
        assert!(collected.into_messages().is_empty());
    }
}

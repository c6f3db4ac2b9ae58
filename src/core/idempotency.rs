// src/core/idempotency.rs

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

use super::pattern;
use crate::constants::WILDCARD_PLACEHOLDER;
use crate::models::{
    ExecutionPath, IdempotencyDeclaration, IdempotencyKey, IdempotencySettings, Namespace,
};

/// Record name used for a `$idempotency` declared on the root namespace.
const ROOT_RECORD: &str = "__root__";

#[derive(Error, Debug)]
pub enum IdempotencyError {
    #[error("Failed to create idempotency directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write idempotency record '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Computes and persists the content hashes that let a namespace skip re-execution.
#[derive(Debug, Clone)]
pub struct IdempotencyCache {
    location: PathBuf,
    root: PathBuf,
    use_file_content: bool,
    disabled: bool,
}

impl IdempotencyCache {
    /// `working_dir` anchors relative key paths and a relative record location.
    pub fn new(settings: &IdempotencySettings, working_dir: &Path) -> Self {
        Self {
            location: working_dir.join(&settings.location),
            root: working_dir.to_path_buf(),
            use_file_content: settings.use_file_content,
            disabled: settings.disabled,
        }
    }

    /// Whether `namespace` is gated by the cache at all.
    pub fn is_enabled(&self, namespace: &Namespace) -> bool {
        !self.disabled && namespace.idempotency_active()
    }

    /// Returns `false` only when a saved hash exists and equals the current one.
    pub fn should_run(
        &self,
        namespace: &Namespace,
        path: &ExecutionPath,
        env: &BTreeMap<String, String>,
    ) -> bool {
        let Some(declaration) = namespace.idempotency.as_ref().filter(|_| self.is_enabled(namespace))
        else {
            return true;
        };
        let current = self.compute_hash(declaration, env);
        match self.saved_hash(path) {
            Some(saved) => saved.trim() != current,
            None => true,
        }
    }

    /// Recomputes the hash and stores it as the record for `path`.
    pub fn commit(
        &self,
        namespace: &Namespace,
        path: &ExecutionPath,
        env: &BTreeMap<String, String>,
    ) -> Result<(), IdempotencyError> {
        let Some(declaration) = namespace.idempotency.as_ref().filter(|_| self.is_enabled(namespace))
        else {
            return Ok(());
        };
        let hash = self.compute_hash(declaration, env);
        let record = self.record_path(path);
        if let Some(parent) = record.parent() {
            fs::create_dir_all(parent).map_err(|source| IdempotencyError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&record, hash).map_err(|source| IdempotencyError::Write {
            path: record.clone(),
            source,
        })?;
        log::debug!("Saved idempotency record '{}'", record.display());
        Ok(())
    }

    /// The previously committed hash for `path`, if any.
    pub fn saved_hash(&self, path: &ExecutionPath) -> Option<String> {
        fs::read_to_string(self.record_path(path)).ok()
    }

    /// `<location>/<dotted path>.hash`, with `*` collapsed to a placeholder and
    /// separators inside segments made filename-safe.
    pub fn record_path(&self, path: &ExecutionPath) -> PathBuf {
        let name = if path.is_root() {
            ROOT_RECORD.to_string()
        } else {
            path.segments()
                .iter()
                .map(|segment| {
                    segment
                        .replace('*', WILDCARD_PLACEHOLDER)
                        .replace(['/', '\\'], "_")
                })
                .collect::<Vec<_>>()
                .join(".")
        };
        self.location.join(format!("{name}.hash"))
    }

    /// Folds every key of the declaration, in order, into one SHA-256 digest.
    /// Unreadable resources contribute nothing.
    pub fn compute_hash(
        &self,
        declaration: &IdempotencyDeclaration,
        env: &BTreeMap<String, String>,
    ) -> String {
        let mut hasher = Sha256::new();
        for key in declaration.keys() {
            match key {
                IdempotencyKey::Static(value) => hasher.update(value.as_bytes()),
                IdempotencyKey::Env(name) => {
                    hasher.update(name.as_bytes());
                    let value = env.get(name).cloned().or_else(|| std::env::var(name).ok());
                    if let Some(value) = value {
                        hasher.update(value.as_bytes());
                    }
                }
                IdempotencyKey::File(file) => self.hash_file(&mut hasher, &self.root.join(file)),
                IdempotencyKey::Dir(dir) => self.hash_dir(&mut hasher, &self.root.join(dir)),
                IdempotencyKey::Glob(glob) => self.hash_glob(&mut hasher, glob),
                IdempotencyKey::Unknown(raw) => {
                    log::warn!("Unknown idempotency key type in '{}', hashing it as static text", raw);
                    hasher.update(raw.as_bytes());
                }
            }
        }
        hex::encode(hasher.finalize())
    }

    fn hash_file(&self, hasher: &mut Sha256, file: &Path) {
        if self.use_file_content {
            match fs::read(file) {
                Ok(content) => hasher.update(&content),
                Err(e) => log::debug!("Skipping unreadable file '{}': {}", file.display(), e),
            }
            return;
        }
        match fs::symlink_metadata(file) {
            Ok(metadata) => {
                hasher.update(change_time(&metadata).as_bytes());
                hasher.update(timestamp(metadata.modified()).as_bytes());
            }
            Err(e) => log::debug!("Skipping missing file '{}': {}", file.display(), e),
        }
    }

    fn hash_dir(&self, hasher: &mut Sha256, dir: &Path) {
        if !dir.is_dir() {
            log::debug!("Skipping missing directory '{}'", dir.display());
            return;
        }
        let entries = WalkDir::new(dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok);
        for entry in entries {
            hasher.update(pattern::normalize_relative(entry.path(), &self.root).as_bytes());
            if entry.file_type().is_file() {
                self.hash_file(hasher, entry.path());
            }
        }
    }

    fn hash_glob(&self, hasher: &mut Sha256, glob: &str) {
        let matches = match pattern::expand(glob, &self.root) {
            Ok(matches) => matches,
            Err(e) => {
                log::warn!("Invalid glob '{}' in idempotency key: {}", glob, e);
                return;
            }
        };
        for relative in matches {
            hasher.update(relative.as_bytes());
            let full_path = pattern::absolute(&self.root, &relative);
            if full_path.is_dir() {
                self.hash_dir(hasher, &full_path);
            } else {
                self.hash_file(hasher, &full_path);
            }
        }
    }
}

fn timestamp(time: io::Result<SystemTime>) -> String {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos().to_string())
        .unwrap_or_default()
}

#[cfg(unix)]
fn change_time(metadata: &fs::Metadata) -> String {
    use std::os::unix::fs::MetadataExt;
    format!("{}{:09}", metadata.ctime(), metadata.ctime_nsec())
}

#[cfg(not(unix))]
fn change_time(metadata: &fs::Metadata) -> String {
    timestamp(metadata.created())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cache(dir: &Path, use_file_content: bool) -> IdempotencyCache {
        let settings = IdempotencySettings {
            use_file_content,
            ..IdempotencySettings::default()
        };
        IdempotencyCache::new(&settings, dir)
    }

    fn single(raw: &str) -> IdempotencyDeclaration {
        IdempotencyDeclaration::Single(IdempotencyKey::parse(raw))
    }

    #[test]
    fn test_static_and_env_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), false);
        let env = BTreeMap::new();

        assert_eq!(
            cache.compute_hash(&single("static:123"), &env),
            "a665a45920422f9d417e4867efdc4fb8a04a1f3fff1fa07e998e86f7f7a27ae3"
        );

        let mut overlay = BTreeMap::new();
        overlay.insert("TEST".to_string(), "123".to_string());
        assert_eq!(
            cache.compute_hash(&single("env:TEST"), &overlay),
            "56a7010456b474aeee111f3b7336581fb0a99129d426cf51903efbdfd629f008"
        );

        assert_eq!(
            cache.compute_hash(&single("unknown:123"), &env),
            "ea925de2c7a14b1fde39da49b944be372cef52c53e408e470e93c7be9e03f188"
        );
    }

    #[test]
    fn test_list_and_labeled_declarations_hash_identically() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), false);
        let env = BTreeMap::new();
        let expected = "96cae35ce8a9b0244178bf28e4966c2ce1b8385723a96a6b838858cdd6ca0a1e";

        let list = IdempotencyDeclaration::List(vec![
            IdempotencyKey::parse("static:123"),
            IdempotencyKey::parse("static:123"),
        ]);
        let labeled = IdempotencyDeclaration::Labeled(vec![
            ("first".to_string(), vec![IdempotencyKey::parse("static:123")]),
            ("second".to_string(), vec![IdempotencyKey::parse("static:123")]),
        ]);
        assert_eq!(cache.compute_hash(&list, &env), expected);
        assert_eq!(cache.compute_hash(&labeled, &env), expected);
    }

    #[test]
    fn test_missing_resources_contribute_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let empty = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        for use_content in [false, true] {
            let cache = cache(dir.path(), use_content);
            assert_eq!(cache.compute_hash(&single("file:nope.txt"), &BTreeMap::new()), empty);
            assert_eq!(cache.compute_hash(&single("dir:nope"), &BTreeMap::new()), empty);
            assert_eq!(cache.compute_hash(&single("glob:nope/**"), &BTreeMap::new()), empty);
        }
    }

    #[test]
    fn test_file_timestamp_versus_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("input.txt");
        fs::write(&file, "same bytes").unwrap();
        let declaration = single("file:input.txt");
        let env = BTreeMap::new();

        let by_time = cache(dir.path(), false);
        let by_content = cache(dir.path(), true);
        let time_before = by_time.compute_hash(&declaration, &env);
        let content_before = by_content.compute_hash(&declaration, &env);

        let handle = fs::File::options().write(true).open(&file).unwrap();
        handle
            .set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();
        drop(handle);

        assert_ne!(by_time.compute_hash(&declaration, &env), time_before);
        assert_eq!(by_content.compute_hash(&declaration, &env), content_before);
    }

    #[test]
    fn test_dir_hash_tracks_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/a.txt"), "a").unwrap();
        let cache = cache(dir.path(), true);
        let declaration = single("dir:src");
        let env = BTreeMap::new();

        let before = cache.compute_hash(&declaration, &env);
        assert_eq!(cache.compute_hash(&declaration, &env), before);

        fs::write(dir.path().join("src/nested/b.txt"), "b").unwrap();
        let after = cache.compute_hash(&declaration, &env);
        assert_ne!(after, before);

        let mut expected = Sha256::new();
        expected.update(b"src/a.txt");
        expected.update(b"a");
        expected.update(b"src/nested");
        expected.update(b"src/nested/b.txt");
        expected.update(b"b");
        assert_eq!(after, hex::encode(expected.finalize()));
    }

    #[cfg(unix)]
    #[test]
    fn test_glob_keys_outside_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        fs::create_dir_all(&work).unwrap();
        fs::create_dir_all(dir.path().join("shared")).unwrap();
        fs::write(dir.path().join("shared/a.txt"), "one").unwrap();
        let cache = cache(&work, true);
        let env = BTreeMap::new();
        let empty = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

        let absolute = single(&format!("glob:{}/shared/*.txt", dir.path().display()));
        let parent = single("glob:../shared/*.txt");
        let absolute_before = cache.compute_hash(&absolute, &env);
        let parent_before = cache.compute_hash(&parent, &env);
        assert_ne!(absolute_before, empty);
        assert_ne!(parent_before, empty);

        fs::write(dir.path().join("shared/a.txt"), "two").unwrap();
        assert_ne!(cache.compute_hash(&absolute, &env), absolute_before);
        assert_ne!(cache.compute_hash(&parent, &env), parent_before);
    }

    #[test]
    fn test_round_trip_through_records() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), false);
        let path = ExecutionPath::parse("build.*");
        let env = BTreeMap::new();
        let mut namespace = Namespace::new().with_idempotency(single("static:123"));

        assert!(cache.should_run(&namespace, &path, &env));
        cache.commit(&namespace, &path, &env).unwrap();
        assert!(!cache.should_run(&namespace, &path, &env));
        assert_eq!(
            cache.record_path(&path),
            dir.path().join(".scriptree/idempotency/build.__all__.hash")
        );

        namespace.idempotency = Some(single("static:124"));
        assert!(cache.should_run(&namespace, &path, &env));

        namespace.idempotency_enabled = Some(false);
        cache.commit(&namespace, &path, &env).unwrap();
        assert_eq!(
            cache.saved_hash(&path).as_deref(),
            Some("a665a45920422f9d417e4867efdc4fb8a04a1f3fff1fa07e998e86f7f7a27ae3")
        );
    }

    #[test]
    fn test_disabled_cache_always_runs() {
        let dir = tempfile::tempdir().unwrap();
        let settings = IdempotencySettings {
            disabled: true,
            ..IdempotencySettings::default()
        };
        let cache = IdempotencyCache::new(&settings, dir.path());
        let namespace = Namespace::new().with_idempotency(single("static:1"));
        let path = ExecutionPath::parse("x");
        cache.commit(&namespace, &path, &BTreeMap::new()).unwrap();
        assert!(cache.saved_hash(&path).is_none());
        assert!(cache.should_run(&namespace, &path, &BTreeMap::new()));
    }
}

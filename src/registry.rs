//! Program registry
//!
//! Concurrency-safe table of named programs. Slugs derive from file names;
//! the table is filled by a directory scan at server start, extended lazily
//! when an unknown slug turns out to exist on disk, and refreshed per-entry
//! when the backing file's mtime moves forward.
//!
//! Lock discipline: the readers-writer lock is held only across map
//! operations. Parsing and `stat` always happen outside the lock.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::program::{parse_program_from_file, slugify_filename, Program};

/// Slug-keyed program table behind a readers-writer lock.
#[derive(Debug, Default)]
pub struct ProgramRegistry {
    programs: RwLock<HashMap<String, Arc<Program>>>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a program by slug.
    pub fn get(&self, slug: &str) -> Option<Arc<Program>> {
        let programs = self
            .programs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        programs.get(slug).cloned()
    }

    /// Insert or replace a program under its own slug.
    pub fn store(&self, program: Arc<Program>) {
        let mut programs = self
            .programs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        programs.insert(program.slug.clone(), program);
    }

    /// Number of registered programs.
    pub fn len(&self) -> usize {
        let programs = self
            .programs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the whole table, slug-ordered for stable serialization.
    pub fn snapshot(&self) -> BTreeMap<String, Program> {
        let programs = self
            .programs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        programs
            .iter()
            .map(|(slug, program)| (slug.clone(), (**program).clone()))
            .collect()
    }

    /// Scan `dir` once for `*.json` programs. Parse failures and duplicate
    /// slugs are logged and skipped; the rest still load. Entries are
    /// visited in file-name order so "first wins" is deterministic.
    pub fn load_from_dir(&self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!(
                    dir = %dir.display(),
                    error = %e,
                    "failed to read program directory, no programs will be loaded"
                );
                return;
            }
        };

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let program = match parse_program_from_file(&path) {
                Ok(program) => program,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "failed to parse program, skipping");
                    continue;
                }
            };

            if self.get(&program.slug).is_some() {
                warn!(
                    slug = %program.slug,
                    file = %path.display(),
                    "duplicate program slug, skipping"
                );
                continue;
            }

            info!(slug = %program.slug, path = %path.display(), "loaded program");
            self.store(Arc::new(program));
        }

        info!(program_count = self.len(), "loaded programs");
    }

    /// Lazy single-file load for a slug the registry missed: re-scan `dir`
    /// for the first file whose slugified name matches, parse, store, and
    /// return it. Returns `Ok(None)` when no file matches. Returns a
    /// conflict error if the slug is already registered at call entry.
    pub fn load_new_from_disk(&self, slug: &str, dir: &Path) -> RelayResult<Option<Arc<Program>>> {
        if self.get(slug).is_some() {
            return Err(RelayError::Conflict {
                slug: slug.to_string(),
            });
        }

        let entries = std::fs::read_dir(dir).map_err(|e| {
            RelayError::validation(format!(
                "failed to read program directory {}: {e}",
                dir.display()
            ))
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            if slugify_filename(&path) != slug {
                continue;
            }

            let program = match parse_program_from_file(&path) {
                Ok(program) => Arc::new(program),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "failed to parse program, skipping");
                    continue;
                }
            };

            info!(slug = %program.slug, path = %path.display(), "loaded new program");
            self.store(program.clone());
            return Ok(Some(program));
        }

        Ok(None)
    }

    /// If the program's backing file is newer on disk than what was loaded,
    /// re-parse it, replace the registry entry, and return the fresh
    /// program. Otherwise return the input unchanged. Ad-hoc programs
    /// (no path) pass through untouched.
    pub fn reload_if_newer(&self, program: &Arc<Program>) -> RelayResult<Arc<Program>> {
        let Some(path) = program.path.as_deref() else {
            return Ok(program.clone());
        };

        let metadata = std::fs::metadata(path).map_err(|e| {
            RelayError::validation(format!("failed to stat program file {path}: {e}"))
        })?;
        let modified = metadata.modified().map_err(|e| {
            RelayError::validation(format!("no modification time for program file {path}: {e}"))
        })?;
        let on_disk = DateTime::<Utc>::from(modified);

        let stale = match program.last_modified {
            Some(loaded) => on_disk > loaded,
            None => true,
        };
        if !stale {
            return Ok(program.clone());
        }

        let fresh = Arc::new(parse_program_from_file(Path::new(path)).map_err(|e| {
            RelayError::context(format!("failed to reload program {}", program.slug), e)
        })?);
        info!(
            slug = %fresh.slug,
            old_mtime = ?program.last_modified,
            new_mtime = ?fresh.last_modified,
            "reloaded program"
        );
        self.store(fresh.clone());
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_program(dir: &Path, name: &str, address: &str) {
        let body = format!(
            r#"{{"address":"{address}","commands":[[{{"command":"on","relay":1}}]]}}"#
        );
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_load_from_dir() {
        let dir = TempDir::new().unwrap();
        write_program(dir.path(), "door.json", "a:502");
        write_program(dir.path(), "Garage Light.json", "b:502");
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let registry = ProgramRegistry::new();
        registry.load_from_dir(dir.path());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("door").unwrap().address, "a:502");
        assert_eq!(registry.get("garage-light").unwrap().address, "b:502");
        assert!(registry.get("broken").is_none());
    }

    #[test]
    fn test_duplicate_slug_first_wins() {
        let dir = TempDir::new().unwrap();
        // Both slugify to "door"; file-name order makes "DOOR.json" win.
        write_program(dir.path(), "DOOR.json", "first:502");
        write_program(dir.path(), "door.json", "second:502");

        let registry = ProgramRegistry::new();
        registry.load_from_dir(dir.path());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("door").unwrap().address, "first:502");
    }

    #[test]
    fn test_load_new_from_disk() {
        let dir = TempDir::new().unwrap();
        write_program(dir.path(), "late arrival.json", "c:502");

        let registry = ProgramRegistry::new();
        assert!(registry.get("late-arrival").is_none());

        let program = registry
            .load_new_from_disk("late-arrival", dir.path())
            .unwrap()
            .expect("program should be found on disk");
        assert_eq!(program.address, "c:502");
        assert!(registry.get("late-arrival").is_some());

        // Second call now conflicts: the slug exists.
        let err = registry
            .load_new_from_disk("late-arrival", dir.path())
            .unwrap_err();
        assert!(matches!(err, RelayError::Conflict { .. }));

        // Unknown slug is absent without error.
        assert!(registry
            .load_new_from_disk("no-such", dir.path())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_reload_if_newer() {
        let dir = TempDir::new().unwrap();
        write_program(dir.path(), "door.json", "old:502");

        let registry = ProgramRegistry::new();
        registry.load_from_dir(dir.path());
        let loaded = registry.get("door").unwrap();

        // Unchanged file: same entry comes back, nothing re-parsed.
        let unchanged = registry.reload_if_newer(&loaded).unwrap();
        assert!(Arc::ptr_eq(&loaded, &unchanged));

        // Rewrite the file and age the in-memory copy so the disk wins.
        write_program(dir.path(), "door.json", "new:502");
        let mut aged = (*loaded).clone();
        aged.last_modified = Some(DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        let aged = Arc::new(aged);

        let fresh = registry.reload_if_newer(&aged).unwrap();
        assert_eq!(fresh.address, "new:502");
        assert_eq!(registry.get("door").unwrap().address, "new:502");
    }

    #[test]
    fn test_reload_passes_adhoc_through() {
        let registry = ProgramRegistry::new();
        let adhoc = Arc::new(
            crate::program::parse_program(br#"{"address":"x:502","commands":[]}"#).unwrap(),
        );
        let back = registry.reload_if_newer(&adhoc).unwrap();
        assert!(Arc::ptr_eq(&adhoc, &back));
    }

    #[test]
    fn test_missing_dir_loads_nothing() {
        let registry = ProgramRegistry::new();
        registry.load_from_dir(Path::new("/nonexistent/program/dir"));
        assert!(registry.is_empty());
    }
}

//! Integration tests for field versioning, guards and configuration loading

use jitportal::config::JitConfig;
use jitportal::quasi_immut::{GuardSet, ObjectId, QuasiImmutGuard, VersionTable};
use jitportal::{ArtifactHandle, Error};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;

mod versioning {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_versions_before_and_after_a_write_never_match() {
        let table = VersionTable::new();
        let foo = ObjectId(1);
        let mut history = Vec::new();
        for _ in 0..20 {
            let before = table.read_guarded(foo, "a");
            assert_eq!(before, table.read_guarded(foo, "a"));
            table.invalidate(foo, "a");
            for older in &history {
                assert_ne!(&table.read_guarded(foo, "a"), older);
            }
            assert_ne!(table.read_guarded(foo, "a"), before);
            history.push(before);
        }
        assert_eq!(table.stats().invalidations, 20);
    }

    #[test]
    fn test_fields_are_versioned_independently() {
        let table = VersionTable::new();
        let a = table.read_guarded(ObjectId(1), "a");
        let b = table.read_guarded(ObjectId(1), "b");
        let other = table.read_guarded(ObjectId(2), "a");
        table.invalidate(ObjectId(1), "a");
        assert!(!a.is_current());
        assert!(b.is_current());
        assert!(other.is_current());
    }

    #[test]
    fn test_untracked_field_write_allocates_nothing() {
        let table = VersionTable::new();
        assert!(table.invalidate(ObjectId(1), "a").is_none());
        assert_eq!(table.stats().versions_allocated, 0);
        let fresh = table.read_guarded(ObjectId(1), "a");
        assert!(fresh.is_current());
    }
}

mod guards {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_guard_fails_only_after_a_write() {
        let table = VersionTable::new();
        for writes in 0..4 {
            let guard = QuasiImmutGuard::capture(&table, ObjectId(7), "x");
            assert!(guard.check());
            for _ in 0..writes {
                table.invalidate(ObjectId(7), "x");
            }
            assert_eq!(guard.check(), writes == 0);
            // Checking never repairs a stale guard
            assert_eq!(guard.check(), writes == 0);
        }
    }

    #[test]
    fn test_guard_set_reports_first_stale_field() {
        let table = VersionTable::new();
        let mut set = GuardSet::new();
        assert!(set.push(QuasiImmutGuard::capture(&table, ObjectId(1), "a")));
        assert!(set.push(QuasiImmutGuard::capture(&table, ObjectId(1), "b")));
        assert!(!set.push(QuasiImmutGuard::capture(&table, ObjectId(1), "a")));
        assert_eq!(set.len(), 2);
        assert!(set.all_valid());

        table.invalidate(ObjectId(1), "b");
        let stale = set.check_all().unwrap_err();
        assert_eq!(stale.field().to_string(), "#1.b");
    }

    #[test]
    fn test_stale_version_refuses_dependents() {
        let table = VersionTable::new();
        let version = table.read_guarded(ObjectId(3), "a");
        assert!(table.register_dependent(&version, ArtifactHandle::new(1)));
        assert!(table.register_dependent(&version, ArtifactHandle::new(1)));
        assert_eq!(table.dependents(ObjectId(3), "a"), vec![ArtifactHandle::new(1)]);

        let invalidation = table.invalidate(ObjectId(3), "a").unwrap();
        assert_eq!(invalidation.dependents, vec![ArtifactHandle::new(1)]);
        assert!(!table.register_dependent(&version, ArtifactHandle::new(2)));
        assert!(table.dependents(ObjectId(3), "a").is_empty());
    }
}

mod concurrency {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_concurrent_readers_see_writes() {
        let table = Arc::new(VersionTable::new());
        let guards: Vec<_> = (0..8)
            .map(|i| QuasiImmutGuard::capture(&table, ObjectId(i % 2), "a"))
            .collect();

        let writer = {
            let table = table.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    table.invalidate(ObjectId(0), "a");
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        let version = table.read_guarded(ObjectId(1), "a");
                        assert!(version.is_current());
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        for (i, guard) in guards.iter().enumerate() {
            assert_eq!(guard.check(), i % 2 == 1, "guard {}", i);
        }
        assert_eq!(table.stats().invalidations, 100);
    }

    #[test]
    fn test_register_races_with_invalidate() {
        for round in 0..50u64 {
            let table = Arc::new(VersionTable::new());
            let version = table.read_guarded(ObjectId(round), "a");
            let writer = {
                let table = table.clone();
                thread::spawn(move || table.invalidate(ObjectId(round), "a"))
            };
            let registered = table.register_dependent(&version, ArtifactHandle::new(1));
            let invalidation = writer.join().unwrap().unwrap();

            // Either the write drained the dependent or refused it; never both lost
            if registered {
                assert_eq!(invalidation.dependents, vec![ArtifactHandle::new(1)]);
            } else {
                assert!(invalidation.dependents.is_empty());
            }
            assert!(!version.is_current());
        }
    }
}

mod config_files {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"threshold": 5, "trace_eagerness": 4}}"#).unwrap();
        let config = JitConfig::load(file.path()).unwrap();
        assert_eq!(config.threshold, 5);
        assert_eq!(config.trace_eagerness, 4);
        assert!(config.enable_quasi_immut);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = JitConfig::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, Error::IoError { .. }));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"trace_eagerness": 0}}"#).unwrap();
        assert!(matches!(JitConfig::load(file.path()), Err(Error::ConfigError(_))));
    }
}

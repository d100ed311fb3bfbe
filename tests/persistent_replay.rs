//! Crash recovery and replay determinism for the write-ahead log.

#![cfg(feature = "persistent")]

use std::fs;

use kyrolog::storage::persistent::{PersistentConfig, WAL_FILE};
use kyrolog::{Atom, EngineConfig, KnowledgeBase, Term};
use tempfile::tempdir;

fn atom(functor: &str, arg: &str) -> Atom {
    Atom::new(functor, [Term::constant(arg)]).unwrap()
}

fn config() -> PersistentConfig {
    PersistentConfig::default().with_sync_on_write(false)
}

#[test]
fn reopen_reproduces_store_and_history() {
    let dir = tempdir().unwrap();
    let (fingerprint, weak, weak_history) = {
        let kb = KnowledgeBase::open(dir.path(), EngineConfig::default(), &config()).unwrap();
        kb.batch(|w| {
            w.fact(atom("Bird", "tweety"), Some("field guide"), 1.0)?;
            w.fact(atom("Bird", "opus"), Some("field guide"), 1.0)?;
            w.default_rule(
                vec![Atom::new("Bird", [Term::var("X")]).unwrap()],
                vec![Atom::new("Flies", [Term::var("X")]).unwrap()],
                Atom::new("Flies", [Term::var("X")]).unwrap(),
                Some("folk wisdom"),
                0.9,
            )?;
            Ok(())
        })
        .unwrap();
        let weak = kb.assert_fact(atom("Flies", "opus"), Some("rumour"), 0.2).unwrap();
        kb.assert_fact(atom("Flies", "opus").negate(), Some("zoo"), 0.95).unwrap();
        assert!(!kb.clause(weak).unwrap().unwrap().is_active());
        (kb.fingerprint().unwrap(), weak, kb.history(weak).unwrap())
    };

    let kb = KnowledgeBase::open(dir.path(), EngineConfig::default(), &config()).unwrap();
    assert_eq!(kb.fingerprint().unwrap(), fingerprint);
    assert_eq!(kb.history(weak).unwrap(), weak_history);
    assert_eq!(kb.stats().unwrap().clauses.retracted, 1);

    // Beliefs are re-derived on demand after a restart.
    let answers: Vec<_> = kb
        .query(vec![atom("Flies", "tweety")])
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(answers.len(), 1);
}

#[test]
fn damaged_tail_is_dropped_on_reopen() {
    let dir = tempdir().unwrap();
    {
        let kb = KnowledgeBase::open(dir.path(), EngineConfig::default(), &config()).unwrap();
        for name in ["tweety", "opus", "polly"] {
            kb.assert_fact(atom("Bird", name), None, 1.0).unwrap();
        }
    }

    // Simulate a crash in the middle of the last entry.
    let wal = dir.path().join(WAL_FILE);
    let len = fs::metadata(&wal).unwrap().len();
    let file = fs::OpenOptions::new().write(true).open(&wal).unwrap();
    file.set_len(len - 3).unwrap();
    drop(file);

    let kb = KnowledgeBase::open(dir.path(), EngineConfig::default(), &config()).unwrap();
    assert_eq!(kb.snapshot().unwrap().len(), 2);

    // The log stays appendable after recovery.
    kb.assert_fact(atom("Bird", "polly"), None, 1.0).unwrap();
    drop(kb);
    let kb = KnowledgeBase::open(dir.path(), EngineConfig::default(), &config()).unwrap();
    assert_eq!(kb.snapshot().unwrap().len(), 3);
}

#[test]
fn directory_is_locked_while_open() {
    let dir = tempdir().unwrap();
    let kb = KnowledgeBase::open(dir.path(), EngineConfig::default(), &config()).unwrap();
    assert!(KnowledgeBase::open(dir.path(), EngineConfig::default(), &config()).is_err());
    drop(kb);
    assert!(KnowledgeBase::open(dir.path(), EngineConfig::default(), &config()).is_ok());
}

//! End-to-end session lifecycle against a real registry file.

use bombe_core::{
    DirKind, DirectoryTemplates, FoldResult, LanguagePair, MetricScore, SessionError,
    SessionSettings, SessionStore,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use tempfile::TempDir;

fn settings(root: &TempDir) -> SessionSettings {
    SessionSettings {
        directories: DirectoryTemplates::under(root.path()),
        ..SessionSettings::default()
    }
}

#[test]
fn session_survives_reopening_the_store() {
    let root = TempDir::new().unwrap();
    let registry = root.path().join("bombe-sessions.json");

    let id = {
        let store = SessionStore::new(&registry);
        let mut session = store
            .create(LanguagePair::new("en", "cy"), None, settings(&root))
            .unwrap();
        store.annotate(&mut session, "health domain baseline").unwrap();
        for fold in 1..=3 {
            let bleu = MetricScore::new(20.0 + fold as f64);
            let scores = BTreeMap::from([("BLEU".to_string(), bleu)]);
            store
                .record_result(&mut session, fold, FoldResult::new(scores))
                .unwrap();
            store.save_progress(&mut session, fold).unwrap();
        }
        session.id.to_string()
    };

    let store = SessionStore::new(&registry);
    let current = store.get_current().unwrap();
    assert_eq!(current.id.to_string(), id);
    assert_eq!(current.progress(), 3);
    assert_eq!(current.comment.as_deref(), Some("health domain baseline"));
    assert_eq!(current.results().keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(current.best_fold("BLEU"), Some((3, 23.0)));

    let paths = current.paths();
    let log = paths.fold_path(DirKind::Logs, 4, &["marian.log"]).unwrap();
    assert!(log.starts_with(root.path().join(&id).join("logs")));
}

#[test]
fn activate_switches_current_session() {
    let root = TempDir::new().unwrap();
    let store = SessionStore::new(root.path().join("bombe-sessions.json"));
    let first = store
        .create(LanguagePair::new("en", "cy"), None, settings(&root))
        .unwrap();
    let second = store
        .create(LanguagePair::new("cy", "en"), None, settings(&root))
        .unwrap();
    assert_eq!(store.get_current().unwrap().id, second.id);

    store.activate(&first.id.to_string()).unwrap();
    assert_eq!(store.get_current().unwrap().id, first.id);

    let err = store.activate("en-cy_00000000").unwrap_err();
    assert!(err.is_absent());
    assert!(matches!(err, SessionError::NotFound { .. }));
}

#[test]
fn recorded_scores_survive_the_checksum() {
    let root = TempDir::new().unwrap();
    let store = SessionStore::new(root.path().join("bombe-sessions.json"));
    let mut session = store
        .create(LanguagePair::new("en", "cy"), None, settings(&root))
        .unwrap();

    let values = [
        39.430133835633676,
        1.0 / 3.0,
        std::f64::consts::PI * 17.0,
        0.1 + 0.2,
        52.000000000000014,
        2.0_f64.sqrt() / 7.0,
    ];
    let scores: BTreeMap<String, MetricScore> = ["BLEU", "chrF2", "TER", "WER", "MER", "WIL"]
        .iter()
        .zip(values)
        .map(|(name, value)| (name.to_string(), MetricScore::new(value)))
        .collect();
    let mut result = FoldResult::new(scores.clone());
    result.duration_hours = Some(10.0 / 3.0);
    store.record_result(&mut session, 1, result).unwrap();
    store.save_progress(&mut session, 1).unwrap();

    let reopened = SessionStore::new(store.path());
    let registry = reopened.read_registry().unwrap();
    let stored = registry[&session.id.to_string()].result(1).unwrap();
    assert_eq!(stored.scores, scores);
    assert_eq!(stored.duration_hours, Some(10.0 / 3.0));
    assert_eq!(reopened.get_current().unwrap().progress(), 1);
}

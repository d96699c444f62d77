//! Training, restore and recommendation through the service state object

use chrono::Utc;
use media_gateway_recommender::{
    FactorizationConfig, ItemMetadata, ManualClock, RawInteraction, RecommenderConfig,
    RecommenderError, RecommenderService, StorageConfig, TrainingPhase,
};
use std::sync::{Arc, Barrier};
use std::thread;

fn config_in(dir: &std::path::Path) -> RecommenderConfig {
    RecommenderConfig {
        model: FactorizationConfig {
            no_components: 8,
            epochs: 10,
            ..FactorizationConfig::default()
        },
        storage: StorageConfig::in_dir(dir),
        ..RecommenderConfig::default()
    }
}

fn scenario() -> (Vec<RawInteraction>, Vec<ItemMetadata>) {
    (
        vec![
            RawInteraction::new("u1", "i1", 5.0),
            RawInteraction::new("u1", "i2", 1.0),
            RawInteraction::new("u2", "i3", 4.0),
        ],
        vec![
            ItemMetadata::new("i1")
                .with_genres(["action"])
                .with_popularity(90.0),
            ItemMetadata::new("i2")
                .with_genres(["drama"])
                .with_popularity(10.0),
            ItemMetadata::new("i3").with_release_date("1994-07-06"),
        ],
    )
}

#[test]
fn test_train_and_recommend() {
    let dir = tempfile::tempdir().unwrap();
    let service = RecommenderService::new(config_in(dir.path()));
    let (interactions, items) = scenario();

    let generation = service.train(&interactions, &items).unwrap();
    assert_eq!(generation.num_users(), 2);
    assert_eq!(generation.num_items(), 3);

    let recommendations = service.recommend("u1", Some(2)).unwrap();
    assert_eq!(recommendations.len(), 2);
    assert_ne!(recommendations[0], recommendations[1]);

    assert!(matches!(
        service.recommend("unknown_user", Some(5)),
        Err(RecommenderError::UserNotFound(_))
    ));
}

#[test]
fn test_restore_serves_same_recommendations() {
    let dir = tempfile::tempdir().unwrap();
    let (interactions, items) = scenario();

    let trained = RecommenderService::new(config_in(dir.path()));
    let generation = trained.train(&interactions, &items).unwrap();
    let expected = trained.recommend("u1", Some(3)).unwrap();

    let restarted = RecommenderService::new(config_in(dir.path()));
    let restored = restarted.restore().unwrap().unwrap();

    assert_eq!(restored.id, generation.id);
    assert_eq!(restarted.recommend("u1", Some(3)).unwrap(), expected);
    // Restoring does not start a cooldown
    assert_eq!(restarted.phase(), TrainingPhase::Idle);
}

#[test]
fn test_restore_rejects_partial_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let (interactions, items) = scenario();

    RecommenderService::new(config.clone())
        .train(&interactions, &items)
        .unwrap();
    std::fs::remove_file(&config.storage.model_file).unwrap();

    let restarted = RecommenderService::new(config);
    assert!(matches!(
        restarted.restore(),
        Err(RecommenderError::CorruptPersistedState { .. })
    ));
    assert!(restarted.current().is_none());
}

#[test]
fn test_failed_persist_keeps_previous_generation_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = RecommenderService::with_clock(config_in(dir.path()), clock.clone());
    let (interactions, items) = scenario();

    let first = service.train(&interactions, &items).unwrap();
    std::fs::create_dir(dir.path().join("dataset.bin.tmp")).unwrap();
    clock.advance(chrono::Duration::seconds(121));

    assert!(matches!(
        service.train(&interactions, &items),
        Err(RecommenderError::Io(_))
    ));
    assert_eq!(service.current().unwrap().id, first.id);

    let restarted = RecommenderService::new(config_in(dir.path()));
    let restored = restarted.restore().unwrap().unwrap();
    assert_eq!(restored.id, first.id);
}

#[test]
fn test_failed_training_keeps_previous_generation() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = RecommenderService::with_clock(config_in(dir.path()), clock.clone());
    let (interactions, items) = scenario();

    let first = service.train(&interactions, &items).unwrap();
    clock.advance(chrono::Duration::seconds(121));

    let bad_items = vec![ItemMetadata::new("i9").with_release_date("someday")];
    assert!(matches!(
        service.train(&interactions, &bad_items),
        Err(RecommenderError::FeatureBuild { .. })
    ));

    assert_eq!(service.current().unwrap().id, first.id);
    assert_eq!(service.phase(), TrainingPhase::Idle);
}

#[test]
fn test_cooldown_after_training() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = RecommenderService::with_clock(config_in(dir.path()), clock.clone());
    let (interactions, items) = scenario();

    service.train(&interactions, &items).unwrap();

    clock.advance(chrono::Duration::seconds(1));
    match service.train(&interactions, &items) {
        Err(RecommenderError::CooldownActive { remaining_seconds }) => {
            assert_eq!(remaining_seconds, 119);
        }
        other => panic!("expected cooldown, got {:?}", other.map(|g| g.id)),
    }

    clock.advance(chrono::Duration::seconds(120));
    assert!(service.train(&interactions, &items).is_ok());
}

#[test]
fn test_concurrent_training_is_single_flight() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(RecommenderService::new(config_in(dir.path())).without_persistence());
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let (interactions, items) = scenario();
                barrier.wait();
                service.train(&interactions, &items)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(results.iter().all(|r| matches!(
        r,
        Ok(_) | Err(RecommenderError::TrainingInProgress)
            | Err(RecommenderError::CooldownActive { .. })
    )));
}

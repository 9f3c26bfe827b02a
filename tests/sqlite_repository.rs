//! Persistence round-trips through the sqlite repository, fed by a real
//! scan rather than hand-built rows.

mod common;

use common::{candle, day, graph, registry, series, SINGLE_BLOCK};
use seedscan::engine::SequentialScanner;
use seedscan::model::PatternStatus;
use seedscan::storage::{PatternRepository, SqliteRepository};

fn scanned_patterns() -> Vec<seedscan::model::PatternInstance> {
    let reg = registry();
    let g = graph(SINGLE_BLOCK, &reg);
    let s = series(vec![
        candle(1, 10_200.0, 1_500_000.0),
        candle(2, 11_000.0, 900_000.0), // under the volume gate: no 2nd spawn
        candle(3, 8_800.0, 800_000.0),
        candle(4, 10_400.0, 1_100_000.0),
        candle(5, 8_500.0, 700_000.0),
    ]);
    SequentialScanner::new(g, reg).scan(&s).patterns
}

#[test]
fn save_and_reload_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("patterns.db");

    let patterns = scanned_patterns();
    assert_eq!(patterns.len(), 2);

    {
        let repo = SqliteRepository::open(&db_path).unwrap();
        assert_eq!(repo.save_all(&patterns).unwrap(), 2);
    }

    // a fresh connection re-runs migrations idempotently and sees the rows
    let repo = SqliteRepository::open(&db_path).unwrap();
    for p in &patterns {
        let loaded = repo.find_by_id(p.pattern_id.as_str()).unwrap().unwrap();
        assert_eq!(&loaded, p);
    }
}

#[test]
fn queries_filter_and_order() {
    let repo = SqliteRepository::in_memory().unwrap();
    let patterns = scanned_patterns();
    repo.save_all(&patterns).unwrap();

    let all = repo.find_by_ticker("TEST", None).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].pattern_id < all[1].pattern_id);

    let completed = repo
        .find_by_ticker("TEST", Some(PatternStatus::Completed))
        .unwrap();
    assert_eq!(completed.len(), 2);

    let early = repo.find_by_date_range("TEST", day(1), day(1)).unwrap();
    assert_eq!(early.len(), 1);
    assert_eq!(early[0].root().started_at, day(1));

    assert!(repo.find_by_ticker("OTHER", None).unwrap().is_empty());
}

#[test]
fn delete_then_exists_round_trip() {
    let repo = SqliteRepository::in_memory().unwrap();
    let patterns = scanned_patterns();
    repo.save_all(&patterns).unwrap();

    let id = patterns[0].pattern_id.as_str();
    assert!(repo.exists(id).unwrap());
    assert!(repo.delete(id).unwrap());
    assert!(!repo.exists(id).unwrap());
    assert_eq!(repo.find_by_ticker("TEST", None).unwrap().len(), 1);
}

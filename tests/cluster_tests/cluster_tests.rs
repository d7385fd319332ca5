//! Tests for PaginatedCluster record operations
//!
//! These tests verify:
//! - Create/read round trips for small and multi-page records
//! - Commit and rollback of atomic operations
//! - Position reuse after delete
//! - Pre-allocated positions
//! - Update semantics (versions, the skip sentinel, chain resizing)
//! - Delete semantics and the live entry counter

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use atlascluster::config::{Config, WalSyncStrategy};
use atlascluster::page::MAX_RECORD_SIZE;
use atlascluster::{ClusterError, Engine, PaginatedCluster, PhysicalPosition, RecordVersion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_cluster() -> (TempDir, Engine, Arc<PaginatedCluster>) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 16 })
        .build();
    let engine = Engine::open(config).unwrap();
    let cluster = engine.create_cluster("test_cluster").unwrap();
    (temp_dir, engine, cluster)
}

/// Create one record in its own committed operation
fn create(
    engine: &Engine,
    cluster: &PaginatedCluster,
    payload: &[u8],
    version: i32,
    record_type: u8,
) -> PhysicalPosition {
    engine
        .manager()
        .execute("create", |op| {
            cluster.create_record(op, payload, version, record_type, None)
        })
        .unwrap()
}

fn delete(engine: &Engine, cluster: &PaginatedCluster, position: u64) -> bool {
    engine
        .manager()
        .execute("delete", |op| cluster.delete_record(op, position))
        .unwrap()
}

fn update(
    engine: &Engine,
    cluster: &PaginatedCluster,
    position: u64,
    payload: &[u8],
    version: i32,
    record_type: u8,
) -> bool {
    engine
        .manager()
        .execute("update", |op| {
            cluster.update_record(op, position, payload, version, record_type)
        })
        .unwrap()
}

fn random_payload(rng: &mut StdRng, max_len: usize) -> Vec<u8> {
    let len = rng.gen_range(1..=max_len);
    let mut payload = vec![0u8; len];
    rng.fill(&mut payload[..]);
    payload
}

fn small_record() -> Vec<u8> {
    vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 0]
}

// =============================================================================
// Single Record Tests
// =============================================================================

#[test]
fn test_add_one_small_record_rollback() {
    let (_temp, engine, cluster) = setup_cluster();
    let manager = engine.manager();

    let mut op = manager.start_atomic_operation("add one").unwrap();
    let position = cluster
        .create_record(&mut op, &small_record(), 2, 1, None)
        .unwrap();
    assert_eq!(position.cluster_position, 0);
    manager.end_atomic_operation(op, true).unwrap();

    assert!(manager.current_operation().is_none());
    assert_eq!(cluster.entries().unwrap(), 0);
    assert!(cluster.read_record(0).unwrap().is_none());
}

#[test]
fn test_add_one_small_record_commit() {
    let (_temp, engine, cluster) = setup_cluster();
    let manager = engine.manager();

    let mut op = manager.start_atomic_operation("add one").unwrap();
    let position = cluster
        .create_record(&mut op, &small_record(), 2, 1, None)
        .unwrap();
    manager.end_atomic_operation(op, false).unwrap();

    assert_eq!(position.cluster_position, 0);
    assert_eq!(position.record_size, 10);
    assert_eq!(cluster.entries().unwrap(), 1);

    let record = cluster.read_record(0).unwrap().unwrap();
    assert_eq!(record.buffer, small_record());
    assert_eq!(record.version, 2);
    assert_eq!(record.record_type, 1);
}

#[test]
fn test_add_empty_record() {
    let (_temp, engine, cluster) = setup_cluster();

    let position = create(&engine, &cluster, &[], 3, 9);
    let record = cluster.read_record(position.cluster_position).unwrap().unwrap();

    assert!(record.buffer.is_empty());
    assert_eq!(record.version, 3);
    assert_eq!(record.record_type, 9);
    assert_eq!(cluster.entries().unwrap(), 1);
}

#[test]
fn test_add_one_big_record() {
    let (_temp, engine, cluster) = setup_cluster();
    let mut rng = StdRng::seed_from_u64(7);
    let mut big_record = vec![0u8; 2 * 65_536 + 100];
    rng.fill(&mut big_record[..]);
    assert_eq!(big_record.len(), 131_172);

    // Rolled back first: nothing of the chain may remain visible
    let mut op = engine.manager().start_atomic_operation("big").unwrap();
    cluster
        .create_record(&mut op, &big_record, 2, 1, None)
        .unwrap();
    engine.manager().end_atomic_operation(op, true).unwrap();
    assert_eq!(cluster.entries().unwrap(), 0);
    assert!(cluster.read_record(0).unwrap().is_none());

    let position = create(&engine, &cluster, &big_record, 2, 1);
    assert_eq!(position.cluster_position, 0);
    assert_eq!(position.record_size as usize, big_record.len());

    let record = cluster.read_record(0).unwrap().unwrap();
    assert_eq!(record.buffer, big_record);
    assert_eq!(record.version, 2);
    assert_eq!(record.record_type, 1);
}

#[test]
fn test_record_exactly_max_size_is_single_entry() {
    let (_temp, engine, cluster) = setup_cluster();
    let payload = vec![0x5A; MAX_RECORD_SIZE];

    create(&engine, &cluster, &payload, 1, 1);

    let stats = cluster.statistics().unwrap();
    assert_eq!(stats.data_pages, 1);
    assert_eq!(cluster.read_record(0).unwrap().unwrap().buffer, payload);
}

#[test]
fn test_record_one_past_max_size_spans_two_pages() {
    let (_temp, engine, cluster) = setup_cluster();
    let payload = vec![0xA5; MAX_RECORD_SIZE + 1];

    create(&engine, &cluster, &payload, 1, 1);

    let stats = cluster.statistics().unwrap();
    assert_eq!(stats.data_pages, 2);
    assert_eq!(cluster.read_record(0).unwrap().unwrap().buffer, payload);
}

// =============================================================================
// Position Reuse Tests
// =============================================================================

#[test]
fn test_delete_record_and_add_new_on_its_place() {
    let (_temp, engine, cluster) = setup_cluster();

    let first = create(&engine, &cluster, &small_record(), 2, 1);
    assert_eq!(first.cluster_position, 0);
    assert!(delete(&engine, &cluster, 0));

    let second = create(&engine, &cluster, &small_record(), 2, 1);
    assert_eq!(second.cluster_position, 0);
    assert_eq!(cluster.entries().unwrap(), 1);
}

#[test]
fn test_reuse_takes_lowest_freed_position() {
    let (_temp, engine, cluster) = setup_cluster();
    for _ in 0..10 {
        create(&engine, &cluster, b"r", 1, 1);
    }

    for position in [7, 3, 5] {
        assert!(delete(&engine, &cluster, position));
    }

    let reused: Vec<u64> = (0..4)
        .map(|_| create(&engine, &cluster, b"n", 1, 1).cluster_position)
        .collect();
    assert_eq!(reused, vec![3, 5, 7, 10]);
    assert_eq!(cluster.statistics().unwrap().free_positions, 0);
}

#[test]
fn test_rollback_restores_free_positions() {
    let (_temp, engine, cluster) = setup_cluster();
    for _ in 0..3 {
        create(&engine, &cluster, b"r", 1, 1);
    }
    assert!(delete(&engine, &cluster, 1));

    let mut op = engine.manager().start_atomic_operation("reuse").unwrap();
    let position = cluster.create_record(&mut op, b"x", 1, 1, None).unwrap();
    assert_eq!(position.cluster_position, 1);
    engine.manager().end_atomic_operation(op, true).unwrap();

    let stats = cluster.statistics().unwrap();
    assert_eq!(stats.free_positions, 1);
    assert_eq!(stats.entries, 2);
    assert_eq!(create(&engine, &cluster, b"y", 1, 1).cluster_position, 1);
}

// =============================================================================
// Many Records Tests
// =============================================================================

#[test]
fn test_add_many_small_records() {
    let (_temp, engine, cluster) = setup_cluster();
    let mut rng = StdRng::seed_from_u64(1001);
    let mut expected = BTreeMap::new();

    engine
        .manager()
        .execute("many small", |op| {
            for _ in 0..400 {
                let payload = random_payload(&mut rng, MAX_RECORD_SIZE);
                let position = cluster.create_record(op, &payload, 2, 2, None)?;
                expected.insert(position.cluster_position, payload);
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(cluster.entries().unwrap(), 400);
    for (position, payload) in &expected {
        let record = cluster.read_record(*position).unwrap().unwrap();
        assert_eq!(&record.buffer, payload);
        assert_eq!(record.version, 2);
        assert_eq!(record.record_type, 2);
    }
}

#[test]
fn test_add_many_big_records() {
    let (_temp, engine, cluster) = setup_cluster();
    let mut rng = StdRng::seed_from_u64(1002);
    let mut expected = BTreeMap::new();

    for _ in 0..40 {
        let len = rng.gen_range(MAX_RECORD_SIZE + 1..3 * MAX_RECORD_SIZE);
        let mut payload = vec![0u8; len];
        rng.fill(&mut payload[..]);
        let position = create(&engine, &cluster, &payload, 2, 2);
        expected.insert(position.cluster_position, payload);
    }

    assert_eq!(cluster.entries().unwrap(), 40);
    for (position, payload) in &expected {
        assert_eq!(&cluster.read_record(*position).unwrap().unwrap().buffer, payload);
    }
}

#[test]
fn test_remove_half_records_and_add_another_half_again() {
    let (_temp, engine, cluster) = setup_cluster();
    let mut rng = StdRng::seed_from_u64(1003);
    let mut expected = BTreeMap::new();

    engine
        .manager()
        .execute("fill", |op| {
            for _ in 0..600 {
                let payload = random_payload(&mut rng, 2 * MAX_RECORD_SIZE / 10);
                let position = cluster.create_record(op, &payload, 2, 2, None)?;
                expected.insert(position.cluster_position, payload);
            }
            Ok(())
        })
        .unwrap();

    let doomed: Vec<u64> = expected
        .keys()
        .copied()
        .filter(|_| rng.gen_bool(0.5))
        .collect();
    for chunk in doomed.chunks(100) {
        engine
            .manager()
            .execute("remove half", |op| {
                for position in chunk {
                    assert!(cluster.delete_record(op, *position)?);
                }
                Ok(())
            })
            .unwrap();
    }
    for position in &doomed {
        expected.remove(position);
    }
    assert_eq!(cluster.entries().unwrap(), expected.len() as u64);

    let freed: HashSet<u64> = doomed.iter().copied().collect();
    let mut refilled = HashSet::new();
    engine
        .manager()
        .execute("add half", |op| {
            for _ in 0..doomed.len() {
                let payload = random_payload(&mut rng, 2 * MAX_RECORD_SIZE / 10);
                let position = cluster.create_record(op, &payload, 3, 2, None)?;
                refilled.insert(position.cluster_position);
                expected.insert(position.cluster_position, payload);
            }
            Ok(())
        })
        .unwrap();

    // Every freed position is taken again before any new one is issued
    assert_eq!(refilled, freed);
    assert_eq!(cluster.entries().unwrap(), 600);
    assert_eq!(cluster.statistics().unwrap().positions_size, 600);
    for (position, payload) in &expected {
        assert_eq!(&cluster.read_record(*position).unwrap().unwrap().buffer, payload);
    }
}

#[test]
fn test_mass_insert_rollback_then_commit() {
    let (_temp, engine, cluster) = setup_cluster();
    let manager = engine.manager();
    let before = cluster.entries().unwrap();

    for batch in 0..10 {
        let mut op = manager.start_atomic_operation("mass rollback").unwrap();
        for i in 0..1_000 {
            let payload = format!("record-{}-{}", batch, i).into_bytes();
            cluster.create_record(&mut op, &payload, 1, 1, None).unwrap();
        }
        manager.end_atomic_operation(op, true).unwrap();
    }
    assert_eq!(cluster.entries().unwrap(), before);
    assert!(cluster.first_position().unwrap().is_none());

    for batch in 0..10 {
        let mut op = manager.start_atomic_operation("mass commit").unwrap();
        for i in 0..1_000 {
            let payload = format!("record-{}-{}", batch, i).into_bytes();
            cluster.create_record(&mut op, &payload, 1, 1, None).unwrap();
        }
        manager.end_atomic_operation(op, false).unwrap();
    }
    assert_eq!(cluster.entries().unwrap(), before + 10_000);
    assert_eq!(
        cluster.read_record(4_321).unwrap().unwrap().buffer,
        b"record-4-321".to_vec()
    );
}

// =============================================================================
// Pre-allocated Position Tests
// =============================================================================

#[test]
fn test_allocate_position_map() {
    let (_temp, engine, cluster) = setup_cluster();

    let position = engine
        .manager()
        .execute("allocate", |op| cluster.allocate_position(op, b'd'))
        .unwrap();
    assert_eq!(position.cluster_position, 0);
    assert!(cluster.read_record(0).unwrap().is_none());
    assert!(cluster.get_physical_position(0).unwrap().is_none());
    assert_eq!(cluster.entries().unwrap(), 0);

    // The next plain create does not take the reserved position
    let other = create(&engine, &cluster, b"other", 1, b'd');
    assert_eq!(other.cluster_position, 1);

    let filled = engine
        .manager()
        .execute("fill", |op| {
            cluster.create_record(op, b"payload", 1, b'd', Some(&position))
        })
        .unwrap();
    assert_eq!(filled.cluster_position, 0);
    assert_eq!(cluster.read_record(0).unwrap().unwrap().buffer, b"payload".to_vec());
    assert_eq!(cluster.entries().unwrap(), 2);
}

#[test]
fn test_many_allocate_position_map() {
    let (_temp, engine, cluster) = setup_cluster();
    let records = 10_000;

    let positions = engine
        .manager()
        .execute("allocate many", |op| {
            (0..records)
                .map(|_| cluster.allocate_position(op, b'd'))
                .collect::<atlascluster::Result<Vec<_>>>()
        })
        .unwrap();
    assert_eq!(cluster.entries().unwrap(), 0);
    for position in &positions {
        assert!(cluster.read_record(position.cluster_position).unwrap().is_none());
    }

    for chunk in positions.chunks(1_000) {
        engine
            .manager()
            .execute("fill many", |op| {
                for position in chunk {
                    cluster.create_record(op, &[0u8; 20], 1, b'd', Some(position))?;
                }
                Ok(())
            })
            .unwrap();
    }

    assert_eq!(cluster.entries().unwrap(), records as u64);
    for position in &positions {
        assert!(cluster.read_record(position.cluster_position).unwrap().is_some());
    }
}

#[test]
fn test_create_on_occupied_position_is_rejected() {
    let (_temp, engine, cluster) = setup_cluster();
    let position = create(&engine, &cluster, b"first", 1, 1);

    let result = engine.manager().execute("create again", |op| {
        cluster.create_record(op, b"second", 1, 1, Some(&position))
    });

    assert!(matches!(result, Err(ClusterError::PositionNotAllocated(0))));
    assert_eq!(cluster.read_record(0).unwrap().unwrap().buffer, b"first".to_vec());
    assert_eq!(cluster.entries().unwrap(), 1);
}

#[test]
fn test_create_on_unknown_position_is_rejected() {
    let (_temp, engine, cluster) = setup_cluster();

    let result = engine.manager().execute("create", |op| {
        cluster.create_record(op, b"x", 1, 1, Some(&PhysicalPosition::new(42)))
    });

    assert!(matches!(result, Err(ClusterError::PositionNotAllocated(42))));
    assert_eq!(cluster.statistics().unwrap().positions_size, 0);
}

#[test]
fn test_rejected_create_rolls_back_whole_operation() {
    let (_temp, engine, cluster) = setup_cluster();
    let first = create(&engine, &cluster, b"zero", 1, 1);
    create(&engine, &cluster, b"one", 1, 1);
    create(&engine, &cluster, b"two", 1, 1);

    let result = engine.manager().execute("mixed", |op| {
        let added = cluster.create_record(op, b"three", 1, 1, None)?;
        assert_eq!(added.cluster_position, 3);
        assert!(cluster.delete_record(op, 1)?);
        assert_eq!(cluster.entries_in(op)?, 3);
        cluster.create_record(op, b"again", 1, 1, Some(&first))
    });

    assert!(matches!(result, Err(ClusterError::PositionNotAllocated(0))));
    assert_eq!(cluster.entries().unwrap(), 3);
    assert_eq!(cluster.read_record(1).unwrap().unwrap().buffer, b"one".to_vec());
    assert!(cluster.read_record(3).unwrap().is_none());
    let stats = cluster.statistics().unwrap();
    assert_eq!(stats.positions_size, 3);
    assert_eq!(stats.free_positions, 0);
}

#[cfg(target_pointer_width = "64")]
#[test]
fn test_record_larger_than_u32_is_rejected() {
    let (_temp, engine, cluster) = setup_cluster();
    create(&engine, &cluster, b"kept", 1, 1);

    // Zeroed allocation stays untouched: the size is checked before any read
    let huge = vec![0u8; u32::MAX as usize + 1];

    let created = engine.manager().execute("too large", |op| {
        cluster.create_record(op, &huge, 1, 1, None)
    });
    assert!(matches!(
        created,
        Err(ClusterError::RecordTooLarge { size, .. }) if size == huge.len()
    ));

    let updated = engine.manager().execute("too large", |op| {
        cluster.update_record(op, 0, &huge, 2, 1)
    });
    assert!(matches!(updated, Err(ClusterError::RecordTooLarge { .. })));

    let record = cluster.read_record(0).unwrap().unwrap();
    assert_eq!(record.buffer, b"kept".to_vec());
    assert_eq!(record.version, 1);
    assert_eq!(cluster.entries().unwrap(), 1);
    assert_eq!(cluster.statistics().unwrap().positions_size, 1);
}

// =============================================================================
// Update Tests
// =============================================================================

#[test]
fn test_update_one_small_record() {
    let (_temp, engine, cluster) = setup_cluster();
    let position = create(&engine, &cluster, &small_record(), 2, 1);

    let updated = vec![2, 3, 4, 5, 6, 7, 8, 9, 0, 1, 2, 3];
    assert!(update(&engine, &cluster, position.cluster_position, &updated, 3, 2));

    let record = cluster.read_record(position.cluster_position).unwrap().unwrap();
    assert_eq!(record.buffer, updated);
    assert_eq!(record.version, 3);
    assert_eq!(record.record_type, 2);
    assert_eq!(cluster.entries().unwrap(), 1);
}

#[test]
fn test_update_one_small_record_version_is_lower_current_one() {
    let (_temp, engine, cluster) = setup_cluster();
    let position = create(&engine, &cluster, &small_record(), 2, 1);

    let updated = vec![2, 3, 4, 5, 6, 7, 8, 9, 0, 1, 2, 3];
    assert!(update(&engine, &cluster, position.cluster_position, &updated, 1, 2));

    let record = cluster.read_record(position.cluster_position).unwrap().unwrap();
    assert_eq!(record.version, 1);
    assert_eq!(record.buffer, updated);
}

#[test]
fn test_update_one_small_record_version_is_minus_two() {
    let (_temp, engine, cluster) = setup_cluster();
    let position = create(&engine, &cluster, &small_record(), 2, 1);

    let updated = vec![2, 3, 4, 5, 6, 7, 8, 9, 0, 1, 2, 3];
    assert!(!update(
        &engine,
        &cluster,
        position.cluster_position,
        &updated,
        RecordVersion::SKIP_UPDATE,
        2
    ));

    let record = cluster.read_record(position.cluster_position).unwrap().unwrap();
    assert_eq!(record.buffer, small_record());
    assert_eq!(record.version, 2);
    assert_eq!(record.record_type, 1);
}

#[test]
fn test_update_rollback_keeps_old_record() {
    let (_temp, engine, cluster) = setup_cluster();
    let position = create(&engine, &cluster, &small_record(), 2, 1);

    let mut op = engine.manager().start_atomic_operation("update").unwrap();
    assert!(cluster
        .update_record(&mut op, position.cluster_position, b"changed", 5, 3)
        .unwrap());
    let inside = cluster
        .read_record_in(&op, position.cluster_position)
        .unwrap()
        .unwrap();
    assert_eq!(inside.buffer, b"changed".to_vec());
    engine.manager().end_atomic_operation(op, true).unwrap();

    let record = cluster.read_record(position.cluster_position).unwrap().unwrap();
    assert_eq!(record.buffer, small_record());
    assert_eq!(record.version, 2);
}

#[test]
fn test_update_big_record_grows_and_shrinks_chain() {
    let (_temp, engine, cluster) = setup_cluster();
    let mut rng = StdRng::seed_from_u64(1004);
    let position = create(&engine, &cluster, b"tiny", 1, 1).cluster_position;

    let mut big = vec![0u8; 3 * MAX_RECORD_SIZE + 17];
    rng.fill(&mut big[..]);
    assert!(update(&engine, &cluster, position, &big, 2, 1));
    assert_eq!(cluster.read_record(position).unwrap().unwrap().buffer, big);
    let grown = cluster.get_physical_position(position).unwrap().unwrap();
    assert_eq!(grown.record_size as usize, big.len());

    assert!(update(&engine, &cluster, position, b"small again", 3, 1));
    let record = cluster.read_record(position).unwrap().unwrap();
    assert_eq!(record.buffer, b"small again".to_vec());
    assert_eq!(record.version, 3);

    // Space released by the old chain is reused rather than appended
    let pages_before = cluster.statistics().unwrap().data_pages;
    assert!(update(&engine, &cluster, position, &big, 4, 1));
    assert_eq!(cluster.statistics().unwrap().data_pages, pages_before);
}

#[test]
fn test_update_many_records() {
    let (_temp, engine, cluster) = setup_cluster();
    let mut rng = StdRng::seed_from_u64(1005);
    let mut expected = BTreeMap::new();

    engine
        .manager()
        .execute("fill", |op| {
            for _ in 0..200 {
                let payload = random_payload(&mut rng, 2 * MAX_RECORD_SIZE);
                let position = cluster.create_record(op, &payload, 2, 2, None)?;
                expected.insert(position.cluster_position, (payload, 2));
            }
            Ok(())
        })
        .unwrap();

    let positions: Vec<u64> = expected.keys().copied().collect();
    for position in positions {
        if rng.gen_bool(0.5) {
            let payload = random_payload(&mut rng, 2 * MAX_RECORD_SIZE);
            assert!(update(&engine, &cluster, position, &payload, 3, 2));
            expected.insert(position, (payload, 3));
        }
    }

    assert_eq!(cluster.entries().unwrap(), 200);
    for (position, (payload, version)) in &expected {
        let record = cluster.read_record(*position).unwrap().unwrap();
        assert_eq!(&record.buffer, payload);
        assert_eq!(record.version, *version);
    }
}

#[test]
fn test_update_absent_position_returns_false() {
    let (_temp, engine, cluster) = setup_cluster();

    assert!(!update(&engine, &cluster, 0, b"x", 1, 1));

    let allocated = engine
        .manager()
        .execute("allocate", |op| cluster.allocate_position(op, 1))
        .unwrap();
    assert!(!update(&engine, &cluster, allocated.cluster_position, b"x", 1, 1));
    assert!(cluster.read_record(allocated.cluster_position).unwrap().is_none());
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_nonexistent_record_returns_false() {
    let (_temp, engine, cluster) = setup_cluster();
    create(&engine, &cluster, b"keep", 1, 1);

    assert!(!delete(&engine, &cluster, 5));
    assert!(!delete(&engine, &cluster, u64::MAX));
    assert_eq!(cluster.entries().unwrap(), 1);
}

#[test]
fn test_delete_twice_returns_false() {
    let (_temp, engine, cluster) = setup_cluster();
    let position = create(&engine, &cluster, b"gone", 1, 1).cluster_position;

    assert!(delete(&engine, &cluster, position));
    assert!(!delete(&engine, &cluster, position));
    assert_eq!(cluster.entries().unwrap(), 0);
    assert!(cluster.read_record(position).unwrap().is_none());
}

#[test]
fn test_delete_big_record_frees_pages() {
    let (_temp, engine, cluster) = setup_cluster();
    let big = vec![9u8; 2 * MAX_RECORD_SIZE + 5];
    let position = create(&engine, &cluster, &big, 1, 1).cluster_position;
    let pages = cluster.statistics().unwrap().data_pages;

    assert!(delete(&engine, &cluster, position));
    create(&engine, &cluster, &big, 1, 1);

    assert_eq!(cluster.statistics().unwrap().data_pages, pages);
}

// =============================================================================
// Physical Position Tests
// =============================================================================

#[test]
fn test_get_physical_position() {
    let (_temp, engine, cluster) = setup_cluster();
    let mut rng = StdRng::seed_from_u64(1006);
    let mut created = Vec::new();

    engine
        .manager()
        .execute("fill", |op| {
            for i in 0..300 {
                let payload = random_payload(&mut rng, 2 * MAX_RECORD_SIZE);
                created.push(cluster.create_record(op, &payload, i + 3, i as u8, None)?);
            }
            Ok(())
        })
        .unwrap();

    let mut removed = HashSet::new();
    for position in &created {
        let found = cluster
            .get_physical_position(position.cluster_position)
            .unwrap()
            .unwrap();
        assert_eq!(&found, position);
        if rng.gen_bool(0.5) {
            assert!(delete(&engine, &cluster, position.cluster_position));
            removed.insert(position.cluster_position);
        }
    }

    for position in &created {
        let found = cluster.get_physical_position(position.cluster_position).unwrap();
        if removed.contains(&position.cluster_position) {
            assert!(found.is_none());
        } else {
            assert_eq!(found.as_ref(), Some(position));
        }
    }
}

// =============================================================================
// Inside-Operation Visibility Tests
// =============================================================================

#[test]
fn test_reads_inside_operation_see_own_writes() {
    let (_temp, engine, cluster) = setup_cluster();
    let manager = engine.manager();

    let mut op = manager.start_atomic_operation("read your writes").unwrap();
    let position = cluster.create_record(&mut op, b"pending", 4, 2, None).unwrap();

    assert_eq!(cluster.entries_in(&op).unwrap(), 1);
    let inside = cluster
        .read_record_in(&op, position.cluster_position)
        .unwrap()
        .unwrap();
    assert_eq!(inside.buffer, b"pending".to_vec());
    assert_eq!(
        cluster
            .get_physical_position_in(&op, position.cluster_position)
            .unwrap(),
        Some(position)
    );

    // Committed view is unchanged until commit
    assert_eq!(cluster.entries().unwrap(), 0);
    assert!(cluster.read_record(position.cluster_position).unwrap().is_none());

    manager.end_atomic_operation(op, false).unwrap();
    assert_eq!(cluster.entries().unwrap(), 1);
}

#[test]
fn test_failed_execute_rolls_back_earlier_writes() {
    let (_temp, engine, cluster) = setup_cluster();

    let result = engine.manager().execute("partial", |op| {
        cluster.create_record(op, b"a", 1, 1, None)?;
        cluster.create_record(op, b"b", 1, 1, None)?;
        cluster.create_record(op, b"c", 1, 1, Some(&PhysicalPosition::new(99)))
    });

    assert!(result.is_err());
    assert_eq!(cluster.entries().unwrap(), 0);
    assert!(cluster.read_record(0).unwrap().is_none());
    assert!(engine.manager().current_operation().is_none());
}

#[test]
fn test_statistics_track_counters() {
    let (_temp, engine, cluster) = setup_cluster();
    for _ in 0..5 {
        create(&engine, &cluster, b"s", 1, 1);
    }
    delete(&engine, &cluster, 2);

    let stats = cluster.statistics().unwrap();
    assert_eq!(stats.entries, 4);
    assert_eq!(stats.positions_size, 5);
    assert_eq!(stats.free_positions, 1);
    assert_eq!(stats.data_pages, 1);
    assert_eq!(stats.map_pages, 1);
}

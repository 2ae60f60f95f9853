use nvmstore::attribute_vector::NVAttributeVector;
use nvmstore::manager::NVManager;
use nvmstore::pmem::NvmConfig;
use serial_test::serial;
use tempfile::TempDir;

/// Points a fresh `NVManager` at a scratch directory and clears any state
/// left over from a previous test. Tests run `#[serial]` because the
/// manager is process-wide global state.
fn setup() -> TempDir {
    let dir = TempDir::new().expect("create scratch dir");
    NVManager::reset().expect("reset manager");
    NVManager::configure(NvmConfig {
        mount_point: dir.path().to_path_buf(),
        backing_file: dir.path().join("backing"),
        pool_size: 8 * 1024 * 1024,
        allow_any_fs: true,
    })
    .expect("configure manager");
    dir
}

#[test]
#[serial]
fn construction_sizes_rows_by_columns() {
    let _dir = setup();
    let av: NVAttributeVector<i32> = NVAttributeVector::new(3, 10).unwrap();
    assert_eq!(av.columns(), 3);
    // `new` allocates storage for `rows * columns` elements but starts the
    // logical row count at zero, mirroring NVVector::new's own size/capacity
    // split.
    assert_eq!(av.size(), 0);
    assert_eq!(av.capacity(), 10);
}

#[test]
#[serial]
fn row_major_get_set_round_trip() {
    let _dir = setup();
    let mut av: NVAttributeVector<i32> = NVAttributeVector::new(4, 5).unwrap();
    av.resize(5, 0).unwrap();
    assert_eq!(av.size(), 5);

    for row in 0..5 {
        for column in 0..4 {
            av.set(row, column, (row * 10 + column) as i32);
        }
    }
    for row in 0..5 {
        for column in 0..4 {
            assert_eq!(av.get(row, column), (row * 10 + column) as i32);
            assert_eq!(av.at(row, column).unwrap(), (row * 10 + column) as i32);
        }
    }
}

#[test]
#[serial]
fn out_of_bounds_checked_access_errors() {
    let _dir = setup();
    let mut av: NVAttributeVector<i32> = NVAttributeVector::new(2, 3).unwrap();
    av.resize(3, 0).unwrap();
    assert!(av.at(0, 5).is_err());
    assert!(av.set_checked(0, 5, 1).is_err());
}

#[test]
#[serial]
fn inc_returns_pre_increment_value() {
    let _dir = setup();
    let mut av: NVAttributeVector<i32> = NVAttributeVector::new(2, 2).unwrap();
    av.resize(2, 0).unwrap();
    av.set(1, 0, 41);

    let prev = av.inc(0, 1);
    assert_eq!(prev, 41);
    assert_eq!(av.get(1, 0), 42);
}

#[test]
#[serial]
fn atomic_inc_returns_pre_increment_value_and_is_thread_safe() {
    let _dir = setup();
    let mut av: NVAttributeVector<i64> = NVAttributeVector::new(1, 1).unwrap();
    av.resize(1, 0).unwrap();

    let mut totals = Vec::new();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    let mut prevs = Vec::new();
                    for _ in 0..100 {
                        prevs.push(av.atomic_inc(0, 0));
                    }
                    prevs
                })
            })
            .collect();
        for h in handles {
            totals.extend(h.join().unwrap());
        }
    });

    // 8 threads x 100 increments apiece must produce 800 distinct
    // pre-increment values with no two threads observing the same one.
    totals.sort_unstable();
    totals.dedup();
    assert_eq!(totals.len(), 800);
    assert_eq!(av.get(0, 0), 800);
}

#[test]
#[serial]
fn resize_and_reserve_scale_by_columns() {
    let _dir = setup();
    let mut av: NVAttributeVector<i32> = NVAttributeVector::new(3, 2).unwrap();
    av.reserve(20).unwrap();
    assert_eq!(av.capacity(), 20);

    av.resize(7, 9).unwrap();
    assert_eq!(av.size(), 7);
    for column in 0..3 {
        assert_eq!(av.get(6, column), 9);
    }
}

#[test]
#[serial]
fn copy_is_unsupported() {
    let _dir = setup();
    let av: NVAttributeVector<i32> = NVAttributeVector::new(2, 2).unwrap();
    assert!(av.copy().is_err());
}

#[test]
#[serial]
fn display_renders_rows_space_separated() {
    let _dir = setup();
    let mut av: NVAttributeVector<i32> = NVAttributeVector::new(2, 2).unwrap();
    av.resize(2, 0).unwrap();
    av.set(0, 0, 1);
    av.set(0, 1, 2);
    av.set(1, 0, 3);
    av.set(1, 1, 4);
    assert_eq!(format!("{}", av), "1 2\n3 4\n");
}

#[test]
#[serial]
fn persist_scattered_pass_through_does_not_panic() {
    let _dir = setup();
    let mut av: NVAttributeVector<i32> = NVAttributeVector::new(3, 4).unwrap();
    av.resize(4, 0).unwrap();
    av.set(1, 2, 7);
    av.set(3, 0, 8);
    av.persist_scattered(&[(1, 2), (3, 0)]).unwrap();
}

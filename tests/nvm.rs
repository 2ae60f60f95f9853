use nvmstore::manager::NVManager;
use nvmstore::pmem::NvmConfig;
use nvmstore::vector::NVVector;
use rand::Rng;
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
fn basic_round_trip() {
    let _dir = setup();
    let mut v: NVVector<i32> = NVVector::new(100, 0).unwrap();
    assert_eq!(v.len(), 100);
    for i in 0..100 {
        assert_eq!(v[i], 0);
    }
    for i in 0..100 {
        v[i] = 200 + i as i32;
    }
    for i in 0..100 {
        assert_eq!(v[i], 200 + i as i32);
    }
}

#[test]
#[serial]
fn restore_by_uuid() {
    let _dir = setup();
    let mut v2: NVVector<i32> = NVVector::new(100, 0).unwrap();
    v2[0] = 123;
    v2[1] = 2;
    let uuid = v2.uuid();

    let v: NVVector<i32> = NVVector::from_uuid(uuid).unwrap();
    assert_eq!(v[0], 123);
    assert_eq!(v[1], 2);
    assert_eq!(v.len(), 100);
}

#[test]
#[serial]
fn reserve_does_not_resize() {
    let _dir = setup();
    let mut v: NVVector<i32> = NVVector::new(10, 0).unwrap();
    v.reserve(20).unwrap();
    assert_eq!(v.len(), 10);
    assert_eq!(v.capacity(), 20);
}

#[test]
#[serial]
fn resize_up_and_down_with_fill() {
    let _dir = setup();
    let mut v: NVVector<i32> = NVVector::new(20, 0).unwrap();
    for i in 0..20 {
        v[i] = 200 + i as i32;
    }

    v.resize(30, 0).unwrap();
    for i in 20..30 {
        assert_eq!(v[i], 0);
    }

    v.resize(40, 51).unwrap();
    for i in 30..40 {
        assert_eq!(v[i], 51);
    }

    v.reserve(50).unwrap();
    v.resize(10, 0).unwrap();
    assert_eq!(v.len(), 10);
    for i in 0..10 {
        assert_eq!(v[i], 200 + i as i32);
    }
}

#[test]
#[serial]
fn assign_overwrites_and_resizes() {
    let _dir = setup();
    let mut v: NVVector<i32> = NVVector::new(20, 0).unwrap();
    v[0] = 123;
    v[1] = 2;

    v.assign(10, 2).unwrap();
    assert_eq!(v.len(), 10);
    for i in 0..10 {
        assert_eq!(v[i], 2);
    }

    v.assign(30, 5).unwrap();
    assert_eq!(v.len(), 30);
    for i in 0..30 {
        assert_eq!(v[i], 5);
    }
}

#[test]
#[serial]
fn no_cross_vector_overlap_under_growth() {
    let _dir = setup();
    let mut v1: NVVector<i32> = NVVector::new(100, 1).unwrap();
    let mut v2: NVVector<i32> = NVVector::new(100, 2).unwrap();

    v1.resize(105, 3).unwrap();
    for i in 0..100 {
        assert_eq!(v2[i], 2);
    }
    for i in 0..100 {
        assert_eq!(v1[i], 1);
    }
    for i in 100..105 {
        assert_eq!(v1[i], 3);
    }

    v2.assign(105, 4).unwrap();
    for i in 0..100 {
        assert_eq!(v1[i], 1);
    }
    for i in 100..105 {
        assert_eq!(v1[i], 3);
    }
    for i in 0..105 {
        assert_eq!(v2[i], 4);
    }
}

#[test]
#[serial]
fn sort_compatibility() {
    let _dir = setup();
    let mut rng = rand::thread_rng();
    let mut v: NVVector<i32> = NVVector::new(0, 0).unwrap();
    for _ in 0..100 {
        v.push_back(rng.gen_range(0..10)).unwrap();
    }
    v.as_mut_slice().sort_unstable();
    for window in v.as_slice().windows(2) {
        assert!(window[0] <= window[1]);
    }
}

#[test]
#[serial]
fn swap_exchanges_elements_and_keeps_uuid() {
    let _dir = setup();
    let mut a: NVVector<i32> = NVVector::new(3, 1).unwrap();
    let mut b: NVVector<i32> = NVVector::new(3, 2).unwrap();
    let uuid_a = a.uuid();
    let uuid_b = b.uuid();

    a.swap(&mut b);

    assert_eq!(a.uuid(), uuid_a);
    assert_eq!(b.uuid(), uuid_b);
    assert_eq!(a[0], 2);
    assert_eq!(b[0], 1);
}

#[test]
#[serial]
fn pointer_goes_stale_across_growth() {
    let _dir = setup();
    let mut v: NVVector<i32> = NVVector::new(1, 0).unwrap();
    let before = v.data();
    for i in 0..64 {
        v.push_back(i).unwrap();
    }
    let after = v.data();
    assert_ne!(before, after, "data() pointer should move after enough growth");
}

#[test]
#[serial]
fn persist_scattered_does_not_panic_on_sparse_indices() {
    let _dir = setup();
    let mut v: NVVector<i32> = NVVector::new(256, 0).unwrap();
    for i in 0..256 {
        v[i] = i as i32;
    }
    v.persist_scattered(&[3, 1, 200, 4, 201, 5], false).unwrap();
}

#[test]
#[serial]
fn canaries_intact_after_allocate_resize_destroy() {
    let _dir = setup();
    let mut v: NVVector<i32> = NVVector::new(4, 0).unwrap();
    v.reserve(64).unwrap();
    v.push_back(7).unwrap();
    NVManager::verify_canaries();
    drop(v);
    NVManager::verify_canaries();
}

//! Typed reads and writes through a process handle backed by fake memory.

mod common;

use std::sync::Arc;

use common::{fake_process, FakeMemory, SharedMemory, FAKE_BASE, FAKE_PID, FAKE_SIZE};
use memlink_lib::{
    DataSource, Error, MemoryAccessError, MemoryRegion, NativeBuffer, ProcessHandle, ProcessId,
};

#[test]
fn test_write_then_read_int() {
    let process = fake_process();

    process.write_i32(FAKE_BASE, 305_419_896).unwrap();
    assert_eq!(process.read_i32(FAKE_BASE).unwrap(), 305_419_896);
    assert_eq!(process.read_u32(FAKE_BASE).unwrap(), 0x1234_5678);
}

#[test]
fn test_round_trip_every_width() {
    let process = fake_process();
    let at = |offset: u64| FAKE_BASE + offset;

    process.write_bool(at(0), true).unwrap();
    process.write_u8(at(1), 0xfe).unwrap();
    process.write_i8(at(2), -5).unwrap();
    process.write_u16(at(4), 0xbeef).unwrap();
    process.write_i16(at(6), -1234).unwrap();
    process.write_u32(at(8), 0xdead_beef).unwrap();
    process.write_i64(at(16), i64::MIN + 7).unwrap();
    process.write_u64(at(24), u64::MAX - 7).unwrap();
    process.write_f32(at(32), -2.5).unwrap();
    process.write_f64(at(40), std::f64::consts::PI).unwrap();

    assert!(process.read_bool(at(0)).unwrap());
    assert_eq!(process.read_u8(at(1)).unwrap(), 0xfe);
    assert_eq!(process.read_i8(at(2)).unwrap(), -5);
    assert_eq!(process.read_u16(at(4)).unwrap(), 0xbeef);
    assert_eq!(process.read_i16(at(6)).unwrap(), -1234);
    assert_eq!(process.read_u32(at(8)).unwrap(), 0xdead_beef);
    assert_eq!(process.read_i64(at(16)).unwrap(), i64::MIN + 7);
    assert_eq!(process.read_u64(at(24)).unwrap(), u64::MAX - 7);
    assert_eq!(process.read_f32(at(32)).unwrap(), -2.5);
    assert_eq!(process.read_f64(at(40)).unwrap(), std::f64::consts::PI);
}

#[test]
fn test_generic_read_write() {
    let process = fake_process();

    process.write::<u16>(FAKE_BASE + 2, 513).unwrap();
    assert_eq!(process.read::<u16>(FAKE_BASE + 2).unwrap(), 513);
    assert_eq!(process.read_bytes(FAKE_BASE + 2, 2).unwrap(), 513u16.to_ne_bytes());
}

#[test]
fn test_bool_reads_any_nonzero_byte_as_true() {
    let process = fake_process();

    process.write_u8(FAKE_BASE, 0x40).unwrap();
    assert!(process.read_bool(FAKE_BASE).unwrap());

    process.write_bool(FAKE_BASE, false).unwrap();
    assert_eq!(process.read_u8(FAKE_BASE).unwrap(), 0);
}

#[test]
fn test_pointer_and_strings() {
    let process = fake_process();

    process.write_u64(FAKE_BASE, FAKE_BASE + 0x100).unwrap();
    let pointer = process.read_pointer(FAKE_BASE).unwrap();
    assert_eq!(pointer, FAKE_BASE + 0x100);

    process.write_bytes(pointer, b"player\0junk").unwrap();
    assert_eq!(process.read_string(pointer, 11).unwrap(), "player");
    assert_eq!(process.read_string(pointer, 3).unwrap(), "pla");
}

#[test]
fn test_unmapped_address_fails() {
    let process = fake_process();
    let unmapped = 0x10;

    for size in [1, 4, 8, 4096] {
        assert!(!process.can_read(unmapped, size));
    }

    match process.read_i32(unmapped) {
        Err(MemoryAccessError::Transfer { address, size, .. }) => {
            assert_eq!(address, unmapped);
            assert_eq!(size, 4);
        }
        other => panic!("expected Transfer, got {other:?}"),
    }

    assert!(process.write_i32(unmapped, 1).is_err());
}

#[test]
fn test_oversized_requests_fail_cleanly() {
    let process = fake_process();

    assert!(!process.can_read(FAKE_BASE, usize::MAX));
    assert!(!process.can_read(0, 1 << 46));
    assert!(!process.can_read(FAKE_BASE, FAKE_SIZE + 1));
    assert!(process.can_read(FAKE_BASE, FAKE_SIZE));

    for result in [
        process.read_bytes(FAKE_BASE, usize::MAX).map(|_| ()),
        process.read_buffer(FAKE_BASE, usize::MAX).map(|_| ()),
    ] {
        assert!(matches!(result, Err(MemoryAccessError::Allocation(usize::MAX))));
    }
}

#[test]
fn test_partial_transfer_is_an_error() {
    let process = fake_process();
    let last = FAKE_BASE + FAKE_SIZE as u64 - 2;

    assert!(process.can_read(last, 2));
    assert!(!process.can_read(last, 4));

    match process.read_u32(last) {
        Err(MemoryAccessError::ShortTransfer {
            expected: 4,
            actual: 2,
            ..
        }) => {}
        other => panic!("expected ShortTransfer, got {other:?}"),
    }
}

#[test]
fn test_read_buffer_records_provenance() {
    let process = fake_process();
    process.write_u64(FAKE_BASE + 8, 99).unwrap();

    let buffer = process.read_buffer(FAKE_BASE + 8, 8).unwrap();
    assert_eq!(buffer.size(), 8);
    assert_eq!(buffer.get_u64(0).unwrap(), 99);
    assert_eq!(buffer.last_read_source(), Some(ProcessId::from(FAKE_PID)));
    assert_eq!(buffer.last_read_address(), Some(FAKE_BASE + 8));
}

#[test]
fn test_read_into_reuses_caller_buffer() {
    let process = fake_process();
    process.write_bytes(FAKE_BASE, &[1, 2, 3, 4]).unwrap();

    let mut buffer = NativeBuffer::new(4);
    process.read_into(FAKE_BASE, &mut buffer).unwrap();
    assert_eq!(buffer.as_bytes(), &[1, 2, 3, 4]);

    buffer.put_u8(0, 9).unwrap();
    process.write_buffer(FAKE_BASE + 4, &buffer).unwrap();
    assert_eq!(process.read_bytes(FAKE_BASE + 4, 4).unwrap(), vec![9, 2, 3, 4]);
}

#[test]
fn test_zero_length_transfers_succeed() {
    let process = fake_process();

    assert!(process.read_bytes(0, 0).unwrap().is_empty());
    process.write_bytes(0, &[]).unwrap();
}

#[test]
fn test_find_module_is_idempotent() {
    let process = fake_process();

    let first = process.find_module("fake.so").unwrap().clone();
    let second = process.find_module("fake.so").unwrap().clone();

    assert_eq!(first, second);
    assert_eq!(first.base(), FAKE_BASE);
    assert_eq!(first.size(), FAKE_SIZE as u64);
    assert_eq!(first.permissions(), "r-xp");
}

#[test]
fn test_find_module_missing() {
    let process = fake_process();

    let error = process.find_module("missing.so").unwrap_err();
    assert_eq!(error.0, "missing.so");
    assert!(error.to_string().contains("missing.so"));
}

#[test]
fn test_module_address() {
    let process = fake_process();

    assert_eq!(process.module_address("fake.so", 0x10).unwrap(), FAKE_BASE + 0x10);
    assert!(matches!(
        process.module_address("fake.so", FAKE_SIZE as u64),
        Err(Error::MemoryAccess(MemoryAccessError::OutsideRegion { .. }))
    ));
    assert!(matches!(
        process.module_address("nope.so", 0),
        Err(Error::ModuleNotFound(_))
    ));
}

#[test]
fn test_directory_only_changes_on_reload() {
    common::init_logging();
    let memory = Arc::new(FakeMemory::new());
    let mut process = ProcessHandle::new(
        ProcessId::from(FAKE_PID),
        Box::new(SharedMemory(Arc::clone(&memory))),
    )
    .unwrap();

    memory.replace_modules(vec![
        MemoryRegion::new("late.so", FAKE_BASE + 0x800, 0x100, "r-xp").unwrap(),
    ]);
    assert!(process.find_module("fake.so").is_ok());
    assert!(process.find_module("late.so").is_err());

    process.reload_modules().unwrap();
    assert!(process.find_module("fake.so").is_err());
    assert_eq!(process.find_module("late.so").unwrap().base(), FAKE_BASE + 0x800);
}

#[test]
fn test_concurrent_readers_see_their_own_data() {
    let process = fake_process();
    let threads = 8u64;

    for i in 0..threads {
        process.write_u64(FAKE_BASE + i * 8, i * 0x0101_0101).unwrap();
    }

    std::thread::scope(|scope| {
        for i in 0..threads {
            let process = &process;
            scope.spawn(move || {
                for _ in 0..500 {
                    assert_eq!(process.read_u64(FAKE_BASE + i * 8).unwrap(), i * 0x0101_0101);
                }
            });
        }
    });
}

#[test]
fn test_close_releases_handle() {
    let process = fake_process();
    assert_eq!(process.id(), ProcessId::from(FAKE_PID));
    process.close();
}

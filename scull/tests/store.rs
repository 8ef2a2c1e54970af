#[macro_use]
extern crate hamcrest;

mod common;

use hamcrest::prelude::*;
use scull::caller::Interrupt;
use scull::error::DeviceError;
use scull::store::{SegmentedStore, SetLayout, Whence};

use common::{tunables, Unmapped};

async fn write_all(
    store: &SegmentedStore,
    mut offset: u64,
    mut data: &[u8],
    interrupt: &Interrupt,
) {
    while !data.is_empty() {
        let n = store.write(offset, data, interrupt).await.unwrap();
        assert!(n > 0);
        offset += n as u64;
        data = &data[n..];
    }
}

async fn read_up_to(
    store: &SegmentedStore,
    mut offset: u64,
    len: usize,
    interrupt: &Interrupt,
) -> Vec<u8> {
    let mut out = Vec::new();
    while out.len() < len {
        let mut buf = vec![0u8; len - out.len()];
        let n = store.read(offset, buf.as_mut_slice(), interrupt).await.unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
        offset += n as u64;
    }
    out
}

#[tokio::test]
async fn test_write_then_read_returns_prefix_for_any_dimensions() {
    let interrupt = Interrupt::new();
    let data: Vec<u8> = (0..=255u8).cycle().take(100).collect();

    for (segment_size, set_size) in [(1, 1), (1, 3), (4, 3), (7, 2), (4000, 1000)] {
        for offset in [0u64, 3, 13, 250] {
            let store = SegmentedStore::new(tunables(segment_size, set_size));
            write_all(&store, offset, &data, &interrupt).await;

            for n in [1usize, 10, 100, 150] {
                let got = read_up_to(&store, offset, n, &interrupt).await;
                assert_that!(got.as_slice(), equal_to(&data[..n.min(data.len())]));
            }
        }
    }
}

#[tokio::test]
async fn test_single_write_stops_at_segment_end() {
    let interrupt = Interrupt::new();
    let store = SegmentedStore::new(tunables(4, 3));

    assert_eq!(store.write(2, b"abcdef", &interrupt).await, Ok(2));
    assert_eq!(store.size().await, 4);

    let mut buf = [0u8; 8];
    assert_eq!(store.read(0, &mut buf, &interrupt).await, Ok(4));
    assert_eq!(&buf[2..4], b"ab");
}

#[tokio::test]
async fn test_trim_empties_store() {
    let interrupt = Interrupt::new();
    let store = SegmentedStore::new(tunables(4, 2));
    write_all(&store, 0, b"some data spanning sets", &interrupt).await;

    store.trim(&interrupt).await.unwrap();

    assert_eq!(store.size().await, 0);
    let mut buf = [0u8; 16];
    assert_eq!(store.read(0, &mut buf, &interrupt).await, Ok(0));
    assert!(store.layout().await.sets.is_empty());
}

#[tokio::test]
async fn test_boundary_write_allocates_only_touched_segments() {
    let interrupt = Interrupt::new();
    let store = SegmentedStore::new(tunables(4, 3));

    write_all(&store, 2, b"abcdef", &interrupt).await;

    let layout = store.layout().await;
    assert_that!(
        layout.sets.clone(),
        equal_to(vec![SetLayout {
            slots: 3,
            segments: vec![0, 1],
        }])
    );
    assert_eq!(layout.segment_count(), 2);
    assert_eq!(layout.size, 8);
}

#[tokio::test]
async fn test_far_write_passes_through_empty_sets() {
    let interrupt = Interrupt::new();
    let store = SegmentedStore::new(tunables(4, 2));

    // item 2, slot 1
    assert_eq!(store.write(21, b"x", &interrupt).await, Ok(1));

    let layout = store.layout().await;
    assert_eq!(layout.sets.len(), 3);
    assert_eq!(layout.sets[0].slots, 0);
    assert_eq!(layout.sets[1].slots, 0);
    assert_eq!(layout.sets[2].segments, vec![1]);
    assert_eq!(layout.size, 22);

    // Holes read short, not as errors
    let mut buf = [0u8; 4];
    assert_eq!(store.read(0, &mut buf, &interrupt).await, Ok(0));
    assert_eq!(store.read(21, &mut buf, &interrupt).await, Ok(1));
    assert_eq!(buf[0], b'x');
    assert_eq!(store.read(22, &mut buf, &interrupt).await, Ok(0));
}

#[tokio::test]
async fn test_unreachable_far_write_is_out_of_memory() {
    let interrupt = Interrupt::new();
    let store = SegmentedStore::new(tunables(1, 1));
    write_all(&store, 0, b"ab", &interrupt).await;
    let before = store.layout().await;

    let far = store
        .seek(0, i64::MAX, Whence::Start, &interrupt)
        .await
        .unwrap();
    assert_eq!(
        store.write(far, b"x", &interrupt).await,
        Err(DeviceError::OutOfMemory)
    );
    assert_eq!(
        store.write(u64::MAX - 1, b"x", &interrupt).await,
        Err(DeviceError::OutOfMemory)
    );
    assert_eq!(store.layout().await, before);

    // Still usable afterwards
    assert_eq!(store.write(2, b"c", &interrupt).await, Ok(1));
    assert_eq!(read_up_to(&store, 0, 8, &interrupt).await, b"abc");
}

#[tokio::test]
async fn test_write_past_last_offset_is_rejected() {
    let interrupt = Interrupt::new();
    let store = SegmentedStore::new(tunables(4, 1));

    assert_eq!(
        store.write(u64::MAX, b"x", &interrupt).await,
        Err(DeviceError::InvalidArgument)
    );
    assert_eq!(store.size().await, 0);
}

#[tokio::test]
async fn test_seek_is_relative_and_unbounded() {
    let interrupt = Interrupt::new();
    let store = SegmentedStore::new(tunables(4, 2));
    write_all(&store, 0, b"0123456789", &interrupt).await;

    assert_eq!(store.seek(3, 4, Whence::Start, &interrupt).await, Ok(4));
    assert_eq!(store.seek(3, 4, Whence::Current, &interrupt).await, Ok(7));
    assert_eq!(store.seek(3, -2, Whence::End, &interrupt).await, Ok(8));
    assert_eq!(
        store.seek(0, 1 << 40, Whence::Start, &interrupt).await,
        Ok(1 << 40)
    );
    assert_eq!(
        store.seek(3, -4, Whence::Current, &interrupt).await,
        Err(DeviceError::InvalidArgument)
    );
    assert_eq!(
        store.seek(0, -11, Whence::End, &interrupt).await,
        Err(DeviceError::InvalidArgument)
    );
}

#[tokio::test]
async fn test_fault_does_not_grow_size() {
    let interrupt = Interrupt::new();
    let store = SegmentedStore::new(tunables(4, 2));
    write_all(&store, 0, b"abc", &interrupt).await;

    assert_eq!(
        store.write(3, &Unmapped(5), &interrupt).await,
        Err(DeviceError::Fault)
    );
    assert_eq!(store.size().await, 3);

    assert_eq!(
        store.read(0, &mut Unmapped(5), &interrupt).await,
        Err(DeviceError::Fault)
    );
}

#[tokio::test]
async fn test_tunables_remap_existing_data() {
    let interrupt = Interrupt::new();
    let store = SegmentedStore::new(tunables(4, 3));
    write_all(&store, 0, b"abcdefgh", &interrupt).await;

    // Offset 2 now addresses slot 1, which holds what was written at 4
    store.set_tunables(2, 3, &interrupt).await.unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(store.read(2, &mut buf, &interrupt).await, Ok(2));
    assert_eq!(&buf[..2], b"ef");

    assert_eq!(
        store.set_tunables(0, 3, &interrupt).await,
        Err(DeviceError::InvalidArgument)
    );
}

#[tokio::test]
async fn test_trim_adopts_process_wide_dimensions() {
    let interrupt = Interrupt::new();
    let shared = tunables(4, 3);
    let store = SegmentedStore::new(shared.clone());

    shared.set_segment_size(16);
    assert_eq!(store.layout().await.segment_size, 4);

    store.trim(&interrupt).await.unwrap();
    let layout = store.layout().await;
    assert_eq!((layout.segment_size, layout.set_size), (16, 3));
}

#[tokio::test]
async fn test_release_ignores_interrupt() {
    let interrupt = Interrupt::new();
    let store = SegmentedStore::new(tunables(4, 3));
    write_all(&store, 0, b"abcdefgh", &interrupt).await;

    interrupt.raise();
    store.release().await;
    assert_eq!(store.size().await, 0);
}

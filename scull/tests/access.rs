#[macro_use]
extern crate hamcrest;

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use hamcrest::prelude::*;
use scull::access::{
    AccessPolicy, BlockingExclusive, ExclusiveSingleton, OpenFlags, OwnerScopedShared,
    SessionCloned, Unrestricted,
};
use scull::caller::{Caller, Capability, Credentials};
use scull::error::DeviceError;
use scull::idgen::IdGen;
use scull::session::Session;
use scull::store::SegmentedStore;
use scull::tunables::Tunables;
use scull::wait_queue::WaitQueue;

use common::{tunables, until};

struct Bench {
    tunables: Arc<Tunables>,
    idgen: IdGen,
    queue: WaitQueue,
}

impl Bench {
    fn new() -> Self {
        Self {
            tunables: tunables(4, 3),
            idgen: IdGen::new(),
            queue: WaitQueue::new(),
        }
    }

    fn store(&self) -> Arc<SegmentedStore> {
        Arc::new(SegmentedStore::new(Arc::clone(&self.tunables)))
    }

    async fn open(
        &self,
        device: &Arc<dyn AccessPolicy>,
        caller: Caller,
        flags: OpenFlags,
    ) -> Result<Session, DeviceError> {
        Session::open(
            self.idgen.next_handle(),
            Arc::clone(device),
            Arc::clone(&self.tunables),
            caller,
            flags,
        )
        .await
    }
}

#[tokio::test]
async fn test_write_only_open_trims_store() {
    let bench = Bench::new();
    let store = bench.store();
    let device: Arc<dyn AccessPolicy> = Arc::new(Unrestricted::new("scull0", Arc::clone(&store)));

    let mut rw = bench
        .open(&device, Caller::user(1), OpenFlags::read_write())
        .await
        .unwrap();
    rw.write_all(b"leftover").await.unwrap();

    let _ro = bench
        .open(&device, Caller::user(2), OpenFlags::read_only())
        .await
        .unwrap();
    assert_eq!(store.size().await, 8);

    let _wo = bench
        .open(&device, Caller::user(3), OpenFlags::write_only())
        .await
        .unwrap();
    assert_eq!(store.size().await, 0);
}

#[tokio::test]
async fn test_exclusive_singleton_admits_one_session() {
    let bench = Bench::new();
    let single = Arc::new(ExclusiveSingleton::new("scullsingle", bench.store()));
    let device: Arc<dyn AccessPolicy> = single.clone();

    let (a, b) = tokio::join!(
        bench.open(&device, Caller::user(1), OpenFlags::read_only()),
        bench.open(&device, Caller::root(), OpenFlags::read_only()),
    );
    let (mut winner, loser) = match (a, b) {
        (Ok(s), Err(e)) | (Err(e), Ok(s)) => (s, e),
        _ => panic!("exactly one open must succeed"),
    };
    assert_that!(loser, equal_to(DeviceError::Busy));
    assert!(!single.is_available());

    winner.close().unwrap();
    assert!(single.is_available());
    assert!(bench
        .open(&device, Caller::user(2), OpenFlags::read_only())
        .await
        .is_ok());
}

#[tokio::test]
async fn test_owner_scoped_shares_with_owner_only() {
    let bench = Bench::new();
    let uid = Arc::new(OwnerScopedShared::new("sculluid", bench.store()));
    let device: Arc<dyn AccessPolicy> = uid.clone();
    let flags = OpenFlags::read_write();

    let a = bench.open(&device, Caller::user(1000), flags).await.unwrap();
    let b = bench.open(&device, Caller::user(1000), flags).await.unwrap();
    assert_eq!(uid.open_count(), 2);
    assert_eq!(uid.owner(), Some(1000));

    let other = bench.open(&device, Caller::user(2000), flags).await;
    assert_that!(other.err(), equal_to(Some(DeviceError::Busy)));

    let setuid = Caller::new(Credentials::user(2000).with_euid(1000));
    let c = bench.open(&device, setuid, flags).await.unwrap();

    let admin = Caller::new(Credentials::user(3000).with_capability(Capability::DacOverride));
    let d = bench.open(&device, admin, flags).await.unwrap();
    assert_eq!(uid.open_count(), 4);

    drop((a, b, c, d));
    assert_eq!(uid.open_count(), 0);
    // The owner is not cleared, but the count lets the next user in
    assert_eq!(uid.owner(), Some(1000));
    let _e = bench.open(&device, Caller::user(2000), flags).await.unwrap();
    assert_eq!(uid.owner(), Some(2000));
}

#[tokio::test]
async fn test_blocking_exclusive_waits_for_owner() {
    let bench = Bench::new();
    let wuid = Arc::new(BlockingExclusive::new(
        "scullwuid",
        bench.store(),
        bench.queue.clone(),
        &bench.idgen,
    ));
    let device: Arc<dyn AccessPolicy> = wuid.clone();

    let a = bench
        .open(&device, Caller::user(1000), OpenFlags::read_write())
        .await
        .unwrap();

    // Nonblocking: refused without suspending
    let nb = bench
        .open(&device, Caller::user(2000), OpenFlags::read_write().nonblocking())
        .now_or_never();
    assert!(matches!(nb, Some(Err(DeviceError::WouldBlock))));
    assert_eq!(wuid.waiting(), 0);

    let mut b = {
        let device = Arc::clone(&device);
        let tunables = Arc::clone(&bench.tunables);
        let handle = bench.idgen.next_handle();
        tokio::spawn(async move {
            Session::open(handle, device, tunables, Caller::user(2000), OpenFlags::read_write())
                .await
        })
    };
    until(|| wuid.waiting() == 1).await;
    assert!(tokio::time::timeout(Duration::from_millis(20), &mut b)
        .await
        .is_err());

    drop(a);
    let b = tokio::time::timeout(Duration::from_secs(5), b)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(wuid.owner(), Some(2000));
    assert_eq!(wuid.open_count(), 1);
    drop(b);
}

#[tokio::test]
async fn test_blocking_exclusive_release_wakes_all_waiters() {
    let bench = Bench::new();
    let wuid = Arc::new(BlockingExclusive::new(
        "scullwuid",
        bench.store(),
        bench.queue.clone(),
        &bench.idgen,
    ));
    let device: Arc<dyn AccessPolicy> = wuid.clone();

    let a = bench
        .open(&device, Caller::user(1000), OpenFlags::read_only())
        .await
        .unwrap();

    let mut waiters = Vec::new();
    for uid in [2000, 3000] {
        let device = Arc::clone(&device);
        let tunables = Arc::clone(&bench.tunables);
        let handle = bench.idgen.next_handle();
        waiters.push(tokio::spawn(async move {
            Session::open(handle, device, tunables, Caller::user(uid), OpenFlags::read_only()).await
        }));
    }
    until(|| wuid.waiting() == 2).await;

    drop(a);
    // Both woke up; one won, the other went back to sleep
    until(|| waiters.iter().filter(|w| w.is_finished()).count() == 1 && wuid.waiting() == 1).await;
    assert_eq!(wuid.open_count(), 1);

    for waiter in waiters {
        waiter.abort();
    }
}

#[tokio::test]
async fn test_interrupted_blocking_open_leaves_state() {
    let bench = Bench::new();
    let wuid = Arc::new(BlockingExclusive::new(
        "scullwuid",
        bench.store(),
        bench.queue.clone(),
        &bench.idgen,
    ));
    let device: Arc<dyn AccessPolicy> = wuid.clone();
    let _a = bench
        .open(&device, Caller::user(1000), OpenFlags::read_only())
        .await
        .unwrap();

    let caller = Caller::user(2000);
    let waiter = {
        let device = Arc::clone(&device);
        let tunables = Arc::clone(&bench.tunables);
        let handle = bench.idgen.next_handle();
        let caller = caller.clone();
        tokio::spawn(async move {
            Session::open(handle, device, tunables, caller, OpenFlags::write_only()).await
        })
    };
    until(|| wuid.waiting() == 1).await;

    caller.interrupt.raise();
    let res = waiter.await.unwrap();
    assert!(matches!(res, Err(DeviceError::Interrupted)));
    assert_eq!(wuid.open_count(), 1);
    assert_eq!(wuid.owner(), Some(1000));
    assert_eq!(wuid.waiting(), 0);
}

#[tokio::test]
async fn test_session_cloned_keys_stores_by_controlling_session() {
    let bench = Bench::new();
    let private = Arc::new(SessionCloned::new("scullpriv", Arc::clone(&bench.tunables)));
    let device: Arc<dyn AccessPolicy> = private.clone();
    let flags = OpenFlags::read_write();

    let detached = bench.open(&device, Caller::user(1000), flags).await;
    assert_that!(detached.err(), equal_to(Some(DeviceError::NoControllingSession)));

    let tty1 = Caller::new(Credentials::user(1000).with_controlling_session(1));
    let tty2 = Caller::new(Credentials::user(1000).with_controlling_session(2));

    let mut a = bench.open(&device, tty1.clone(), flags).await.unwrap();
    a.write_all(b"one").await.unwrap();

    let mut b = bench.open(&device, tty1, flags).await.unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(b.read(&mut buf).await, Ok(3));

    let mut c = bench.open(&device, tty2, flags).await.unwrap();
    assert_eq!(c.read(&mut buf).await, Ok(0));
    assert_eq!(private.session_count(), 2);

    // Stores outlive their sessions
    drop((a, b, c));
    assert_eq!(private.store_for(1).unwrap().size().await, 3);
    assert_eq!(device.stores().len(), 2);
}

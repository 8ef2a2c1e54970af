use scull::idgen::Handle;
use scull::wait_queue::*;

#[tokio::test]
async fn test_basic_wait_notify() {
    let queue = WaitQueue::new();
    let handle = Handle::new(1);

    queue.register(handle, "test");

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let queue_clone = queue.clone();
    let waiter = tokio::spawn(async move {
        let wakeup = queue_clone.wait(handle);
        // Registered as soon as `wait` returns
        ready_tx.send(()).unwrap();
        wakeup.await
    });

    ready_rx.await.unwrap();
    queue.notify(handle, 42);

    assert_eq!(waiter.await.unwrap(), 42);
    queue.retire(handle);
}

#[tokio::test]
async fn test_subscription() {
    let queue = WaitQueue::new();
    let handle = Handle::new(2);

    queue.register(handle, "test");

    let mut rx = queue.subscribe(handle, 10).unwrap();
    queue.notify(handle, 1);
    queue.notify(handle, 2);

    assert_eq!(rx.recv().await.unwrap(), 1);
    assert_eq!(rx.recv().await.unwrap(), 2);

    // Drop receiver to unsubscribe; a later subscriber sees only new values
    drop(rx);
    queue.notify(handle, 3);
    let mut late = queue.subscribe(handle, 10).unwrap();
    queue.notify(handle, 4);
    assert_eq!(late.recv().await.unwrap(), 4);

    queue.retire(handle);
}

#[tokio::test]
async fn test_subscribe_to_unregistered_handle_fails() {
    let queue = WaitQueue::new();
    assert!(queue.subscribe(Handle::new(3), 10).is_none());
}

#[tokio::test]
async fn test_retire_wakes_waiters_and_listeners() {
    let queue = WaitQueue::new();
    let handle = Handle::new(4);

    queue.register(handle, "test");
    let mut rx = queue.subscribe(handle, 10).unwrap();

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let queue_clone = queue.clone();
    let waiter = tokio::spawn(async move {
        let wakeup = queue_clone.wait(handle);
        ready_tx.send(()).unwrap();
        wakeup.await
    });

    ready_rx.await.unwrap();
    queue.retire(handle);

    assert_eq!(waiter.await.unwrap(), RETIRED);
    assert_eq!(rx.recv().await.unwrap(), RETIRED);
    // Listeners are dropped with the handle
    assert!(rx.recv().await.is_err());
    assert!(!queue.is_registered(handle));
}

#[tokio::test]
async fn test_notify_before_wait_then_retire() {
    let queue = WaitQueue::new();
    let handle = Handle::new(10);

    queue.register(handle, "test");

    // Nobody waits yet: the notification is not stored
    queue.notify(handle, 42);
    queue.retire(handle);

    // Waiting on a retired handle returns at once
    assert_eq!(queue.wait(handle).await, RETIRED);
}

#[tokio::test]
async fn test_multiple_waiters() {
    let queue = WaitQueue::new();
    let handle = Handle::new(11);

    queue.register(handle, "test");

    let mut waiters = Vec::new();
    let mut ready = Vec::new();
    for _ in 0..3 {
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let queue_clone = queue.clone();
        waiters.push(tokio::spawn(async move {
            let wakeup = queue_clone.wait(handle);
            ready_tx.send(()).unwrap();
            wakeup.await
        }));
        ready.push(ready_rx);
    }

    for ready_rx in ready {
        ready_rx.await.unwrap();
    }
    assert_eq!(queue.sleeper_count(handle), 3);

    // One notification wakes all of them
    queue.notify(handle, 7);
    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), 7);
    }
    assert_eq!(queue.sleeper_count(handle), 0);

    queue.retire(handle);
}

#[tokio::test]
async fn test_notify_one_wakes_oldest_sleeper() {
    let queue = WaitQueue::new();
    let handle = Handle::new(12);
    queue.register(handle, "test");

    let first = queue.wait(handle);
    let second = queue.wait(handle);
    assert_eq!(queue.sleeper_count(handle), 2);

    assert!(queue.notify_one(handle, 9));
    assert_eq!(first.await, 9);
    assert_eq!(queue.sleeper_count(handle), 1);

    queue.retire(handle);
    assert_eq!(second.await, RETIRED);
    assert!(!queue.notify_one(handle, 1));
}

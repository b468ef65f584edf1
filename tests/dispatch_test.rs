mod common;

use common::runtime;
use native_bridge_v8::DispatchError;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[tokio::test]
async fn test_async_tasks_run_in_order() {
    let mut rt = runtime();
    let dispatcher = rt.dispatcher();

    rt.evaluate("globalThis.log = [];").unwrap();

    for i in 0..3 {
        dispatcher
            .run_on_main_thread(
                move |rt| {
                    rt.evaluate(&format!("log.push({i});")).unwrap();
                },
                true,
            )
            .unwrap();
    }

    // Queued, not run yet.
    assert_eq!(rt.eval_number("log.length").unwrap(), 0.0);

    assert_eq!(rt.run_pending_tasks(), 3);
    assert_eq!(rt.eval_to_string("log.join(',')").unwrap(), "0,1,2");
    assert_eq!(rt.run_pending_tasks(), 0);
}

#[tokio::test]
async fn test_sync_dispatch_from_other_thread() {
    let mut rt = runtime();
    let dispatcher = rt.dispatcher();
    let (tx, rx) = mpsc::channel();

    let worker = thread::spawn(move || {
        assert!(!dispatcher.is_main_thread());

        dispatcher.run_on_main_thread(
            move |rt| {
                let answer = rt.eval_number("globalThis.answer = 6 * 7; answer").unwrap();
                tx.send(answer).unwrap();
            },
            false,
        )
    });

    rt.run_next_task().await;

    assert_eq!(worker.join().unwrap(), Ok(()));
    assert_eq!(rx.recv().unwrap(), 42.0);
    assert_eq!(rt.eval_number("answer").unwrap(), 42.0);
}

#[tokio::test]
async fn test_sync_dispatch_on_owner_thread_refused() {
    let mut rt = runtime();
    let dispatcher = rt.dispatcher();

    assert!(dispatcher.is_main_thread());
    assert_eq!(
        dispatcher.run_on_main_thread(|_| {}, false),
        Err(DispatchError::WouldBlockOwner)
    );

    // Nothing was queued.
    assert_eq!(rt.run_pending_tasks(), 0);
}

#[test]
fn test_dispatch_after_runtime_dropped() {
    let rt = runtime();
    let dispatcher = rt.dispatcher();
    drop(rt);

    assert_eq!(
        dispatcher.run_on_main_thread(|_| {}, true),
        Err(DispatchError::Closed)
    );
}

#[test]
fn test_blocked_caller_released_when_runtime_dropped() {
    let rt = runtime();
    let dispatcher = rt.dispatcher();

    let waiter = thread::spawn(move || dispatcher.run_on_main_thread(|_| {}, false));

    // Either the task is queued and dropped with the runtime, or the post
    // itself fails; both report Closed.
    thread::sleep(Duration::from_millis(50));
    drop(rt);

    assert_eq!(waiter.join().unwrap(), Err(DispatchError::Closed));
}

#[tokio::test]
async fn test_tasks_can_touch_bridge_objects() {
    let mut rt = runtime();
    let dispatcher = rt.dispatcher();

    rt.evaluate("globalThis.counter = new Reference(interop.types.uint32, 1);")
        .unwrap();

    let worker = thread::spawn(move || {
        for _ in 0..5 {
            dispatcher
                .run_on_main_thread(
                    |rt| {
                        rt.evaluate("counter[0] += 1;").unwrap();
                    },
                    true,
                )
                .unwrap();
        }
    });
    worker.join().unwrap();

    for _ in 0..5 {
        rt.run_next_task().await;
    }

    assert_eq!(rt.eval_number("counter[0]").unwrap(), 5.0);
}

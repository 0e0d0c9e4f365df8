mod common;

use bytes::Bytes;
use common::{Call, Event, config, scheduler};
use http::StatusCode;
use polite_lib::{
    ErrorKind, LogListener, RejectReason, SchedulerBuilder, SchedulerConfig, ShardId,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use test_utils::pages_mock_server;
use tokio::task::JoinSet;
use url::Url;

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_shard_is_sequential_and_spaced() {
    let interval = Duration::from_millis(200);
    let (scheduler, transport) = scheduler(config(interval, 10, 10), Duration::from_millis(20));

    scheduler.schedule("http://a.test/1", None, 1).await.unwrap();
    scheduler.schedule("http://a.test/2", None, 2).await.unwrap();
    scheduler.schedule("http://a.test/3", None, 3).await.unwrap();
    assert!(scheduler.wait_for_all(WAIT).await);

    let calls = transport.calls();
    let urls: Vec<_> = calls.iter().map(|call| call.url.as_str()).collect();
    assert_eq!(urls, ["http://a.test/1", "http://a.test/2", "http://a.test/3"]);
    for pair in calls.windows(2) {
        assert!(pair[1].start >= pair[0].end + interval);
    }

    let payloads: Vec<u32> = scheduler
        .listener()
        .events()
        .into_iter()
        .map(|event| match event {
            Event::Success { payload, .. } | Event::Failure { payload, .. } => payload,
        })
        .collect();
    assert_eq!(payloads, [1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_worker_delivers_each_url_once() {
    let (scheduler, transport) = scheduler(config(Duration::ZERO, 1, 2), Duration::from_millis(10));

    for (payload, url) in [(1, "http://a.test/x"), (2, "http://a.test/y"), (3, "http://a.test/z")] {
        scheduler.schedule(url, None, payload).await.unwrap();
    }
    assert!(scheduler.wait_for_all(WAIT).await);

    assert_eq!(transport.calls().len(), 3);
    let delivered: Vec<(String, u32)> = scheduler
        .listener()
        .events()
        .into_iter()
        .map(|event| match event {
            Event::Success { url, payload, .. } => (url, payload),
            Event::Failure { .. } => panic!("unexpected failure: {event:?}"),
        })
        .collect();
    assert_eq!(
        delivered,
        [
            ("http://a.test/x".to_string(), 1),
            ("http://a.test/y".to_string(), 2),
            ("http://a.test/z".to_string(), 3),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_aliases_share_a_worker() {
    let interval = Duration::from_millis(150);
    let (scheduler, transport) = scheduler(config(interval, 10, 10), Duration::ZERO);

    scheduler.schedule("http://a.test/", None, 1).await.unwrap();
    scheduler.schedule("http://alias.test/", None, 2).await.unwrap();
    assert_eq!(scheduler.current_concurrency(), 1);
    assert!(scheduler.wait_for_all(WAIT).await);

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].start >= calls[0].end + interval);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_shards_run_concurrently() {
    let delay = Duration::from_millis(300);
    let (scheduler, transport) = scheduler(config(Duration::from_secs(1), 2, 10), delay);

    scheduler.schedule("http://a.test/", None, 1).await.unwrap();
    scheduler.schedule("http://b.test/", None, 2).await.unwrap();
    assert_eq!(scheduler.current_concurrency(), 2);
    assert!(scheduler.wait_for_all(WAIT).await);

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    let (first, second) = (&calls[0], &calls[1]);
    // The second fetch started before the first one ended
    assert!(second.start < first.end);
    assert_eq!(scheduler.listener().events().len(), 2);
}

#[tokio::test]
async fn test_non_blocking_rejects_when_queue_is_full() {
    let (scheduler, _) = scheduler(config(Duration::ZERO, 10, 1), Duration::from_millis(500));

    // The first task is owned by the new worker, the second fills its queue
    assert!(scheduler.schedule_non_blocking("http://a.test/1", None, 1).await.unwrap());
    assert!(scheduler.schedule_non_blocking("http://a.test/2", None, 2).await.unwrap());
    assert!(!scheduler.schedule_non_blocking("http://a.test/3", None, 3).await.unwrap());

    assert!(scheduler.wait_for_all(WAIT).await);
    assert_eq!(scheduler.listener().events().len(), 2);
}

#[tokio::test]
async fn test_non_blocking_rejects_when_pool_is_saturated() {
    let (scheduler, _) = scheduler(config(Duration::ZERO, 1, 10), Duration::from_millis(300));

    assert!(scheduler.schedule_non_blocking("http://a.test/", None, 1).await.unwrap());
    assert!(!scheduler.schedule_non_blocking("http://b.test/", None, 2).await.unwrap());
    // The existing shard still accepts tasks
    assert!(scheduler.schedule_non_blocking("http://a.test/more", None, 3).await.unwrap());
    assert_eq!(scheduler.current_concurrency(), 1);
}

#[tokio::test]
async fn test_try_admit_reports_reason() {
    let (scheduler, _) = scheduler(config(Duration::ZERO, 1, 10), Duration::from_millis(300));

    let task = scheduler.build_task("http://a.test/", None, 1).await.unwrap();
    scheduler.try_admit(task).unwrap();

    let task = scheduler.build_task("http://b.test/", None, 2).await.unwrap();
    let rejected = scheduler.try_admit(task).unwrap_err();
    assert_eq!(rejected.reason(), RejectReason::PoolSaturated);
    assert_eq!(rejected.into_task().payload(), Some(&2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocking_schedule_waits_for_capacity() {
    let (scheduler, transport) = scheduler(config(Duration::ZERO, 1, 1), Duration::from_millis(50));

    let start = Instant::now();
    for i in 0..4 {
        scheduler
            .schedule(&format!("http://a.test/{i}"), None, i)
            .await
            .unwrap();
    }
    scheduler.schedule("http://b.test/", None, 4).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(scheduler.wait_for_all(WAIT).await);

    let urls: Vec<_> = transport.calls().into_iter().map(|call| call.url).collect();
    assert_eq!(
        urls,
        [
            "http://a.test/0",
            "http://a.test/1",
            "http://a.test/2",
            "http://a.test/3",
            "http://b.test/",
        ]
    );
}

#[tokio::test]
async fn test_schedule_and_wait_returns_body() {
    let (scheduler, _) = scheduler(config(Duration::ZERO, 10, 10), Duration::ZERO);

    let body = scheduler
        .schedule_and_wait("http://a.test/page", None, Duration::from_secs(5))
        .await;
    assert_eq!(body, Some(Bytes::from_static(b"body of /page")));
    // Internal tasks bypass the listener
    assert!(scheduler.listener().events().is_empty());
}

#[tokio::test]
async fn test_schedule_and_wait_fails_fast() {
    let (scheduler, _) = scheduler(config(Duration::ZERO, 10, 10), Duration::ZERO);

    let start = Instant::now();
    let body = scheduler
        .schedule_and_wait("http://a.test/fail", None, Duration::from_secs(30))
        .await;
    assert_eq!(body, None);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_schedule_and_wait_times_out_on_saturated_pool() {
    let (scheduler, _) = scheduler(config(Duration::ZERO, 1, 10), Duration::from_secs(2));
    scheduler.schedule("http://a.test/", None, 1).await.unwrap();

    let start = Instant::now();
    let body = scheduler
        .schedule_and_wait("http://b.test/", None, Duration::ZERO)
        .await;
    assert_eq!(body, None);
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_schedule_and_wait_times_out_on_slow_fetch() {
    let (scheduler, _) = scheduler(config(Duration::ZERO, 10, 10), Duration::from_secs(2));

    let body = scheduler
        .schedule_and_wait("http://a.test/", None, Duration::from_millis(100))
        .await;
    assert_eq!(body, None);
}

#[tokio::test]
async fn test_abandoned_wait_does_not_answer_the_next_one() {
    let (scheduler, transport) = scheduler(config(Duration::ZERO, 10, 10), Duration::from_millis(200));

    for url in ["http://a.test/fail", "http://a.test/page"] {
        let calls = transport.calls().len();
        let first = scheduler
            .schedule_and_wait(url, None, Duration::from_millis(50))
            .await;
        assert_eq!(first, None);
        assert!(scheduler.wait_for_all(WAIT).await);
        assert_eq!(transport.calls().len(), calls + 1);

        // Answered by its own fetch, not by the result the first call left
        let second = scheduler
            .schedule_and_wait(url, None, Duration::from_secs(5))
            .await;
        assert_eq!(transport.calls().len(), calls + 2);
        if url.ends_with("/page") {
            assert_eq!(second, Some(Bytes::from_static(b"body of /page")));
        } else {
            assert_eq!(second, None);
        }
    }
}

#[test]
fn test_admission_after_runtime_shutdown_returns() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let handle = runtime.handle().clone();
    let (scheduler, _) = scheduler(config(Duration::ZERO, 10, 10), Duration::ZERO);
    let task = runtime
        .block_on(scheduler.build_task("http://a.test/", None, 1))
        .unwrap();
    drop(runtime);

    let (sender, receiver) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _guard = handle.enter();
        let admitted = scheduler.try_admit(task).is_ok();
        sender
            .send((admitted, scheduler.current_concurrency()))
            .unwrap();
    });

    let (admitted, workers) = receiver
        .recv_timeout(Duration::from_secs(5))
        .expect("admission did not return");
    assert!(admitted);
    // The worker could not start and removed itself again
    assert_eq!(workers, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_admission() {
    const TASKS: u32 = 600;
    let (scheduler, transport) = scheduler(config(Duration::ZERO, 2, 1), Duration::ZERO);
    let hosts = ["a.test", "b.test", "c.test"];

    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let scheduler = scheduler.clone();
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut peak = 0;
            while !done.load(Ordering::Relaxed) {
                peak = peak.max(scheduler.current_concurrency());
                tokio::task::yield_now().await;
            }
            peak
        })
    };

    let mut calls = JoinSet::new();
    for i in 0..TASKS {
        let scheduler = scheduler.clone();
        let url = format!("http://{}/{i}", hosts[i as usize % hosts.len()]);
        calls.spawn(async move { scheduler.schedule(&url, None, i).await });
    }
    while let Some(result) = calls.join_next().await {
        result.unwrap().unwrap();
    }
    assert!(scheduler.wait_for_all(WAIT).await);
    done.store(true, Ordering::Relaxed);
    assert!(sampler.await.unwrap() <= 2);

    // Every task is delivered exactly once
    let mut payloads: Vec<u32> = scheduler
        .listener()
        .events()
        .into_iter()
        .map(|event| match event {
            Event::Success { payload, .. } | Event::Failure { payload, .. } => payload,
        })
        .collect();
    payloads.sort_unstable();
    assert_eq!(payloads, (0..TASKS).collect::<Vec<_>>());

    // Fetches of one host never overlap, so it never had two workers
    let mut by_host: HashMap<String, Vec<Call>> = HashMap::new();
    for call in transport.calls() {
        let host = Url::parse(&call.url).unwrap().host_str().unwrap().to_string();
        by_host.entry(host).or_default().push(call);
    }
    assert_eq!(by_host.values().map(Vec::len).sum::<usize>(), TASKS as usize);
    for calls in by_host.values_mut() {
        calls.sort_by_key(|call| call.start);
        for pair in calls.windows(2) {
            assert!(pair[1].start >= pair[0].end);
        }
    }
}

#[tokio::test]
async fn test_failures_reach_the_listener() {
    let (scheduler, transport) = scheduler(config(Duration::ZERO, 10, 10), Duration::ZERO);

    scheduler.schedule("http://a.test/fail", None, 1).await.unwrap();
    scheduler.schedule("http://a.test/missing", None, 2).await.unwrap();
    scheduler.schedule("http://b.test/", Some("1.2"), 3).await.unwrap();
    assert!(scheduler.wait_for_all(WAIT).await);

    let mut events = scheduler.listener().events();
    events.sort_by_key(|event| match event {
        Event::Success { payload, .. } | Event::Failure { payload, .. } => *payload,
    });
    assert_eq!(
        events,
        [
            Event::Failure {
                url: "http://a.test/fail".to_string(),
                status: None,
                payload: 1,
            },
            Event::Success {
                url: "http://a.test/missing".to_string(),
                status: StatusCode::NOT_FOUND,
                body: Bytes::from_static(b"body of /missing"),
                payload: 2,
            },
            Event::Failure {
                url: "http://b.test/".to_string(),
                status: None,
                payload: 3,
            },
        ]
    );
    // The task with an unusable address never reached the network
    assert!(transport.calls().iter().all(|call| !call.url.contains("b.test")));
}

#[tokio::test]
async fn test_listener_panic_does_not_stop_worker() {
    let (scheduler, _) = scheduler(config(Duration::ZERO, 10, 10), Duration::ZERO);

    scheduler.schedule("http://a.test/panic", None, 1).await.unwrap();
    scheduler.schedule("http://a.test/after", None, 2).await.unwrap();
    assert!(scheduler.wait_for_all(WAIT).await);

    assert_eq!(scheduler.listener().events().len(), 2);
    assert_eq!(scheduler.current_concurrency(), 0);
}

#[tokio::test]
async fn test_malformed_url_is_rejected() {
    let (scheduler, transport) = scheduler(config(Duration::ZERO, 10, 10), Duration::ZERO);

    let err = scheduler.schedule("not a url", None, 1).await.unwrap_err();
    assert!(matches!(err, ErrorKind::ParseUrl(..)));
    let err = scheduler
        .schedule("http://unknown.test/", None, 2)
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::NoAddressFound("unknown.test".to_string()));

    assert_eq!(scheduler.current_concurrency(), 0);
    assert!(transport.calls().is_empty());
    assert_eq!(
        scheduler
            .schedule_and_wait("not a url", None, Duration::from_secs(1))
            .await,
        None
    );
}

#[tokio::test]
async fn test_drained_workers_are_removed() {
    let (scheduler, _) = scheduler(config(Duration::from_millis(10), 10, 10), Duration::ZERO);

    scheduler.schedule("http://a.test/", None, 1).await.unwrap();
    scheduler.schedule("http://b.test/", None, 2).await.unwrap();
    scheduler.schedule("http://c.test/", None, 3).await.unwrap();
    assert!(scheduler.wait_for_all(WAIT).await);

    assert_eq!(scheduler.current_concurrency(), 0);
    assert!(scheduler.worker_stats().is_empty());

    // A drained shard gets a fresh worker
    scheduler.schedule("http://a.test/again", None, 4).await.unwrap();
    assert!(scheduler.wait_for_all(WAIT).await);
    assert_eq!(scheduler.listener().events().len(), 4);
}

#[tokio::test]
async fn test_wait_for_all_times_out() {
    let (scheduler, _) = scheduler(config(Duration::ZERO, 10, 10), Duration::from_secs(2));
    scheduler.schedule("http://a.test/", None, 1).await.unwrap();

    assert!(!scheduler.wait_for_all(Some(Duration::from_millis(50))).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_stats() {
    let (scheduler, _) = scheduler(config(Duration::from_millis(300), 10, 10), Duration::ZERO);

    scheduler.schedule("http://a.test/1", None, 1).await.unwrap();
    scheduler.schedule("http://a.test/2", None, 2).await.unwrap();
    scheduler.schedule("http://a.test/3", None, 3).await.unwrap();
    // First fetch done, worker sleeping before the second
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = scheduler.worker_stats();
    assert_eq!(stats.len(), 1);
    let stat = &stats[0];
    assert_eq!(stat.fetched, 1);
    assert_eq!(stat.queued, 2);
    assert_eq!(stat.mean_connect_time, Duration::from_millis(1));
    assert!(stat.lifetime >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_custom_shard_strategy() {
    let (_, transport) = scheduler(SchedulerConfig::default(), Duration::ZERO);
    let scheduler = SchedulerBuilder::builder()
        .listener(common::Recorder::default())
        .config(config(Duration::ZERO, 10, 10))
        .transport(transport.clone())
        .shard_strategy(Arc::new(|_: &Url, _: &str| ShardId::new(7)))
        .build()
        .scheduler()
        .unwrap();

    scheduler.schedule("http://a.test/", None, 1).await.unwrap();
    scheduler.schedule("http://b.test/", None, 2).await.unwrap();
    assert_eq!(scheduler.current_concurrency(), 1);

    let task = scheduler.build_task("http://c.test/", None, 3).await.unwrap();
    assert_eq!(task.shard(), ShardId::new(7));
    assert_eq!(task.address(), "10.0.0.3");
}

#[tokio::test]
async fn test_fetch_over_http() {
    let server = pages_mock_server!(1, ("/first", "one"), ("/second", "two"));
    let config = SchedulerConfig {
        site_interval: Duration::from_millis(50),
        ..SchedulerConfig::default()
    };
    let scheduler = polite_lib::Scheduler::new(config, LogListener).unwrap();

    let first = format!("{}/first", server.uri());
    let second = format!("{}/second", server.uri());
    let timeout = Duration::from_secs(10);
    let (a, b) = tokio::join!(
        scheduler.schedule_and_wait(&first, None, timeout),
        scheduler.schedule_and_wait(&second, Some("127.0.0.1"), timeout),
    );

    assert_eq!(a, Some(Bytes::from_static(b"one")));
    assert_eq!(b, Some(Bytes::from_static(b"two")));
    assert!(scheduler.wait_for_all(WAIT).await);
}

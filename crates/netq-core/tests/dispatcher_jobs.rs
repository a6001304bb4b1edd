//! Jobs through a dispatcher backed by the stub fetcher.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use common::stub_fetcher::StubFetcher;
use common::{wait_until, WAIT};
use netq_core::{
    Dispatcher, DispatcherConfig, Error, FetchError, FormData, JobCompletion, JobStatus, Request,
};

fn dispatcher(capacity: usize, fetcher: &Arc<StubFetcher>) -> Dispatcher {
    Dispatcher::new(
        DispatcherConfig {
            worker_capacity: capacity,
            ..DispatcherConfig::default()
        },
        Arc::clone(fetcher),
    )
}

#[test]
fn download_records_body_and_elapsed_time() {
    let stub = StubFetcher::with_delay(Duration::from_millis(20));
    let d = dispatcher(2, &stub);
    let job = d.download("http://example.test/a").unwrap();
    assert!(job.is_enqueued());
    assert!(job.wait_timeout(WAIT));
    let result = job.result().unwrap();
    assert_eq!(result.status, JobStatus::Succeeded);
    assert_eq!(result.data, b"http://example.test/a");
    assert!(result.elapsed >= Duration::from_millis(20));
    assert!(result.error.is_none());
    assert!(job.is_started());
    d.shutdown();
}

#[test]
fn transport_failure_becomes_failed_result() {
    let stub = StubFetcher::new();
    let d = dispatcher(2, &stub);
    let job = d.download("http://fail.test/").unwrap();
    job.wait();
    let result = job.result().unwrap();
    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.error, Some(FetchError::Http(500)));
    assert!(result.data.is_empty());
    d.shutdown();
}

#[test]
fn panicking_fetch_fails_the_job_and_keeps_the_worker() {
    let stub = StubFetcher::new();
    let d = dispatcher(1, &stub);
    let bad = d.download("http://panic.test/").unwrap();
    bad.wait();
    assert_eq!(bad.result().unwrap().error, Some(FetchError::Panicked));
    let good = d.download("http://example.test/after").unwrap();
    assert!(good.wait_timeout(WAIT));
    assert!(good.result().unwrap().is_success());
    d.shutdown();
}

#[test]
fn form_request_is_posted() {
    let stub = StubFetcher::new();
    let d = dispatcher(1, &stub);
    let form = FormData::new().with("q", "netq queue").with("page", "2");
    let job = d.download(Request::post("http://example.test/search", form)).unwrap();
    job.wait();
    assert_eq!(job.result().unwrap().data, b"q=netq+queue&page=2");
    d.shutdown();
}

#[test]
fn canceling_a_pending_job_completes_it_immediately() {
    let stub = StubFetcher::held();
    let d = dispatcher(1, &stub);
    let running = d.download("http://example.test/running").unwrap();
    wait_until("first transfer", || stub.in_flight() == 1);

    let pending = d.download("http://example.test/pending").unwrap();
    assert_eq!(d.pending(), 1);
    pending.cancel();
    assert!(pending.is_completed());
    assert!(pending.is_canceled());
    assert!(!pending.is_started());
    assert_eq!(pending.result().unwrap().status, JobStatus::Canceled);
    assert_eq!(d.pending(), 0);

    stub.release();
    assert!(running.wait_timeout(WAIT));
    assert_eq!(stub.calls(), vec!["http://example.test/running".to_string()]);
    d.shutdown();
}

#[test]
fn canceling_an_in_flight_job_lets_the_transfer_finish() {
    let stub = StubFetcher::held();
    let d = dispatcher(1, &stub);
    let job = d.download("http://example.test/busy").unwrap();
    wait_until("transfer in flight", || stub.in_flight() == 1);

    job.cancel();
    assert!(job.is_canceled());
    assert!(!job.is_completed());

    stub.release();
    assert!(job.wait_timeout(WAIT));
    assert_eq!(job.result().unwrap().status, JobStatus::Succeeded);
    assert_eq!(stub.calls().len(), 1);
    d.shutdown();
}

#[test]
fn cancel_before_start_is_ignored() {
    let d = dispatcher(1, &StubFetcher::new());
    let job = d.create_job("http://example.test/");
    job.cancel();
    assert!(!job.is_canceled());
    job.start().unwrap();
    assert!(job.wait_timeout(WAIT));
    assert!(job.result().unwrap().is_success());
    d.shutdown();
}

#[test]
fn concurrent_transfers_never_exceed_capacity() {
    let stub = StubFetcher::with_delay(Duration::from_millis(15));
    let d = dispatcher(3, &stub);
    let jobs: Vec<_> = (0..24)
        .map(|i| d.download(format!("http://example.test/{}", i)).unwrap())
        .collect();
    for job in &jobs {
        assert!(job.wait_timeout(WAIT));
    }
    assert!(stub.max_in_flight() <= 3, "max in flight {}", stub.max_in_flight());
    assert!(stub.max_in_flight() >= 1);
    assert_eq!(stub.calls().len(), 24);
    wait_until("workers to retire", || d.live_workers() == 0);
    d.shutdown();
}

#[test]
fn jobs_run_in_submission_order_on_one_worker() {
    let stub = StubFetcher::new();
    let d = dispatcher(1, &stub);
    let jobs: Vec<_> = (0..40)
        .map(|i| d.download(format!("http://example.test/{}", i)).unwrap())
        .collect();
    for job in &jobs {
        job.wait();
    }
    let expected: Vec<String> = (0..40).map(|i| format!("http://example.test/{}", i)).collect();
    assert_eq!(stub.calls(), expected);
    d.shutdown();
}

#[test]
fn shutdown_finishes_current_job_and_cancels_the_rest() {
    let stub = StubFetcher::held();
    let d = dispatcher(1, &stub);
    let running = d.download("http://example.test/running").unwrap();
    wait_until("first transfer", || stub.in_flight() == 1);
    let queued: Vec<_> = (0..3)
        .map(|i| d.download(format!("http://example.test/q{}", i)).unwrap())
        .collect();

    let closer = {
        let d = d.clone();
        thread::spawn(move || d.shutdown())
    };
    wait_until("draining", || d.is_shut_down());
    stub.release();
    closer.join().unwrap();

    assert_eq!(running.result().unwrap().status, JobStatus::Succeeded);
    for job in &queued {
        assert_eq!(job.result().unwrap().status, JobStatus::Canceled);
    }
    assert_eq!(d.pending(), 0);
    assert_eq!(d.live_workers(), 0);
    assert_eq!(stub.calls().len(), 1);

    assert_eq!(
        d.download("http://example.test/late").unwrap_err(),
        Error::DispatcherShutDown
    );
    d.shutdown();
}

#[test]
fn dispatchers_are_independent() {
    let stub_a = StubFetcher::new();
    let stub_b = StubFetcher::new();
    let a = dispatcher(1, &stub_a);
    let b = dispatcher(1, &stub_b);
    a.shutdown();
    let job = b.download("http://example.test/b").unwrap();
    assert!(job.wait_timeout(WAIT));
    assert!(stub_a.calls().is_empty());
    assert_eq!(stub_b.calls().len(), 1);
    b.shutdown();
}

#[test]
fn many_threads_can_wait_on_one_job() {
    let stub = StubFetcher::held();
    let d = dispatcher(1, &stub);
    let job = d.download("http://example.test/").unwrap();
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let job = job.clone();
            thread::spawn(move || job.wait_timeout(WAIT))
        })
        .collect();
    thread::sleep(Duration::from_millis(20));
    stub.release();
    for w in waiters {
        assert!(w.join().unwrap());
    }
    d.shutdown();
}

#[test]
fn job_events_see_the_recorded_result() {
    let stub = StubFetcher::new();
    let d = dispatcher(1, &stub);
    let job = d.create_job("http://example.test/events");
    let started = Arc::new(AtomicUsize::new(0));
    {
        let started = Arc::clone(&started);
        job.on_started(move |_| {
            started.fetch_add(1, Ordering::SeqCst);
        });
    }
    let (tx, rx) = mpsc::channel();
    job.on_completed(move |c: JobCompletion| {
        let recorded = c.job.result().map(|r| r.status);
        tx.send((recorded, c.result.status)).unwrap();
    });
    let dropped = job.on_completed(|_| panic!("unsubscribed handler ran"));
    assert!(job.unsubscribe(dropped));

    job.start().unwrap();
    let (recorded, delivered) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(recorded, Some(JobStatus::Succeeded));
    assert_eq!(delivered, JobStatus::Succeeded);
    wait_until("started event", || started.load(Ordering::SeqCst) == 1);
    d.shutdown();
}

#[test]
fn start_twice_submits_once() {
    let stub = StubFetcher::new();
    let d = dispatcher(1, &stub);
    let job = d.create_job("http://example.test/once");
    job.start().unwrap();
    job.start().unwrap();
    job.wait();
    d.shutdown();
    assert_eq!(stub.calls().len(), 1);
}

#[test]
fn manual_start_when_auto_start_is_off() {
    let stub = StubFetcher::new();
    let d = Dispatcher::new(
        DispatcherConfig {
            auto_start: false,
            ..DispatcherConfig::default()
        },
        Arc::clone(&stub),
    );
    let job = d.download("http://example.test/").unwrap();
    assert!(!job.is_enqueued());
    assert!(!job.wait_timeout(Duration::from_millis(20)));
    job.start().unwrap();
    assert!(job.wait_timeout(WAIT));
    d.shutdown();
}

#[test]
fn dropping_the_last_handle_still_settles_a_job() {
    let stub = StubFetcher::new();
    for _ in 0..20 {
        let job = {
            let d = dispatcher(1, &stub);
            d.download("http://example.test/orphan").unwrap()
        };
        assert!(job.wait_timeout(WAIT), "job stranded after dispatcher drop");
        let status = job.result().unwrap().status;
        assert!(
            matches!(status, JobStatus::Succeeded | JobStatus::Canceled),
            "unexpected status {:?}",
            status
        );
    }
}

#[test]
fn dropping_the_last_handle_still_fires_a_group() {
    let stub = StubFetcher::new();
    let group = {
        let d = dispatcher(2, &stub);
        d.download_many((0..8).map(|i| format!("http://example.test/{}", i)))
            .unwrap()
    };
    assert!(group.wait_timeout(WAIT), "group never fired after dispatcher drop");
    assert!(group.jobs().iter().all(|j| j.is_completed()));
}

#[derive(Debug, PartialEq)]
struct Origin {
    page: u32,
}

#[test]
fn tag_travels_with_the_job() {
    let stub = StubFetcher::new();
    let d = dispatcher(1, &stub);
    let (tx, rx) = mpsc::channel();
    let job = d.create_job_tagged("http://example.test/tagged", Origin { page: 3 });
    job.on_completed(move |c: JobCompletion| {
        tx.send(c.job.tag_as::<Origin>().map(|o| o.page)).unwrap();
    });
    job.start().unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Some(3));
    assert!(job.tag_as::<String>().is_none());

    let plain = d.download_tagged("http://example.test/plain", "label").unwrap();
    plain.wait();
    assert_eq!(plain.tag_as::<&str>().as_deref(), Some(&"label"));
    assert!(plain.clear_tag().is_some());
    assert!(plain.tag().is_none());
    d.shutdown();
}

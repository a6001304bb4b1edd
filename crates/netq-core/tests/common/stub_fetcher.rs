//! In-process `Fetch` stub with an optional delay, a gate that holds
//! transfers, and in-flight accounting.
//!
//! Responses: URLs starting with `http://fail` fail with HTTP 500, URLs
//! starting with `http://panic` panic, anything else returns the form's
//! query string if a form was sent, otherwise the URL itself.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use netq_core::{Fetch, FetchError, FormData};

#[derive(Default)]
pub struct StubFetcher {
    delay: Duration,
    held: Mutex<bool>,
    released: Condvar,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// A stub whose transfers block until `release` is called.
    pub fn held() -> Arc<Self> {
        Arc::new(Self {
            held: Mutex::new(true),
            ..Self::default()
        })
    }

    pub fn release(&self) {
        *self.held.lock().unwrap() = false;
        self.released.notify_all();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// URLs passed to `fetch`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn wait_released(&self) {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.released.wait(held).unwrap();
        }
    }
}

impl Fetch for StubFetcher {
    fn fetch(
        &self,
        url: &str,
        form: Option<&FormData>,
        _timeout: Duration,
    ) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.wait_released();
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if url.starts_with("http://panic") {
            panic!("stub fetcher asked to panic");
        }
        if url.starts_with("http://fail") {
            return Err(FetchError::Http(500));
        }
        Ok(match form {
            Some(form) => form.to_query_string().into_bytes(),
            None => url.as_bytes().to_vec(),
        })
    }
}

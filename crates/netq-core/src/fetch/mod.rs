//! The network transfer capability workers call for each job.
//!
//! The dispatcher accepts any `Fetch` so tests can inject stubs; the
//! production implementation is `CurlFetcher`.

mod http;

pub use http::CurlFetcher;

use std::time::Duration;

use crate::error::FetchError;
use crate::job::FormData;

/// One blocking transfer. Called from worker threads, so implementations
/// must be shareable. A form means POST with a URL-encoded body, no form
/// means GET. No partial bodies: either the whole response or an error.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str, form: Option<&FormData>, timeout: Duration)
        -> Result<Vec<u8>, FetchError>;
}

impl<F: Fetch + ?Sized> Fetch for std::sync::Arc<F> {
    fn fetch(
        &self,
        url: &str,
        form: Option<&FormData>,
        timeout: Duration,
    ) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(url, form, timeout)
    }
}

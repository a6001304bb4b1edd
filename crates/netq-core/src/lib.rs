pub mod config;
pub mod logging;

pub mod dispatcher;
pub mod error;
pub mod fetch;
pub mod group;
pub mod job;
pub mod notify;
pub mod queue;
pub mod tag;

mod sync;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{Error, FetchError, Result};
pub use fetch::{CurlFetcher, Fetch};
pub use group::JobGroup;
pub use job::{FormData, Job, JobCompletion, JobResult, JobStatus, Request};
pub use notify::SubscriptionId;
pub use queue::{QueueChange, SegmentedQueue};
pub use tag::Tag;

//! libcurl-backed fetcher.

use std::time::Duration;

use curl::easy::{Easy, List};

use super::Fetch;
use crate::config::NetqConfig;
use crate::error::FetchError;
use crate::job::FormData;

/// Blocking HTTP client: one fresh easy handle per transfer, redirects
/// followed, non-2xx treated as failure.
#[derive(Debug, Clone)]
pub struct CurlFetcher {
    user_agent: String,
    connect_timeout: Duration,
    proxy: Option<String>,
}

impl CurlFetcher {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            connect_timeout: Duration::from_secs(10),
            proxy: None,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Route transfers through `proxy` (any URL libcurl accepts).
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn from_config(cfg: &NetqConfig) -> Self {
        let fetcher = Self::new(cfg.user_agent.clone())
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs));
        match &cfg.proxy {
            Some(proxy) => fetcher.proxy(proxy.clone()),
            None => fetcher,
        }
    }

    fn prepare(
        &self,
        easy: &mut Easy,
        url: &str,
        form: Option<&FormData>,
        timeout: Duration,
    ) -> Result<(), curl::Error> {
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.useragent(&self.user_agent)?;
        easy.connect_timeout(self.connect_timeout)?;
        easy.timeout(timeout)?;
        match &self.proxy {
            Some(proxy) => easy.proxy(proxy)?,
            // Ignore proxy environment variables too.
            None => easy.noproxy("*")?,
        }
        if let Some(form) = form {
            let body = form.to_query_string();
            let mut headers = List::new();
            headers.append("Content-Type: application/x-www-form-urlencoded")?;
            easy.http_headers(headers)?;
            easy.post(true)?;
            easy.post_fields_copy(body.as_bytes())?;
        }
        Ok(())
    }
}

impl Default for CurlFetcher {
    fn default() -> Self {
        Self::from_config(&NetqConfig::default())
    }
}

impl Fetch for CurlFetcher {
    fn fetch(
        &self,
        url: &str,
        form: Option<&FormData>,
        timeout: Duration,
    ) -> Result<Vec<u8>, FetchError> {
        let mut body = Vec::new();
        let mut easy = Easy::new();
        self.prepare(&mut easy, url, form, timeout)?;
        {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.perform()?;
        }

        let code = easy.response_code()?;
        if !(200..300).contains(&code) {
            return Err(FetchError::Http(code));
        }
        Ok(body)
    }
}

impl From<curl::Error> for FetchError {
    fn from(e: curl::Error) -> Self {
        if e.is_operation_timedout() {
            return FetchError::Timeout;
        }
        if e.is_couldnt_connect()
            || e.is_couldnt_resolve_host()
            || e.is_couldnt_resolve_proxy()
            || e.is_read_error()
            || e.is_recv_error()
            || e.is_send_error()
            || e.is_got_nothing()
        {
            return FetchError::Connection(e.to_string());
        }
        FetchError::Transport(e.to_string())
    }
}

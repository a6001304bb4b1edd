//! Fetch target: URL plus optional form payload.

use std::fmt;

use crate::error::{Error, Result};

/// Ordered form fields. Sent URL-encoded as a POST body, or appended to a
/// URL for GET-style composition via `to_query_string`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    pairs: Vec<(String, String)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a flat `[key, value, key, value, ...]` list.
    pub fn from_flat<S: AsRef<str>>(values: &[S]) -> Result<Self> {
        if values.len() % 2 != 0 {
            return Err(Error::OddFormValues(values.len()));
        }
        Ok(values
            .chunks(2)
            .map(|kv| (kv[0].as_ref(), kv[1].as_ref()))
            .collect())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `application/x-www-form-urlencoded` rendering, e.g. `q=a+b&page=2`.
    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Display for FormData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FormData {{")?;
        for (k, v) in &self.pairs {
            writeln!(f, "    {} = {}", k, v)?;
        }
        write!(f, "}}")
    }
}

/// What a job fetches. A request with a form is sent as POST, otherwise GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    url: String,
    form: Option<FormData>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            form: None,
        }
    }

    pub fn post(url: impl Into<String>, form: FormData) -> Self {
        Self {
            url: url.into(),
            form: Some(form),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn form(&self) -> Option<&FormData> {
        self.form.as_ref()
    }
}

impl From<&str> for Request {
    fn from(url: &str) -> Self {
        Self::get(url)
    }
}

impl From<String> for Request {
    fn from(url: String) -> Self {
        Self::get(url)
    }
}

impl From<(String, FormData)> for Request {
    fn from((url, form): (String, FormData)) -> Self {
        Self::post(url, form)
    }
}

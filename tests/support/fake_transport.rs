//! Scripted in-memory [`HttpTransport`].
//!
//! Each `open` pops the next [`Step`]; an empty script serves normally.
//! Hosts listed with [`FakeTransport::with_unresolvable_host`] fail every
//! request with a name-resolution error.

use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, DuplexStream};
use transfer_core::download::{BodyReader, OpenedStream, ResponseMeta};
use transfer_core::{DownloadError, HttpTransport};
use url::Url;

/// Behavior of one `open` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Honor the range and send the rest of the resource.
    Serve,
    /// Honor the range but cut the body after this many bytes.
    Truncate(usize),
    /// Ignore the range and send the whole resource with 200.
    IgnoreRange,
    /// Send this many bytes, then stall without closing.
    Stall(usize),
    /// Respond with an HTTP error status.
    Status(u16),
    /// Time out before any response.
    Timeout,
}

/// Request observed by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    /// Metadata probe.
    Probe { url: String },
    /// Body request from `offset`.
    Open { url: String, offset: u64 },
}

#[derive(Debug)]
pub struct FakeTransport {
    body: Vec<u8>,
    report_length: bool,
    disposition: Option<String>,
    unresolvable: HashSet<String>,
    script: Mutex<VecDeque<Step>>,
    seen: Mutex<Vec<Seen>>,
    stalled: Mutex<Vec<DuplexStream>>,
}

impl FakeTransport {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            report_length: true,
            disposition: None,
            unresolvable: HashSet::new(),
            script: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
            stalled: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_script(self, steps: impl IntoIterator<Item = Step>) -> Self {
        lock(&self.script).extend(steps);
        self
    }

    #[must_use]
    pub fn without_length(mut self) -> Self {
        self.report_length = false;
        self
    }

    #[must_use]
    pub fn with_disposition(mut self, value: &str) -> Self {
        self.disposition = Some(value.to_string());
        self
    }

    #[must_use]
    pub fn with_unresolvable_host(mut self, host: &str) -> Self {
        self.unresolvable.insert(host.to_string());
        self
    }

    /// Appends more steps after construction.
    pub fn push_steps(&self, steps: impl IntoIterator<Item = Step>) {
        lock(&self.script).extend(steps);
    }

    pub fn seen(&self) -> Vec<Seen> {
        lock(&self.seen).clone()
    }

    pub fn opens(&self) -> Vec<(String, u64)> {
        self.seen()
            .into_iter()
            .filter_map(|seen| match seen {
                Seen::Open { url, offset } => Some((url, offset)),
                Seen::Probe { .. } => None,
            })
            .collect()
    }

    pub fn probe_count(&self) -> usize {
        self.seen()
            .iter()
            .filter(|seen| matches!(seen, Seen::Probe { .. }))
            .count()
    }

    pub fn clear_seen(&self) {
        lock(&self.seen).clear();
    }

    fn len(&self) -> u64 {
        self.body.len() as u64
    }

    fn check_host(&self, url: &Url) -> Result<(), DownloadError> {
        match url.host_str() {
            Some(host) if self.unresolvable.contains(host) => {
                Err(DownloadError::name_resolution(url.as_str()))
            }
            _ => Ok(()),
        }
    }

    fn meta(&self, remaining: u64, range_total: Option<u64>) -> ResponseMeta {
        ResponseMeta {
            content_length: self.report_length.then_some(remaining),
            content_disposition: self.disposition.clone(),
            range_total: if self.report_length { range_total } else { None },
        }
    }

    fn opened(&self, start: u64, body: BodyReader, range_total: Option<u64>) -> OpenedStream {
        OpenedStream {
            meta: self.meta(self.len() - start, range_total),
            start_offset: start,
            body,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[allow(clippy::cast_possible_truncation)]
#[async_trait]
impl HttpTransport for FakeTransport {
    async fn probe(&self, url: &Url) -> Result<ResponseMeta, DownloadError> {
        lock(&self.seen).push(Seen::Probe {
            url: url.to_string(),
        });
        self.check_host(url)?;
        Ok(self.meta(self.len(), None))
    }

    async fn open(&self, url: &Url, offset: u64) -> Result<OpenedStream, DownloadError> {
        lock(&self.seen).push(Seen::Open {
            url: url.to_string(),
            offset,
        });
        self.check_host(url)?;

        let step = lock(&self.script).pop_front().unwrap_or(Step::Serve);
        if offset > 0 && offset >= self.len() && step != Step::IgnoreRange {
            return Err(DownloadError::http_status(url.as_str(), 416));
        }
        let range_total = (offset > 0).then_some(self.len());
        let rest = &self.body[(offset as usize).min(self.body.len())..];

        match step {
            Step::Serve => Ok(self.opened(offset, Box::new(Cursor::new(rest.to_vec())), range_total)),
            Step::Truncate(n) => {
                let cut = rest[..n.min(rest.len())].to_vec();
                Ok(self.opened(offset, Box::new(Cursor::new(cut)), range_total))
            }
            Step::IgnoreRange => Ok(self.opened(0, Box::new(Cursor::new(self.body.clone())), None)),
            Step::Stall(n) => {
                let (mut writer, reader) = tokio::io::duplex(self.body.len().max(1));
                writer
                    .write_all(&rest[..n.min(rest.len())])
                    .await
                    .map_err(|e| DownloadError::stream(url.as_str(), e))?;
                lock(&self.stalled).push(writer);
                Ok(self.opened(offset, Box::new(reader), range_total))
            }
            Step::Status(status) => Err(DownloadError::http_status(url.as_str(), status)),
            Step::Timeout => Err(DownloadError::timeout(url.as_str())),
        }
    }
}

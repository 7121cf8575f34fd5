//! Scripted transport and containers shared by the processor tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use processor::Transport;
use test_utils::{grib2_container, Grib2Builder};
use tokio_util::sync::CancellationToken;

/// How a mirror answers.
#[derive(Clone)]
pub enum Reply {
    Serve(Bytes),
    Fail(&'static str),
    Empty,
    /// Serves after a delay.
    Slow(Bytes, Duration),
    /// Writes a few bytes, then never finishes.
    Hang,
}

/// Answers by the first rule whose key occurs in the URL; unmatched URLs
/// are a 404. Every call is logged, and concurrent downloads are counted.
pub struct ScriptedTransport {
    rules: Vec<(&'static str, Reply)>,
    downloads: Mutex<Vec<String>>,
    probes: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    pub fn new(rules: Vec<(&'static str, Reply)>) -> Self {
        Self {
            rules,
            downloads: Mutex::new(Vec::new()),
            probes: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Most downloads seen running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.downloads.lock().unwrap().len() + self.probes.lock().unwrap().len()
    }

    fn reply(&self, url: &str) -> Option<Reply> {
        self.rules
            .iter()
            .find(|(key, _)| url.contains(key))
            .map(|(_, reply)| reply.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn download(&self, url: &str, dest: &Path, cancel: &CancellationToken) -> anyhow::Result<u64> {
        self.downloads.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        match self.reply(url) {
            Some(Reply::Serve(body)) => {
                tokio::fs::write(dest, &body).await?;
                Ok(body.len() as u64)
            }
            Some(Reply::Fail(status)) => bail!("HTTP error: {}", status),
            Some(Reply::Empty) => {
                tokio::fs::write(dest, b"").await?;
                Ok(0)
            }
            Some(Reply::Slow(body, delay)) => {
                tokio::time::sleep(delay).await;
                tokio::fs::write(dest, &body).await?;
                Ok(body.len() as u64)
            }
            Some(Reply::Hang) => {
                tokio::fs::write(dest, b"GRIB").await?;
                tokio::select! {
                    _ = cancel.cancelled() => bail!("download cancelled"),
                    _ = tokio::time::sleep(Duration::from_secs(3600)) => bail!("unreachable"),
                }
            }
            None => bail!("HTTP error: 404 Not Found"),
        }
    }

    async fn exists(&self, url: &str) -> anyhow::Result<bool> {
        self.probes.lock().unwrap().push(url.to_string());
        Ok(matches!(self.reply(url), Some(Reply::Serve(_))))
    }
}

/// 2 m temperature at 288.15 K plus 10 m winds of 3 and 4 m/s.
pub fn surface_container() -> Bytes {
    Bytes::from(grib2_container(&[
        Grib2Builder::new(),
        Grib2Builder::new()
            .with_parameter(2, 2)
            .with_level(103, 10)
            .with_constant_value(3.0),
        Grib2Builder::new()
            .with_parameter(2, 3)
            .with_level(103, 10)
            .with_constant_value(4.0),
    ]))
}

/// Only the 10 m winds.
pub fn wind_only_container() -> Bytes {
    Bytes::from(grib2_container(&[
        Grib2Builder::new()
            .with_parameter(2, 2)
            .with_level(103, 10)
            .with_constant_value(3.0),
        Grib2Builder::new()
            .with_parameter(2, 3)
            .with_level(103, 10)
            .with_constant_value(4.0),
    ]))
}

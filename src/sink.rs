use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::{debug, warn};

use crate::error::LineError;

/// Receives one event per processed line.
///
/// Implementations must not block the pipeline and must swallow their own
/// failures.
pub trait LineSink {
    fn line_ok(&mut self);
    fn line_failed(&mut self, error: &LineError);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl LineSink for NoopSink {
    fn line_ok(&mut self) {}
    fn line_failed(&mut self, _error: &LineError) {}
}

/// Counts events in memory. Mostly useful in tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountingSink {
    pub ok: u64,
    pub failed: u64,
}

impl LineSink for CountingSink {
    fn line_ok(&mut self) {
        self.ok += 1;
    }

    fn line_failed(&mut self, _error: &LineError) {
        self.failed += 1;
    }
}

/// A missing sink drops every event.
impl<S: LineSink> LineSink for Option<S> {
    fn line_ok(&mut self) {
        if let Some(sink) = self {
            sink.line_ok();
        }
    }

    fn line_failed(&mut self, error: &LineError) {
        if let Some(sink) = self {
            sink.line_failed(error);
        }
    }
}

pub const DEFAULT_STATSD_PREFIX: &str = "clf_summary";

/// Fire-and-forget statsd counters over UDP.
#[derive(Debug)]
pub struct StatsdSink {
    socket: UdpSocket,
    target: SocketAddr,
    prefix: String,
}

impl StatsdSink {
    /// Resolve `endpoint` (`host:port`) and bind a non-blocking local socket.
    pub fn connect(endpoint: &str, prefix: &str) -> std::io::Result<Self> {
        let target = endpoint.to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("no address for {endpoint}"),
            )
        })?;
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            target,
            prefix: prefix.to_string(),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    fn incr(&self, metric: &str) {
        let payload = format!("{}.{}:1|c", self.prefix, metric);
        if let Err(e) = self.socket.send_to(payload.as_bytes(), self.target) {
            debug!(metric, error = %e, "statsd send failed");
        }
    }
}

impl LineSink for StatsdSink {
    fn line_ok(&mut self) {
        self.incr("lines.processed");
        self.incr("lines.ok");
    }

    fn line_failed(&mut self, _error: &LineError) {
        self.incr("lines.processed");
        self.incr("lines.failed");
    }
}

/// Build a statsd sink, or `None` with a warning when the endpoint is unusable.
pub fn statsd_sink(endpoint: &str) -> Option<StatsdSink> {
    match StatsdSink::connect(endpoint, DEFAULT_STATSD_PREFIX) {
        Ok(sink) => Some(sink),
        Err(e) => {
            warn!(endpoint, error = %e, "statsd endpoint unusable, continuing without metrics");
            None
        }
    }
}

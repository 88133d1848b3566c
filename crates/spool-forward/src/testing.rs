//! Scripted transport for unit tests.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

use crate::sender::Connect;

/// What the stream does on its next `poll_write`.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Accept at most this many bytes.
    Accept(usize),
    Fail(io::ErrorKind),
    /// Never complete.
    Stall,
}

/// What the connector does on its next dial.
#[derive(Debug, Clone)]
pub enum Dial {
    Refuse,
    Stream(Vec<Step>),
}

#[derive(Default)]
struct Script {
    dials: VecDeque<Dial>,
    refuse_when_empty: bool,
    attempts: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
    received: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedConnector {
    pub fn new(dials: impl IntoIterator<Item = Dial>) -> Self {
        let connector = Self::default();
        connector.script.lock().unwrap().dials = dials.into_iter().collect();
        connector
    }

    /// A destination that never accepts a connection.
    pub fn unreachable() -> Self {
        let connector = Self::default();
        connector.script.lock().unwrap().refuse_when_empty = true;
        connector
    }

    pub fn attempts(&self) -> usize {
        self.script.lock().unwrap().attempts
    }

    /// Every byte accepted by any stream this connector handed out.
    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }
}

impl Connect for ScriptedConnector {
    type Stream = ScriptedStream;

    async fn connect(&self, _address: &str) -> io::Result<ScriptedStream> {
        let dial = {
            let mut script = self.script.lock().unwrap();
            script.attempts += 1;
            match script.dials.pop_front() {
                Some(dial) => dial,
                None if script.refuse_when_empty => Dial::Refuse,
                None => Dial::Stream(Vec::new()),
            }
        };
        match dial {
            Dial::Refuse => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            Dial::Stream(steps) => Ok(ScriptedStream {
                steps: steps.into(),
                received: self.received.clone(),
            }),
        }
    }
}

pub struct ScriptedStream {
    steps: VecDeque<Step>,
    received: Arc<Mutex<Vec<u8>>>,
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.steps.pop_front().unwrap_or(Step::Accept(usize::MAX)) {
            Step::Accept(max) => {
                let n = buf.len().min(max);
                self.received.lock().unwrap().extend_from_slice(&buf[..n]);
                Poll::Ready(Ok(n))
            }
            Step::Fail(kind) => Poll::Ready(Err(io::Error::from(kind))),
            Step::Stall => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Wraps [`ScriptedConnector`] with a stream that is `Send` but not `Sync`.
#[derive(Clone, Default)]
pub struct UnsyncConnector(pub ScriptedConnector);

impl Connect for UnsyncConnector {
    type Stream = UnsyncStream;

    async fn connect(&self, address: &str) -> io::Result<UnsyncStream> {
        let inner = self.0.connect(address).await?;
        Ok(UnsyncStream {
            inner,
            writes: Cell::new(0),
        })
    }
}

pub struct UnsyncStream {
    inner: ScriptedStream,
    writes: Cell<usize>,
}

impl AsyncWrite for UnsyncStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.writes.set(self.writes.get() + 1);
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

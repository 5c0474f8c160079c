use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::api::{BuildStarted, StatusUpdate};
use crate::error::{Error, Result};

/// One message on the `/build` response stream, in wire order.
#[derive(Debug)]
pub enum StatusFrame {
    Started(BuildStarted),
    Update(StatusUpdate),
}

/// Producer half of a build's status stream.
///
/// The coordinator writes frames; the HTTP response task drains the paired
/// receiver and serializes each frame as one newline-terminated JSON line.
/// `started` must be called exactly once and is always the first frame.
/// The channel is closed exactly once, when both the started flag and a
/// terminal update have been recorded; `updated` on a closed writer fails.
///
/// Cloning shares the underlying stream, so the build session and the HTTP
/// handler observe the same close.
#[derive(Clone)]
pub struct StatusWriter {
    inner: Arc<WriterInner>,
}

struct WriterInner {
    tx: Mutex<Option<mpsc::Sender<StatusFrame>>>,
    started: AtomicBool,
    finished: AtomicBool,
}

impl StatusWriter {
    /// Create a writer and the receiver its frames are drained from.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StatusFrame>) {
        let (tx, rx) = mpsc::channel(buffer);
        let writer = StatusWriter {
            inner: Arc::new(WriterInner {
                tx: Mutex::new(Some(tx)),
                started: AtomicBool::new(false),
                finished: AtomicBool::new(false),
            }),
        };
        (writer, rx)
    }

    pub fn has_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub async fn started(&self, started: BuildStarted) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Internal("status writer started twice".into()));
        }
        let tx = self.sender()?;
        tx.send(StatusFrame::Started(started))
            .await
            .map_err(|_| Error::Cancelled)?;
        self.maybe_close();
        Ok(())
    }

    pub async fn updated(&self, update: StatusUpdate) -> Result<()> {
        let tx = self.sender()?;
        let terminal = update.is_terminal();
        tx.send(StatusFrame::Update(update))
            .await
            .map_err(|_| Error::Cancelled)?;
        if terminal {
            self.inner.finished.store(true, Ordering::SeqCst);
        }
        self.maybe_close();
        Ok(())
    }

    fn sender(&self) -> Result<mpsc::Sender<StatusFrame>> {
        self.inner
            .tx
            .lock()
            .clone()
            .ok_or_else(|| Error::Internal("status writer is closed".into()))
    }

    fn maybe_close(&self) {
        if self.inner.started.load(Ordering::SeqCst) && self.inner.finished.load(Ordering::SeqCst)
        {
            self.inner.tx.lock().take();
        }
    }
}

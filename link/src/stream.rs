//! Asynchronous row stream over a paginated query.
//!
//! A background task drives [`QueryHandle::advance`] and pushes decoded rows
//! into a bounded channel; the consumer pulls them through [`RowStream`]. A
//! full channel stalls the fetch task, which caps memory at the configured
//! buffer size. Errors travel through the channel behind the rows that were
//! queued before them.

use crate::error::Result;
use crate::heartbeat::LivenessMonitor;
use crate::models::SchemaField;
use crate::query::{QueryCloser, QueryHandle};
use crate::types::Row;
use futures_util::Stream;
use log::{debug, warn};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Forward-only stream of the rows of one query, across all its pages.
///
/// Not restartable. Closing (or dropping) the stream stops the fetch task,
/// stops the heartbeat and releases the query server-side.
///
/// # Example
///
/// ```rust,no_run
/// use quarry_link::QuarryLinkClient;
///
/// # async fn example() -> quarry_link::Result<()> {
/// let client = QuarryLinkClient::builder()
///     .base_url("http://localhost:8000")
///     .build()?;
///
/// let mut rows = client.query_rows("SELECT number FROM numbers(3)").await?;
/// while let Some(row) = rows.next_row().await {
///     println!("{}", row?[0]);
/// }
/// rows.close().await;
/// # Ok(())
/// # }
/// ```
pub struct RowStream {
    rx: mpsc::Receiver<Result<Row>>,
    closer: QueryCloser,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    monitor: Option<LivenessMonitor>,
    schema: Vec<SchemaField>,
    query_id: String,
    cancelled: bool,
}

impl RowStream {
    /// Start draining `handle` into a channel of `capacity` rows.
    pub(crate) fn spawn(
        handle: QueryHandle,
        capacity: usize,
        monitor: Option<LivenessMonitor>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closer = handle.closer();
        let cancel = handle.cancel_token().clone();
        let schema = handle.schema().to_vec();
        let query_id = handle.query_id().to_string();
        let task = tokio::spawn(fetch_pages(handle, tx));

        Self {
            rx,
            closer,
            cancel,
            task: Some(task),
            monitor,
            schema,
            query_id,
            cancelled: false,
        }
    }

    /// Schema of the first page.
    pub fn schema(&self) -> &[SchemaField] {
        &self.schema
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Heartbeat of this query, when the server supports it.
    pub fn liveness(&self) -> Option<&LivenessMonitor> {
        self.monitor.as_ref()
    }

    /// Next row, or `None` at the end of the result or after [`close`](Self::close).
    ///
    /// A fetch or decode failure is yielded once, after every row queued
    /// before it, and ends the stream.
    pub async fn next_row(&mut self) -> Option<Result<Row>> {
        if self.cancelled {
            return None;
        }
        self.rx.recv().await
    }

    /// Collect every remaining row.
    pub async fn collect_rows(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Cancel the stream and release the query. Idempotent.
    ///
    /// Rows still queued are discarded.
    pub async fn close(&mut self) {
        if self.cancelled {
            return;
        }
        self.shutdown();
        self.closer.close().await;

        let mut discarded = 0usize;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        debug!(
            "[LINK_STREAM] Closed stream of query {} ({} queued row(s) discarded)",
            self.query_id, discarded
        );
    }

    fn shutdown(&mut self) {
        self.cancelled = true;
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.stop();
        }
        self.rx.close();
    }
}

impl Stream for RowStream {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        if self.cancelled {
            return;
        }
        self.shutdown();
        if self.closer.is_finished() {
            return;
        }
        let closer = self.closer.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    closer.close().await;
                });
            },
            Err(_) => warn!(
                "[LINK_STREAM] Stream of query {} dropped outside a runtime; query not released",
                self.query_id
            ),
        }
    }
}

/// Fetch loop: rows of the current page, then advance while pages remain.
async fn fetch_pages(mut handle: QueryHandle, tx: mpsc::Sender<Result<Row>>) {
    let query_id = handle.query_id().to_string();
    let mut pages = 0usize;
    let mut total = 0usize;

    loop {
        let rows = match handle.rows() {
            Ok(rows) => rows,
            Err(e) => {
                warn!("[LINK_STREAM] Decoding page of query {} failed: {}", query_id, e);
                handle.close().await;
                let _ = tx.send(Err(e)).await;
                return;
            },
        };
        pages += 1;
        total += rows.len();
        for row in rows {
            if tx.send(Ok(row)).await.is_err() {
                debug!("[LINK_STREAM] Consumer of query {} went away", query_id);
                return;
            }
        }

        if !handle.has_pending() {
            break;
        }
        match handle.advance().await {
            Ok(true) => {},
            Ok(false) => break,
            // advance already marked the query finished
            Err(e) => {
                warn!("[LINK_STREAM] Fetching next page of query {} failed: {}", query_id, e);
                let _ = tx.send(Err(e)).await;
                return;
            },
        }
    }

    debug!(
        "[LINK_STREAM] Query {} drained: {} page(s), {} row(s)",
        query_id, pages, total
    );
}

//! Paginated reads of one source id.
//!
//! [`walk`] reads pages oldest-first, hands each non-empty page to a
//! continuation callback, and moves its cursor past the newest envelope seen.
//! Empty pages are expected while the store is still ingesting: each one costs
//! one unit of the [`Backoff`] budget and a wait of `next(attempt)`. A page
//! with data resets the budget.
//!
//! A walk ends when:
//!
//! | Stop | Condition | Result |
//! |------|-----------|--------|
//! | [`WalkStop::Satisfied`] | the callback returned `false` | `Ok` |
//! | [`WalkStop::BackoffExhausted`] | an empty page with the budget spent | `Ok` |
//! | [`WalkStop::WindowExhausted`] | the cursor moved past the window end | `Ok` |
//! | | a read failed | `Err(Transport)` |
//! | | the overall deadline passed | `Err(Timeout)` |

mod backoff;

pub use backoff::{Backoff, ExponentialBackoff, Jittered, NoRetry, RetryBackoff};

use crate::Result;
use crate::client::{PageReader, ReadOptions};
use crate::deadline::{Deadline, run_within, sleep_within};
use crate::models::{Envelope, EnvelopeType, TimeWindow};
use std::fmt;
use std::time::Duration;
use tracing::Instrument;

/// Why a walk stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStop {
    /// The continuation callback asked to stop.
    Satisfied,
    /// The retry budget ran out on an empty page.
    BackoffExhausted,
    /// Every envelope in the window has been read.
    WindowExhausted,
}

impl WalkStop {
    /// Returns the stop reason as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Satisfied => "satisfied",
            Self::BackoffExhausted => "backoff_exhausted",
            Self::WindowExhausted => "window_exhausted",
        }
    }
}

impl fmt::Display for WalkStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a walk accumulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkResult {
    /// Envelopes from every non-empty page, in read order.
    pub envelopes: Vec<Envelope>,
    /// Pages read, empty ones included.
    pub pages: u32,
    /// Backoff waits taken.
    pub retries: u32,
    /// Why the walk ended.
    pub stop: WalkStop,
}

/// Parameters of a walk.
pub struct WalkOptions {
    window: TimeWindow,
    read: ReadOptions,
    backoff: Box<dyn Backoff>,
    deadline: Option<Deadline>,
}

impl fmt::Debug for WalkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalkOptions")
            .field("window", &self.window)
            .field("read", &self.read)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl WalkOptions {
    /// Walks `window` with a single read and no retries.
    #[must_use]
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            read: ReadOptions::default(),
            backoff: Box::new(NoRetry),
            deadline: None,
        }
    }

    /// Sets the retry policy for empty pages.
    #[must_use]
    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Box::new(backoff);
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.read.limit = Some(limit);
        self
    }

    /// Restricts the walk to the given envelope kinds.
    #[must_use]
    pub fn with_envelope_types(mut self, types: impl IntoIterator<Item = EnvelopeType>) -> Self {
        self.read = self.read.with_envelope_types(types);
        self
    }

    /// Bounds the whole walk, reads and waits included, by `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Deadline::after(timeout))
    }

    /// Bounds the whole walk by `deadline`.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The window being walked.
    #[must_use]
    pub const fn window(&self) -> TimeWindow {
        self.window
    }
}

/// Walks `source_id` over the configured window.
///
/// `visitor` sees every non-empty page in order and returns whether it wants
/// more. Reads are always oldest-first, whatever the read options say, so the
/// cursor can only move forward. Records older than the cursor are dropped,
/// and a page left with nothing new costs a retry like an empty one.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidInput`] for an empty source id,
/// [`crate::Error::Transport`] as soon as a read fails, and
/// [`crate::Error::Timeout`] when the overall deadline passes. Running out of
/// retries is not an error.
pub async fn walk<R, V>(
    reader: &R,
    source_id: &str,
    visitor: V,
    options: WalkOptions,
) -> Result<WalkResult>
where
    R: PageReader,
    V: FnMut(&[Envelope]) -> bool + Send,
{
    let span = tracing::info_span!(
        "walk",
        source_id = %source_id,
        window = %options.window,
        pages = tracing::field::Empty,
        envelopes = tracing::field::Empty,
        stop = tracing::field::Empty,
    );
    let result = walk_pages(reader, source_id, visitor, options)
        .instrument(span.clone())
        .await;

    if let Ok(result) = &result {
        span.record("pages", result.pages);
        span.record("envelopes", result.envelopes.len());
        span.record("stop", result.stop.as_str());
        tracing::debug!(
            parent: &span,
            pages = result.pages,
            retries = result.retries,
            envelopes = result.envelopes.len(),
            stop = %result.stop,
            "Walk finished"
        );
    }
    result
}

async fn walk_pages<R, V>(
    reader: &R,
    source_id: &str,
    mut visitor: V,
    options: WalkOptions,
) -> Result<WalkResult>
where
    R: PageReader,
    V: FnMut(&[Envelope]) -> bool + Send,
{
    let WalkOptions {
        window,
        read,
        backoff,
        deadline,
    } = options;
    let read = read.with_descending(false);
    let deadline = deadline.as_ref();

    let mut envelopes = Vec::new();
    let mut attempt: u32 = 0;
    let mut pages: u32 = 0;
    let mut retries: u32 = 0;
    let mut cursor = window;

    let stop = loop {
        let mut page = run_within(deadline, "walk", reader.read(source_id, cursor, &read)).await?;
        pages = pages.saturating_add(1);
        let received = page.len();
        // Records behind the cursor were already seen, or precede the window.
        page.retain(|e| e.timestamp >= cursor.start_nanos());
        let outcome = match (received, page.len()) {
            (0, _) => "empty",
            (_, 0) => "stale",
            _ => "data",
        };
        metrics::counter!("walk_pages_total", "result" => outcome).increment(1);

        if page.is_empty() {
            if backoff.exhausted(attempt) {
                break WalkStop::BackoffExhausted;
            }
            let wait = backoff.next(attempt);
            tracing::trace!(
                attempt,
                received,
                wait_ms = wait.as_millis(),
                "No new records, backing off"
            );
            metrics::counter!("walk_backoff_waits_total").increment(1);
            sleep_within(deadline, "walk", wait).await?;
            attempt = attempt.saturating_add(1);
            retries = retries.saturating_add(1);
            continue;
        }

        let wants_more = visitor(&page);
        let newest = page.iter().map(|e| e.timestamp).max();
        envelopes.extend(page);
        if !wants_more {
            break WalkStop::Satisfied;
        }

        attempt = 0;
        match newest.and_then(|ts| cursor.after(ts)) {
            Some(next) => cursor = next,
            None => break WalkStop::WindowExhausted,
        }
    };

    Ok(WalkResult {
        envelopes,
        pages,
        retries,
        stop,
    })
}

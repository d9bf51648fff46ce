//! Render coordinator — periodic latest-value sampling.
//!
//! Streaming projections re-render the UI at most once per period:
//! the sampler emits the newest value at each period boundary during
//! which the source produced at least one value, and nothing during
//! idle periods. This is "sample" semantics, not "debounce" — a
//! steadily chatty source still emits once per period instead of
//! being starved until it goes quiet.

use std::time::Duration;

use futures_core::Stream;
use futures_util::StreamExt;

/// The default UI sampling period.
pub const RENDER_PERIOD: Duration = Duration::from_millis(50);

/// Sample `source` at `period` boundaries. A final pending value is
/// flushed when the source ends.
pub fn sample<T: Send + 'static>(
    source: impl Stream<Item = T> + Send + 'static,
    period: Duration,
) -> impl Stream<Item = T> + Send + 'static {
    async_stream::stream! {
        futures_util::pin_mut!(source);
        let mut latest: Option<T> = None;
        // First boundary is one full period out; ticks that pile up
        // behind a slow consumer collapse into one.
        let mut boundaries = tokio::time::interval_at(
            tokio::time::Instant::now() + period,
            period,
        );
        boundaries.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // Drain pending source values before a ready tick so a
                // boundary always samples the newest value.
                biased;
                next = source.next() => match next {
                    Some(value) => latest = Some(value),
                    None => {
                        if let Some(value) = latest.take() {
                            yield value;
                        }
                        break;
                    }
                },
                _ = boundaries.tick() => {
                    if let Some(value) = latest.take() {
                        yield value;
                    }
                }
            }
        }
    }
}

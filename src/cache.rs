//! Time-bounded cached values (session cookies, thermal snapshots).

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::Result;

/// A value that stays valid for `ttl` after it was fetched.
#[derive(Debug, Clone)]
pub struct CachedValue<T> {
    entry: Option<(T, Instant)>,
    ttl: Duration,
}

impl<T> CachedValue<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    /// The cached value if it is younger than `max_age` at `now`.
    pub fn get_within(&self, now: Instant, max_age: Duration) -> Option<&T> {
        match &self.entry {
            Some((value, fetched_at)) if now.saturating_duration_since(*fetched_at) < max_age => {
                Some(value)
            }
            _ => None,
        }
    }

    pub fn get(&self, now: Instant) -> Option<&T> {
        self.get_within(now, self.ttl)
    }

    /// The cached value regardless of age.
    pub fn peek(&self) -> Option<&T> {
        self.entry.as_ref().map(|(value, _)| value)
    }

    pub fn store(&mut self, value: T, now: Instant) {
        self.entry = Some((value, now));
    }

    pub fn invalidate(&mut self) -> Option<T> {
        self.entry.take().map(|(value, _)| value)
    }

    /// Return the cached value when fresh, otherwise run `fetch` and cache its result.
    /// A failed fetch leaves the previous entry untouched.
    pub async fn get_or_refresh<F, Fut>(&mut self, now: Instant, fetch: F) -> Result<&T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ttl = self.ttl;
        self.get_or_refresh_within(now, ttl, fetch).await
    }

    /// Like [`get_or_refresh`](Self::get_or_refresh) with a caller-chosen maximum age.
    pub async fn get_or_refresh_within<F, Fut>(
        &mut self,
        now: Instant,
        max_age: Duration,
        fetch: F,
    ) -> Result<&T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.get_within(now, max_age).is_none() {
            let value = fetch().await?;
            self.entry = Some((value, now));
        }
        match &self.entry {
            Some((value, _)) => Ok(value),
            None => unreachable!("entry populated above"),
        }
    }
}

//! Pull-based datapoint sequences
//!
//! Every read returns a [`DatapointIterator`], and every write consumes one.
//! `next()` yields `Ok(Some(dp))` for a value, `Ok(None)` at a clean end and
//! `Err(e)` on a fault. Implementations close themselves when they reach the
//! end or fail, so callers that stop pulling early only need `close()` (or drop).

use crate::storage::error::StorageResult;
use crate::storage::types::Datapoint;
use std::collections::VecDeque;

/// A lazy, fallible sequence of datapoints
///
/// A sequence handed to `StorageEngine::write` must not read from the engine
/// it is written to; such reads fail with `StorageError::Lock`.
pub trait DatapointIterator: Send {
    /// Pull the next datapoint
    fn next(&mut self) -> StorageResult<Option<Datapoint>>;

    /// Release any underlying cursor. Must be idempotent.
    fn close(&mut self);

    /// Pull everything that remains into a vector
    fn drain(&mut self) -> StorageResult<Vec<Datapoint>> {
        let mut out = Vec::new();
        while let Some(dp) = self.next()? {
            out.push(dp);
        }
        Ok(out)
    }
}

impl<I: DatapointIterator + ?Sized> DatapointIterator for Box<I> {
    fn next(&mut self) -> StorageResult<Option<Datapoint>> {
        (**self).next()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Iterator over an in-memory array of datapoints
#[derive(Debug, Default)]
pub struct DatapointArrayIterator {
    points: VecDeque<Datapoint>,
}

impl DatapointArrayIterator {
    pub fn new(points: Vec<Datapoint>) -> Self {
        Self {
            points: points.into(),
        }
    }
}

impl From<Vec<Datapoint>> for DatapointArrayIterator {
    fn from(points: Vec<Datapoint>) -> Self {
        Self::new(points)
    }
}

impl DatapointIterator for DatapointArrayIterator {
    fn next(&mut self) -> StorageResult<Option<Datapoint>> {
        Ok(self.points.pop_front())
    }

    fn close(&mut self) {
        self.points.clear();
    }
}

/// Stops after `remaining` datapoints, closing the inner iterator
pub struct Limited<I: DatapointIterator> {
    inner: I,
    remaining: u64,
}

impl<I: DatapointIterator> Limited<I> {
    pub fn new(inner: I, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }
}

impl<I: DatapointIterator> DatapointIterator for Limited<I> {
    fn next(&mut self) -> StorageResult<Option<Datapoint>> {
        if self.remaining == 0 {
            self.inner.close();
            return Ok(None);
        }
        let dp = self.inner.next()?;
        if dp.is_some() {
            self.remaining -= 1;
        }
        Ok(dp)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// Adapts a [`DatapointIterator`] to [`std::iter::Iterator`]
///
/// Iteration stops after the first error.
pub struct Datapoints<I: DatapointIterator> {
    inner: I,
    done: bool,
}

impl<I: DatapointIterator> Datapoints<I> {
    pub fn new(inner: I) -> Self {
        Self { inner, done: false }
    }
}

impl<I: DatapointIterator> Iterator for Datapoints<I> {
    type Item = StorageResult<Datapoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Ok(Some(dp)) => Some(Ok(dp)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::error::StorageError;

    fn points(n: usize) -> Vec<Datapoint> {
        (0..n).map(|i| Datapoint::new(i as f64, i as u64)).collect()
    }

    struct Failing {
        yielded: bool,
    }

    impl DatapointIterator for Failing {
        fn next(&mut self) -> StorageResult<Option<Datapoint>> {
            if self.yielded {
                return Err(StorageError::Source("broken pipe".to_string()));
            }
            self.yielded = true;
            Ok(Some(Datapoint::new(1.0, 1)))
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_array_iterator() {
        let mut it = DatapointArrayIterator::new(points(3));
        assert_eq!(it.next().unwrap().unwrap().timestamp, 0.0);
        assert_eq!(it.drain().unwrap().len(), 2);
        assert!(it.next().unwrap().is_none());
        it.close();
        it.close();
    }

    #[test]
    fn test_limited() {
        let mut it = Limited::new(DatapointArrayIterator::new(points(10)), 3);
        let got = it.drain().unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got[2].timestamp, 2.0);
        assert!(it.next().unwrap().is_none());
    }

    #[test]
    fn test_std_adapter_stops_after_error() {
        let it = Failing { yielded: false };
        let results: Vec<_> = Datapoints::new(it).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn test_boxed_iterator() {
        let mut it: Box<dyn DatapointIterator> = Box::new(DatapointArrayIterator::new(points(2)));
        assert_eq!(it.drain().unwrap().len(), 2);
    }
}

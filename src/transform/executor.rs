//! Streaming transform evaluation

use crate::storage::error::StorageResult;
use crate::storage::iter::DatapointIterator;
use crate::storage::types::Datapoint;
use crate::transform::compile::Pipeline;

/// Runs a compiled pipeline over an inner iterator
///
/// Datapoints the pipeline drops are skipped. The first error closes the inner
/// iterator and is returned from the `next()` call that hit it.
pub struct TransformIterator<I: DatapointIterator> {
    inner: I,
    pipeline: Pipeline,
    closed: bool,
}

impl<I: DatapointIterator> TransformIterator<I> {
    pub fn new(inner: I, pipeline: Pipeline) -> Self {
        Self {
            inner,
            pipeline,
            closed: false,
        }
    }
}

impl<I: DatapointIterator> DatapointIterator for TransformIterator<I> {
    fn next(&mut self) -> StorageResult<Option<Datapoint>> {
        if self.closed {
            return Ok(None);
        }

        loop {
            let dp = match self.inner.next() {
                Ok(Some(dp)) => dp,
                Ok(None) => {
                    self.close();
                    return Ok(None);
                }
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            };

            match self.pipeline.apply(&dp) {
                Ok(Some(out)) => return Ok(Some(out)),
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(
                        transform = self.pipeline.source(),
                        timestamp = dp.timestamp,
                        error = %e,
                        "Transform failed"
                    );
                    self.close();
                    return Err(e.into());
                }
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.close();
        }
    }
}

impl<I: DatapointIterator> Drop for TransformIterator<I> {
    fn drop(&mut self) {
        self.close();
    }
}

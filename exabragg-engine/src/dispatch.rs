//! Parallel dispatch abstraction.
//!
//! Every data-parallel pass in the engine goes through [`ParallelDispatch`].
//! The thread count and work partitioning belong to the backend; callers
//! only describe the per-element work. [`RayonDispatch`] is the one
//! implementation.

use crate::{Error, Result};
use exabragg_core::KernelFault;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::ops::Range;
use std::sync::Arc;
use tracing::trace;

/// Backend that executes data-parallel passes.
pub trait ParallelDispatch: Send + Sync {
    /// Backend name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Runs `body(i, &mut data[i])` for every element.
    fn for_each_mut<T, F>(&self, label: &'static str, data: &mut [T], body: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send;

    /// Like [`for_each_mut`](Self::for_each_mut), stopping at the first fault.
    ///
    /// # Errors
    /// Returns one of the faults raised by `body`.
    fn try_for_each_mut<T, F>(
        &self,
        label: &'static str,
        data: &mut [T],
        body: F,
    ) -> std::result::Result<(), KernelFault>
    where
        T: Send,
        F: Fn(usize, &mut T) -> std::result::Result<(), KernelFault> + Sync + Send;

    /// Maps every item to a result, preserving order.
    ///
    /// # Errors
    /// Returns one of the faults raised by `body`.
    fn try_map<T, R, F>(
        &self,
        label: &'static str,
        items: &[T],
        body: F,
    ) -> std::result::Result<Vec<R>, KernelFault>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> std::result::Result<R, KernelFault> + Sync + Send;

    /// Maps every index of `range`, preserving order.
    fn map_range<R, F>(&self, label: &'static str, range: Range<usize>, body: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send;

    /// Blocks until all previously issued work has completed.
    fn fence(&self, label: &'static str);
}

/// Rayon-backed dispatch, on the global pool or a dedicated one.
#[derive(Clone, Default)]
pub struct RayonDispatch {
    pool: Option<Arc<ThreadPool>>,
}

impl RayonDispatch {
    /// Dispatch onto rayon's global thread pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch onto a dedicated pool with `threads` workers.
    ///
    /// # Errors
    /// Returns [`Error::Dispatch`] if the pool cannot be built.
    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("exabragg-{i}"))
            .build()
            .map_err(|e| Error::Dispatch(e.to_string()))?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }

    /// Number of worker threads that will run passes.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, |pool| pool.current_num_threads())
    }

    fn run<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

impl std::fmt::Debug for RayonDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayonDispatch")
            .field("dedicated_pool", &self.pool.is_some())
            .field("threads", &self.threads())
            .finish()
    }
}

impl ParallelDispatch for RayonDispatch {
    fn name(&self) -> &'static str {
        "rayon"
    }

    fn for_each_mut<T, F>(&self, label: &'static str, data: &mut [T], body: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        trace!(label, len = data.len(), "for_each_mut");
        self.run(|| {
            data.par_iter_mut()
                .enumerate()
                .for_each(|(i, item)| body(i, item));
        });
    }

    fn try_for_each_mut<T, F>(
        &self,
        label: &'static str,
        data: &mut [T],
        body: F,
    ) -> std::result::Result<(), KernelFault>
    where
        T: Send,
        F: Fn(usize, &mut T) -> std::result::Result<(), KernelFault> + Sync + Send,
    {
        trace!(label, len = data.len(), "try_for_each_mut");
        self.run(|| {
            data.par_iter_mut()
                .enumerate()
                .try_for_each(|(i, item)| body(i, item))
        })
    }

    fn try_map<T, R, F>(
        &self,
        label: &'static str,
        items: &[T],
        body: F,
    ) -> std::result::Result<Vec<R>, KernelFault>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> std::result::Result<R, KernelFault> + Sync + Send,
    {
        trace!(label, len = items.len(), "try_map");
        self.run(|| items.par_iter().map(|item| body(item)).collect())
    }

    fn map_range<R, F>(&self, label: &'static str, range: Range<usize>, body: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send,
    {
        trace!(label, start = range.start, end = range.end, "map_range");
        self.run(|| range.into_par_iter().map(|i| body(i)).collect())
    }

    fn fence(&self, label: &'static str) {
        // Rayon passes are joined before they return.
        trace!(label, "fence");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_each_mut_sees_indices() {
        let dispatch = RayonDispatch::new();
        let mut data = vec![0usize; 1000];
        dispatch.for_each_mut("fill", &mut data, |i, v| *v = i * 2);
        assert!(data.iter().enumerate().all(|(i, &v)| v == i * 2));
    }

    #[test]
    fn test_try_for_each_mut_reports_fault() {
        let dispatch = RayonDispatch::new();
        let mut data = vec![0u8; 64];
        let result = dispatch.try_for_each_mut("faulty", &mut data, |i, _| {
            if i == 17 {
                Err(KernelFault::new("boom").at_pixel(i))
            } else {
                Ok(())
            }
        });
        assert_eq!(result.unwrap_err().pixel, Some(17));
    }

    #[test]
    fn test_try_map_preserves_order() {
        let dispatch = RayonDispatch::with_threads(3).unwrap();
        let items: Vec<usize> = (0..500).collect();
        let out = dispatch.try_map("square", &items, |&i| Ok(i * i)).unwrap();
        assert_eq!(out.len(), 500);
        assert_eq!(out[499], 499 * 499);
    }

    #[test]
    fn test_map_range_offsets() {
        let dispatch = RayonDispatch::new();
        let out = dispatch.map_range("range", 5..9, |i| i);
        assert_eq!(out, vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_dedicated_pool_thread_count() {
        let dispatch = RayonDispatch::with_threads(2).unwrap();
        assert_eq!(dispatch.threads(), 2);
        assert_eq!(dispatch.name(), "rayon");
    }
}

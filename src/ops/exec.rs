//! Execution strategies for element-wise loops.
//!
//! Every kernel in [`super::cpu`] fills its output as `out[i] = f(i)`, where no
//! element depends on any other. That makes the loop body the only thing a
//! strategy has to run, either in order or split across threads.

use rayon::prelude::*;

/// Below this many elements a parallel split costs more than it saves.
const MIN_PARALLEL_CHUNK: usize = 4096;

/// Runs `out[i] = f(i)` over a flat iteration space.
pub trait ElementwiseExecutor: Sync {
    fn elementwise_for_each<T, F>(&self, out: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send;
}

/// Single-threaded, in-order execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct Serial;

/// Data-parallel execution on the `rayon` global pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parallel;

impl ElementwiseExecutor for Serial {
    fn elementwise_for_each<T, F>(&self, out: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        out.iter_mut().enumerate().for_each(|(i, o)| *o = f(i));
    }
}

impl ElementwiseExecutor for Parallel {
    fn elementwise_for_each<T, F>(&self, out: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        out.par_iter_mut()
            .with_min_len(MIN_PARALLEL_CHUNK)
            .enumerate()
            .for_each(|(i, o)| *o = f(i));
    }
}

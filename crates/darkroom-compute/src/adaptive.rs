//! Backend routing with timing and transparent fallback.
//!
//! [`AdaptiveProcessor::execute`] runs the accelerated closure when the
//! capability service has a ready device, and the fallback closure
//! otherwise. A failed or panicking accelerated call is logged and retried
//! exactly once on the fallback; only fallback errors reach the caller.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{trace, warn};

use crate::backend::{Accelerator, Backend, CapabilityService};
use crate::pipeline::OpId;
use crate::{lock, ComputeResult};

/// Output of one routed call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult<T> {
    pub data: T,
    /// Backend that produced `data`.
    pub backend: Backend,
    /// Wall-clock milliseconds from entry until `data` was available.
    pub timing_ms: f64,
}

impl<T> ProcessingResult<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ProcessingResult<U> {
        ProcessingResult { data: f(self.data), backend: self.backend, timing_ms: self.timing_ms }
    }
}

/// Per-operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OpStats {
    /// Every call, fast paths included.
    pub calls: u64,
    /// Calls answered by the accelerator.
    pub accelerated: u64,
    /// Calls answered by the fallback.
    pub fallback: u64,
    /// Accelerated attempts that failed or panicked.
    pub accelerated_failures: u64,
    /// Calls short-circuited by an identity check.
    pub fast_path: u64,
    pub last_ms: f64,
    pub total_ms: f64,
}

impl OpStats {
    /// Mean call time in milliseconds.
    pub fn avg_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_ms / self.calls as f64
        }
    }

    fn record(&mut self, ms: f64) {
        self.calls += 1;
        self.last_ms = ms;
        self.total_ms += ms;
    }
}

/// Routes calls between the accelerator and the fallback.
///
/// Cheap to clone; clones share statistics.
#[derive(Clone)]
pub struct AdaptiveProcessor {
    capabilities: CapabilityService,
    min_accelerated_pixels: u64,
    stats: Arc<Mutex<HashMap<OpId, OpStats>>>,
}

impl AdaptiveProcessor {
    pub fn new(capabilities: CapabilityService) -> Self {
        Self {
            capabilities,
            min_accelerated_pixels: 0,
            stats: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Images with fewer pixels go straight to the fallback.
    pub fn with_min_accelerated_pixels(mut self, pixels: u64) -> Self {
        self.min_accelerated_pixels = pixels;
        self
    }

    pub fn capabilities(&self) -> &CapabilityService {
        &self.capabilities
    }

    /// Runs `op` on the best available backend.
    ///
    /// `accelerated` receives the current device. Its errors and panics are
    /// logged and answered by one call to `fallback`, whose result (or
    /// error) is returned unchanged.
    pub fn execute<T, A, F>(
        &self,
        op: OpId,
        width: u32,
        height: u32,
        accelerated: A,
        fallback: F,
    ) -> ComputeResult<ProcessingResult<T>>
    where
        A: FnOnce(&dyn Accelerator) -> ComputeResult<T>,
        F: FnOnce() -> ComputeResult<T>,
    {
        let start = Instant::now();
        let pixels = width as u64 * height as u64;

        let device = if pixels >= self.min_accelerated_pixels {
            self.capabilities.accelerator()
        } else {
            trace!(%op, pixels, "image below accelerator threshold");
            None
        };

        let mut failed = false;
        if let Some(device) = device {
            match catch_unwind(AssertUnwindSafe(|| accelerated(device.as_ref()))) {
                Ok(Ok(data)) => {
                    let timing_ms = elapsed_ms(start);
                    self.update(op, |s| {
                        s.record(timing_ms);
                        s.accelerated += 1;
                    });
                    return Ok(ProcessingResult { data, backend: Backend::Accelerated, timing_ms });
                }
                Ok(Err(e)) => {
                    warn!(%op, width, height, error = %e, "accelerated path failed, using fallback");
                }
                Err(payload) => {
                    warn!(%op, width, height, panic = panic_message(&*payload), "accelerated path panicked, using fallback");
                }
            }
            failed = true;
        }

        let result = fallback();
        let timing_ms = elapsed_ms(start);
        self.update(op, |s| {
            s.record(timing_ms);
            s.fallback += 1;
            if failed {
                s.accelerated_failures += 1;
            }
        });
        result.map(|data| ProcessingResult { data, backend: Backend::Fallback, timing_ms })
    }

    /// Result of an identity fast path that bypassed both backends.
    pub fn shortcut<T>(&self, op: OpId, start: Instant, data: T) -> ProcessingResult<T> {
        let timing_ms = elapsed_ms(start);
        self.update(op, |s| {
            s.record(timing_ms);
            s.fast_path += 1;
        });
        trace!(%op, "fast path");
        ProcessingResult { data, backend: Backend::Fallback, timing_ms }
    }

    /// Counters for `op`.
    pub fn stats(&self, op: OpId) -> OpStats {
        lock(&self.stats).get(&op).copied().unwrap_or_default()
    }

    pub fn reset_stats(&self) {
        lock(&self.stats).clear();
    }

    fn update(&self, op: OpId, f: impl FnOnce(&mut OpStats)) {
        f(lock(&self.stats).entry(op).or_default());
    }
}

impl std::fmt::Debug for AdaptiveProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveProcessor")
            .field("capabilities", &self.capabilities)
            .field("min_accelerated_pixels", &self.min_accelerated_pixels)
            .finish()
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InitOptions;
    use crate::testing::MockPlatform;
    use crate::ComputeError;
    use std::cell::Cell;

    fn processor(ready: bool) -> AdaptiveProcessor {
        let platform = if ready { MockPlatform::new() } else { MockPlatform::without_adapter() };
        let svc = CapabilityService::new(Arc::new(platform));
        svc.initialize(InitOptions::default());
        AdaptiveProcessor::new(svc)
    }

    #[test]
    fn test_accelerated_when_ready() {
        let proc = processor(true);
        let res = proc.execute(OpId::Histogram, 4, 4, |_| Ok(1), || Ok(2)).unwrap();
        assert_eq!(res.data, 1);
        assert_eq!(res.backend, Backend::Accelerated);
        assert!(res.timing_ms >= 0.0);
        assert_eq!(proc.stats(OpId::Histogram).accelerated, 1);
    }

    #[test]
    fn test_fallback_when_unavailable() {
        let proc = processor(false);
        let res = proc
            .execute(OpId::Mask, 4, 4, |_| -> ComputeResult<i32> { panic!("must not run") }, || Ok(2))
            .unwrap();
        assert_eq!(res.data, 2);
        assert_eq!(res.backend, Backend::Fallback);
    }

    #[test]
    fn test_error_falls_back_exactly_once() {
        let proc = processor(true);
        let calls = Cell::new(0);
        let res = proc
            .execute(
                OpId::Adjustments,
                4,
                4,
                |_| Err(ComputeError::OutOfMemory("texture".into())),
                || {
                    calls.set(calls.get() + 1);
                    Ok(vec![9u8])
                },
            )
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(res.data, vec![9u8]);
        assert_eq!(res.backend, Backend::Fallback);

        let stats = proc.stats(OpId::Adjustments);
        assert_eq!(stats.accelerated_failures, 1);
        assert_eq!(stats.fallback, 1);
    }

    #[test]
    fn test_panic_falls_back() {
        let proc = processor(true);
        let calls = Cell::new(0);
        let res = proc
            .execute(
                OpId::Rotation,
                4,
                4,
                |_| -> ComputeResult<u8> { panic!("kernel exploded") },
                || {
                    calls.set(calls.get() + 1);
                    Ok(3u8)
                },
            )
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(res.data, 3);
    }

    #[test]
    fn test_fallback_error_is_returned_verbatim() {
        let proc = processor(true);
        let err = proc
            .execute::<u8, _, _>(
                OpId::Uber,
                4,
                4,
                |_| Err(ComputeError::DeviceLost("gone".into())),
                || Err(ComputeError::InternalError("cpu".into())),
            )
            .unwrap_err();
        assert_eq!(err, ComputeError::InternalError("cpu".into()));
    }

    #[test]
    fn test_small_images_skip_accelerator() {
        let proc = processor(true).with_min_accelerated_pixels(100);
        let res = proc.execute(OpId::ToneCurve, 4, 4, |_| Ok(1), || Ok(2)).unwrap();
        assert_eq!(res.backend, Backend::Fallback);

        let res = proc.execute(OpId::ToneCurve, 10, 10, |_| Ok(1), || Ok(2)).unwrap();
        assert_eq!(res.backend, Backend::Accelerated);
    }

    #[test]
    fn test_stats_reset_and_shortcut() {
        let proc = processor(false);
        let out = proc.shortcut(OpId::Rotation, Instant::now(), 5);
        assert_eq!(out.backend, Backend::Fallback);
        assert!(out.timing_ms >= 0.0);

        let stats = proc.stats(OpId::Rotation);
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.fast_path, 1);

        proc.reset_stats();
        assert_eq!(proc.stats(OpId::Rotation), OpStats::default());
    }
}

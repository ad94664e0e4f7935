//! Counters and timers filled in by the cycle controller.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::mg::cycle::SolveOutcome;

/// Work done on one level.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LevelCounters {
    pub smooths: usize,
    pub smooth_time: Duration,
    pub residuals: usize,
    pub residual_time: Duration,
    pub restrictions: usize,
    pub restriction_time: Duration,
    pub interpolations: usize,
    pub interpolation_time: Duration,
    pub bottom_solves: usize,
    pub bottom_time: Duration,
    pub krylov_iterations: usize,
    /// Bottom solves that stopped short of their tolerance.
    pub bottom_failures: usize,
    /// V-cycles entered at this level.
    pub vcycles: usize,
    pub fcycles: usize,
}

impl LevelCounters {
    pub fn total_time(&self) -> Duration {
        self.smooth_time + self.residual_time + self.restriction_time + self.interpolation_time + self.bottom_time
    }
}

/// Telemetry for any number of solves on one hierarchy.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Telemetry {
    levels: Vec<LevelCounters>,
    pub solves: usize,
    pub solve_time: Duration,
    #[serde(skip)]
    pub last_outcome: Option<SolveOutcome>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> &[LevelCounters] {
        &self.levels
    }

    /// Counters of `level`, zeroed if never touched.
    pub fn level(&self, level: usize) -> LevelCounters {
        self.levels.get(level).cloned().unwrap_or_default()
    }

    pub(crate) fn level_mut(&mut self, level: usize) -> &mut LevelCounters {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, LevelCounters::default);
        }
        &mut self.levels[level]
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn total_vcycles(&self) -> usize {
        self.levels.iter().map(|l| l.vcycles).sum()
    }

    /// Per-level timing table at `info` level.
    pub fn log_summary(&self) {
        log::info!(
            "{:>5} {:>8} {:>12} {:>8} {:>12} {:>8} {:>12} {:>8} {:>12} {:>8} {:>12}",
            "level",
            "smooth",
            "time",
            "resid",
            "time",
            "restr",
            "time",
            "interp",
            "time",
            "bottom",
            "time"
        );
        for (n, l) in self.levels.iter().enumerate() {
            log::info!(
                "{:>5} {:>8} {:>12.6} {:>8} {:>12.6} {:>8} {:>12.6} {:>8} {:>12.6} {:>8} {:>12.6}",
                n,
                l.smooths,
                l.smooth_time.as_secs_f64(),
                l.residuals,
                l.residual_time.as_secs_f64(),
                l.restrictions,
                l.restriction_time.as_secs_f64(),
                l.interpolations,
                l.interpolation_time.as_secs_f64(),
                l.bottom_solves,
                l.bottom_time.as_secs_f64()
            );
        }
        let iterations: usize = self.levels.iter().map(|l| l.krylov_iterations).sum();
        let failures: usize = self.levels.iter().map(|l| l.bottom_failures).sum();
        log::info!(
            "solves={} vcycles={} krylov_iterations={} bottom_failures={} solve_time={:.6}s",
            self.solves,
            self.total_vcycles(),
            iterations,
            failures,
            self.solve_time.as_secs_f64()
        );
        if let Some(o) = &self.last_outcome {
            log::info!(
                "last solve: converged={} cycles={} residual {:e} -> {:e}",
                o.converged,
                o.cycles,
                o.initial_residual,
                o.final_residual
            );
        }
    }
}

/// Run `f`, adding its wall time to `slot`.
pub(crate) fn timed<R>(slot: &mut Duration, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let r = f();
    *slot += start.elapsed();
    r
}

use crate::core::{
    scan_config::ScanConfig,
    types::{ChainStatus, LoopCursor, ScanMode},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer new blocks than the threshold since the previous tick
    SlowChain { delta: u64, threshold: u64 },
    /// Best height is not above the cursor
    NothingNew,
}

/// What one loop tick should fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickPlan {
    Skip(SkipReason),
    /// `finalized` are heights at or below the LIB, `fresh` are unconfirmed
    /// heights never fetched before. Both ascending, disjoint.
    All { finalized: Vec<u64>, fresh: Vec<u64> },
    /// The whole `[next_height, best]` range, every tick.
    Listener { heights: Vec<u64> },
}

impl TickPlan {
    pub fn is_skip(&self) -> bool {
        matches!(self, TickPlan::Skip(_))
    }
}

/// Decides per tick which heights need a query round.
#[derive(Debug, Clone, Copy)]
pub struct HeightPlanner {
    mode: ScanMode,
    skip_threshold: u64,
}

impl HeightPlanner {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            mode: config.scan_mode(),
            skip_threshold: config.loop_skip_threshold(),
        }
    }

    pub fn skip_threshold(&self) -> u64 {
        self.skip_threshold
    }

    pub fn plan(&self, status: &ChainStatus, cursor: &LoopCursor) -> TickPlan {
        // No previous best height: never skip.
        if let Some(last_best) = cursor.last_best_height {
            let delta = status.best_height.saturating_sub(last_best);
            if delta <= self.skip_threshold {
                return TickPlan::Skip(SkipReason::SlowChain {
                    delta,
                    threshold: self.skip_threshold,
                });
            }
        }

        let next = cursor.next_height();
        let best = status.best_height;
        if best < next {
            return TickPlan::Skip(SkipReason::NothingNew);
        }

        match self.mode {
            ScanMode::Listener => TickPlan::Listener {
                heights: (next..=best).collect(),
            },
            ScanMode::All => {
                let lib = status.lib_height.min(best);
                let finalized: Vec<u64> = (next..=lib).collect();

                // Heights in (lib, last_best] are served from the previous
                // result; without one they must be fetched again.
                let fresh_floor = if cursor.has_unconfirmed_tail() {
                    cursor.last_best_height.unwrap_or(lib).max(lib)
                } else {
                    lib
                };
                let fresh: Vec<u64> = ((fresh_floor + 1).max(next)..=best).collect();

                TickPlan::All { finalized, fresh }
            }
        }
    }
}

//! Live application of a run mode delta to a running engine.
//!
//! Runs entirely under the engine's state lock: `before` stops the ramp and
//! resizes workers or round slots, `apply` assigns the instructed fields and
//! `after` reschedules the ramp.
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::info;

use crate::error::RunModeError;

use super::engine::{EngineInner, EngineState, effective_level};
use super::{RunMode, RunModeChanges, RunModeProperty};

impl EngineInner {
    pub(super) fn before(
        self: &Arc<Self>,
        state: &mut EngineState,
        changes: &RunModeChanges,
    ) -> Result<(), RunModeError> {
        state.cancel_ramp();
        let Some(level) = changes.level() else {
            return Ok(());
        };
        if level == state.mode.level() {
            return Ok(());
        }

        let mut target_mode = state.mode.clone();
        target_mode.set_level(level);
        let target = effective_level(&target_mode);
        info!(
            "Resizing {} run mode from {} to {}",
            state.mode.kind(),
            state.mode.level(),
            level
        );
        if state.mode.is_normal() {
            if self.stopped.load(Ordering::Acquire) {
                return Ok(());
            }
            self.resize_workers(state, target)
        } else {
            state.resize_round_slots(target);
            Ok(())
        }
    }

    pub(super) fn apply(&self, state: &mut EngineState, changes: &RunModeChanges) {
        changes.apply_to(&mut state.mode);
        match &state.mode {
            RunMode::Normal(normal) => {
                self.wait_time_ms
                    .store(normal.wait_time_ms, Ordering::Release);
            }
            RunMode::ConstantLoad(constant) => {
                self.round_interval_ms
                    .store(constant.round_interval_ms, Ordering::Release);
                let pool_size = constant.pool_size;
                self.sync_pool_size(state, pool_size);
            }
        }
    }

    pub(super) fn after(self: &Arc<Self>, state: &mut EngineState, changes: &RunModeChanges) {
        let Some(ramp) = state.mode.ramp() else {
            return;
        };
        let delay = changes
            .properties()
            .iter()
            .find_map(|property| match property {
                RunModeProperty::RampInitialDelayMs(value) => Some(Duration::from_millis(*value)),
                _ => None,
            })
            .unwrap_or_else(|| ramp.initial_delay().saturating_sub(self.elapsed()));
        self.schedule_ramp(state, delay);
    }
}

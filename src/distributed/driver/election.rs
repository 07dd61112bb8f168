use std::collections::BTreeSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DistributedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverRole {
    Master,
    Candidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionOutcome {
    pub master_id: usize,
    pub role: DriverRole,
}

/// Deterministic lowest-valid-id election over a fixed driver list.
#[derive(Debug)]
pub struct MasterElection {
    size: usize,
    invalid: Mutex<BTreeSet<usize>>,
}

impl MasterElection {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            invalid: Mutex::new(BTreeSet::new()),
        }
    }

    /// Mark a driver as failed. Repeated marks are no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is not a driver of this cluster.
    pub fn mark_candidate_invalid(&self, id: usize) -> Result<(), DistributedError> {
        if id >= self.size {
            return Err(DistributedError::CandidateOutOfRange {
                id,
                size: self.size,
            });
        }
        let mut invalid = self
            .invalid
            .lock()
            .map_err(|_| DistributedError::StatePoisoned)?;
        if invalid.insert(id) {
            info!("Driver {} marked invalid", id);
        }
        Ok(())
    }

    /// Forget a failure mark, e.g. when the driver announces itself again.
    pub fn revalidate(&self, id: usize) {
        if let Ok(mut invalid) = self.invalid.lock() {
            invalid.remove(&id);
        }
    }

    #[must_use]
    pub fn is_candidate_invalid(&self, id: usize) -> bool {
        self.invalid
            .lock()
            .map(|invalid| invalid.contains(&id))
            .unwrap_or(false)
    }

    #[must_use]
    pub fn elect_master(&self, self_id: usize) -> ElectionOutcome {
        let master_id = self.select();
        let role = if master_id == self_id {
            DriverRole::Master
        } else {
            DriverRole::Candidate
        };
        ElectionOutcome { master_id, role }
    }

    fn select(&self) -> usize {
        let Ok(mut invalid) = self.invalid.lock() else {
            return 0;
        };
        if let Some(id) = (0..self.size).find(|id| !invalid.contains(id)) {
            return id;
        }
        info!("Every driver is marked invalid; clearing marks and electing again");
        invalid.clear();
        0
    }
}

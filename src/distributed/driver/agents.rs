use arcshift::ArcShift;

/// Registered agent addresses in registration order.
///
/// Readers take cheap snapshots; writers publish a new list with `rcu`.
pub(crate) struct RegisteredAgents {
    pool: ArcShift<Vec<String>>,
}

impl RegisteredAgents {
    pub(crate) fn new(agents: Vec<String>) -> Self {
        Self {
            pool: ArcShift::new(agents),
        }
    }

    /// Returns `true` if the agent was not registered before.
    pub(crate) fn register(&self, agent: &str) -> bool {
        let mut added = false;
        let mut pool = self.pool.clone();
        pool.rcu(|current| {
            let mut next = current.clone();
            added = !next.iter().any(|known| known == agent);
            if added {
                next.push(agent.to_owned());
            }
            next
        });
        added
    }

    pub(crate) fn remove_all(&self, agents: &[String]) {
        if agents.is_empty() {
            return;
        }
        let mut pool = self.pool.clone();
        pool.rcu(|current| {
            let mut next = current.clone();
            next.retain(|known| !agents.contains(known));
            next
        });
    }

    pub(crate) fn replace(&self, agents: Vec<String>) {
        let mut pool = self.pool.clone();
        pool.rcu(|_| agents.clone());
    }

    pub(crate) fn contains(&self, agent: &str) -> bool {
        self.pool.shared_get().iter().any(|known| known == agent)
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.pool.shared_get().iter().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.pool.shared_get().len()
    }
}

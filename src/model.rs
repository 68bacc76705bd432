//! Pest agents and the arena holding them.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a pest agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PestState {
    /// Waiting for breeding weather; no movement, no reproduction.
    Dormant,
    /// Moving and feeding.
    Active,
    /// Active and grew its count this day.
    Reproducing,
    /// Active and carrying the virus; causes viral shock instead of feeding.
    Infected,
    /// Extinct; the arena slot is a tombstone.
    Dead,
}

impl PestState {
    /// Whether the agent moves and damages crops this day.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PestState::Active | PestState::Reproducing | PestState::Infected
        )
    }
}

/// Stable index of an agent in its [`Population`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u32);

/// Super-individual standing for a cluster of about 500 thrips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PestAgent {
    pub x: usize,
    pub y: usize,
    /// Number of clusters represented.
    pub count: u32,
    /// Carries the tomato spotted wilt virus.
    pub infected: bool,
    pub state: PestState,
}

impl PestAgent {
    /// Create a dormant agent at `(x, y)`.
    pub fn new(x: usize, y: usize, count: u32, infected: bool) -> Self {
        Self {
            x,
            y,
            count,
            infected,
            state: PestState::Dormant,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state != PestState::Dead
    }

    /// Remove `n` clusters; reaching zero kills the agent.
    pub fn shrink(&mut self, n: u32) {
        self.count = self.count.saturating_sub(n);
        if self.count == 0 {
            self.kill();
        }
    }

    pub fn kill(&mut self) {
        self.count = 0;
        self.state = PestState::Dead;
    }
}

/// Contiguous arena of agents.
///
/// Agents are never moved or removed: dead agents stay in place as
/// tombstones so that every [`AgentId`] remains valid for the whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Population {
    agents: Vec<PestAgent>,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an agent and return its id.
    pub fn spawn(&mut self, agent: PestAgent) -> AgentId {
        let id = AgentId(self.agents.len() as u32);
        self.agents.push(agent);
        id
    }

    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut PestAgent> {
        self.agents.get_mut(id.0 as usize)
    }

    /// Number of slots, tombstones included.
    pub fn n_slots(&self) -> usize {
        self.agents.len()
    }

    /// Ids of all slots in spawn order, tombstones included.
    pub fn ids(&self) -> impl Iterator<Item = AgentId> + use<> {
        (0..self.agents.len() as u32).map(AgentId)
    }

    /// Living agents in spawn order.
    pub fn live(&self) -> impl Iterator<Item = (AgentId, &PestAgent)> {
        self.agents
            .iter()
            .enumerate()
            .filter(|(_, agt)| agt.is_alive())
            .map(|(i_agt, agt)| (AgentId(i_agt as u32), agt))
    }

    pub fn n_live(&self) -> usize {
        self.live().count()
    }

    /// Total number of clusters over living agents.
    pub fn total_count(&self) -> u64 {
        self.live().map(|(_, agt)| agt.count as u64).sum()
    }

    pub fn any_infected(&self) -> bool {
        self.live().any(|(_, agt)| agt.infected)
    }
}

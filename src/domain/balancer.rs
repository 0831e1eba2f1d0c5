use crate::domain::models::GRID_UNIT_SECONDS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancePolicy {
    HardTotal { total: u64 },
    ConserveSum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjustment {
    pub applied: u64,
    pub clamped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationBalancer {
    policy: BalancePolicy,
    step: u64,
}

impl DurationBalancer {
    pub fn hard_total(total: u64, step: u64) -> Self {
        Self {
            policy: BalancePolicy::HardTotal { total },
            step: step.max(1),
        }
    }

    pub fn conserve_sum() -> Self {
        Self {
            policy: BalancePolicy::ConserveSum,
            step: GRID_UNIT_SECONDS,
        }
    }

    pub fn policy(&self) -> BalancePolicy {
        self.policy
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    fn snap(&self, seconds: u64) -> u64 {
        seconds - seconds % self.step
    }

    pub fn editable_range(&self, entries: &[u64], index: usize) -> Option<(u64, u64)> {
        let current = *entries.get(index)?;
        let others = entries.iter().sum::<u64>() - current;
        Some(match self.policy {
            BalancePolicy::HardTotal { total } => (0, total.saturating_sub(others)),
            BalancePolicy::ConserveSum => (0, current + others),
        })
    }

    pub fn set(&self, entries: &mut [u64], index: usize, requested: u64) -> Option<Adjustment> {
        let current = *entries.get(index)?;
        let requested = self.snap(requested);
        match self.policy {
            BalancePolicy::HardTotal { total } => {
                if entries.len() == 1 {
                    entries[0] = total;
                    return Some(Adjustment {
                        applied: total,
                        clamped: requested != total,
                    });
                }
                let (_, max) = self.editable_range(entries, index)?;
                let applied = requested.min(max);
                entries[index] = applied;
                Some(Adjustment {
                    applied,
                    clamped: applied != requested,
                })
            }
            BalancePolicy::ConserveSum => {
                if entries.len() == 1 {
                    return Some(Adjustment {
                        applied: current,
                        clamped: requested != current,
                    });
                }
                let applied = if requested > current {
                    current + steal_following(entries, index, requested - current)
                } else {
                    give_following(entries, index, current - requested);
                    requested
                };
                entries[index] = applied;
                Some(Adjustment {
                    applied,
                    clamped: applied != requested,
                })
            }
        }
    }

    pub fn increment(&self, entries: &mut [u64], index: usize) -> Option<Adjustment> {
        let current = *entries.get(index)?;
        self.set(entries, index, current + self.step)
    }

    pub fn decrement(&self, entries: &mut [u64], index: usize) -> Option<Adjustment> {
        let current = *entries.get(index)?;
        self.set(entries, index, current.saturating_sub(self.step))
    }
}

fn following(len: usize, index: usize) -> impl Iterator<Item = usize> {
    (1..len).map(move |offset| (index + offset) % len)
}

fn steal_following(entries: &mut [u64], index: usize, wanted: u64) -> u64 {
    let mut taken = 0;
    for sibling in following(entries.len(), index) {
        if taken == wanted {
            break;
        }
        let take = entries[sibling].min(wanted - taken);
        entries[sibling] -= take;
        taken += take;
    }
    taken
}

fn give_following(entries: &mut [u64], index: usize, freed: u64) {
    if let Some(sibling) = following(entries.len(), index).next() {
        entries[sibling] += freed;
    }
}

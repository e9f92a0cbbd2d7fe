use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Achievement {
    FirstCarrier,
    FiveCarriers,
    HundredPassengers,
    KindExplorer,
}

impl Achievement {
    pub fn title(&self) -> &'static str {
        match self {
            Achievement::FirstCarrier => "First Flight",
            Achievement::FiveCarriers => "Carrier Explorer",
            Achievement::HundredPassengers => "Passenger Army",
            Achievement::KindExplorer => "Kind Explorer",
        }
    }
}

/// One-shot milestones. Each unlocks at most once until reset.
#[derive(Debug, Clone, Default)]
pub struct Achievements {
    unlocked: Vec<Achievement>,
}

impl Achievements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_unlocked(&self, a: Achievement) -> bool {
        self.unlocked.contains(&a)
    }

    /// Returns true the first time `a` is unlocked.
    pub fn unlock(&mut self, a: Achievement) -> bool {
        if self.is_unlocked(a) {
            return false;
        }
        self.unlocked.push(a);
        true
    }

    /// Milestones that depend on population counts, checked after a
    /// carrier is created.
    pub fn check_population(&mut self, carriers: usize, passengers: usize) -> Vec<Achievement> {
        let mut newly = Vec::new();
        if carriers >= 1 && self.unlock(Achievement::FirstCarrier) {
            newly.push(Achievement::FirstCarrier);
        }
        if carriers >= 5 && self.unlock(Achievement::FiveCarriers) {
            newly.push(Achievement::FiveCarriers);
        }
        if passengers >= 100 && self.unlock(Achievement::HundredPassengers) {
            newly.push(Achievement::HundredPassengers);
        }
        newly
    }

    pub fn unlocked(&self) -> &[Achievement] {
        &self.unlocked
    }

    pub fn clear(&mut self) {
        self.unlocked.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlocks_once() {
        let mut a = Achievements::new();
        assert_eq!(a.check_population(1, 0), vec![Achievement::FirstCarrier]);
        assert!(a.check_population(1, 0).is_empty());
        assert_eq!(
            a.check_population(5, 120),
            vec![Achievement::FiveCarriers, Achievement::HundredPassengers]
        );
        assert!(a.unlock(Achievement::KindExplorer));
        assert!(!a.unlock(Achievement::KindExplorer));
        assert_eq!(a.unlocked().len(), 4);
    }
}

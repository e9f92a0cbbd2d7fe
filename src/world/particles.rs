use rand::rngs::StdRng;
use rand::Rng;

use crate::model::Vec2;

const LIFE_DECAY: f64 = 0.015;
const DRAG: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstKind {
    Launch,
    ManualSpawn,
    Achievement,
}

impl BurstKind {
    pub fn count(&self) -> usize {
        match self {
            BurstKind::Launch => 20,
            BurstKind::ManualSpawn => 8,
            BurstKind::Achievement => 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub position: Vec2,
    pub vx: f64,
    pub vy: f64,
    pub life: f64,
    pub kind: BurstKind,
}

/// Decorative particles, capped at `max`; the oldest are dropped first.
#[derive(Debug, Clone)]
pub struct ParticleField {
    particles: Vec<Particle>,
    max: usize,
}

impl ParticleField {
    pub fn new(max: usize) -> Self {
        Self { particles: Vec::new(), max }
    }

    pub fn burst(&mut self, kind: BurstKind, at: Vec2, rng: &mut StdRng) {
        for _ in 0..kind.count() {
            self.particles.push(Particle {
                position: at,
                vx: rng.gen_range(-4.0..4.0),
                vy: rng.gen_range(1.0..6.0),
                life: 1.0,
                kind,
            });
        }
        self.truncate();
    }

    pub fn update(&mut self) {
        for p in &mut self.particles {
            p.position.x += p.vx;
            p.position.y -= p.vy;
            p.life -= LIFE_DECAY;
            p.vy *= DRAG;
        }
    }

    /// Drop expired particles. Returns how many went.
    pub fn sweep(&mut self) -> usize {
        let before = self.particles.len();
        self.particles.retain(|p| p.life > 0.0);
        before - self.particles.len()
    }

    fn truncate(&mut self) {
        if self.particles.len() > self.max {
            let excess = self.particles.len() - self.max;
            self.particles.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn clear(&mut self) {
        self.particles.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter()
    }
}

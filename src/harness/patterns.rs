//! How simulated entities move and what inputs simulated clients send.

use std::f64::consts::TAU;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::rng::Rng;
use crate::{RewindError, Vector3};

/// Speed bound of a random-walk or strafing entity, in units per second.
const WALK_SPEED: f64 = 5.0;

/// Radius of the circle circling entities converge on.
const CIRCLE_RADIUS: f64 = 20.0;

/// Angular speed of the circle target, in radians per second.
const CIRCLE_ANGULAR_SPEED: f64 = 0.5;

/// Fraction of the remaining distance to the circle target covered per second.
const CIRCLE_PURSUIT: f64 = 0.1;

/// A named movement behavior.
///
/// Parses from (and serializes to) kebab-case names; `random`, `circle` and
/// `combat` are accepted as aliases.
///
/// ```
/// use rewindkit::MovementPattern;
///
/// assert_eq!("circle".parse::<MovementPattern>().unwrap(), MovementPattern::Circular);
/// assert_eq!("combat".parse::<MovementPattern>().unwrap(), MovementPattern::Zigzag);
/// assert_eq!(MovementPattern::RandomWalk.to_string(), "random-walk");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MovementPattern {
    /// A fresh random velocity every tick.
    #[serde(alias = "random")]
    RandomWalk,
    /// Circling the origin.
    #[default]
    #[serde(alias = "circle")]
    Circular,
    /// Not moving.
    Static,
    /// Strafing side to side while drifting forward.
    #[serde(alias = "combat")]
    Zigzag,
}

impl MovementPattern {
    /// Every pattern, in declaration order.
    pub const ALL: [Self; 4] = [Self::RandomWalk, Self::Circular, Self::Static, Self::Zigzag];

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RandomWalk => "random-walk",
            Self::Circular => "circular",
            Self::Static => "static",
            Self::Zigzag => "zigzag",
        }
    }

    /// Draws a per-entity phase so that entities sharing a pattern do not
    /// move in lockstep.
    pub fn phase<R: Rng + ?Sized>(rng: &mut R) -> f64 {
        rng.gen_range_f64(0.0, TAU)
    }

    /// Velocity of a server-side entity at `elapsed` seconds into the scenario.
    pub fn entity_velocity<R: Rng + ?Sized>(
        self,
        rng: &mut R,
        position: Vector3,
        elapsed: f64,
        phase: f64,
    ) -> Vector3 {
        match self {
            Self::RandomWalk => Vector3::new(
                rng.gen_range_f64(-WALK_SPEED, WALK_SPEED),
                0.0,
                rng.gen_range_f64(-WALK_SPEED, WALK_SPEED),
            ),
            Self::Circular => {
                let angle = elapsed * CIRCLE_ANGULAR_SPEED + phase;
                let target = Vector3::new(
                    CIRCLE_RADIUS * angle.cos(),
                    position.y,
                    CIRCLE_RADIUS * angle.sin(),
                );
                (target - position) * CIRCLE_PURSUIT
            }
            Self::Static => Vector3::ZERO,
            Self::Zigzag => Vector3::new(
                WALK_SPEED * (elapsed * 3.0 + phase).sin(),
                0.0,
                0.5 * WALK_SPEED * (elapsed * 0.25 + phase).cos(),
            ),
        }
    }

    /// Movement input of a client at `elapsed` seconds into the scenario.
    /// Components stay within `[-1, 1]`.
    pub fn input<R: Rng + ?Sized>(self, rng: &mut R, elapsed: f64) -> Vector3 {
        match self {
            Self::RandomWalk => Vector3::new(
                rng.gen_range_f64(-1.0, 1.0),
                0.0,
                rng.gen_range_f64(-1.0, 1.0),
            ),
            Self::Circular => {
                let angle = elapsed * 2.0;
                Vector3::new(angle.cos(), 0.0, angle.sin())
            }
            Self::Static => Vector3::ZERO,
            Self::Zigzag => Vector3::new((elapsed * 3.0).sin(), 0.0, 1.0),
        }
    }
}

impl std::fmt::Display for MovementPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementPattern {
    type Err = RewindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "random" | "random-walk" => Ok(Self::RandomWalk),
            "circle" | "circular" => Ok(Self::Circular),
            "static" => Ok(Self::Static),
            "zigzag" | "combat" => Ok(Self::Zigzag),
            other => Err(RewindError::InvalidConfig {
                info: format!(
                    "unknown movement pattern '{other}' (expected random-walk, circular, static or zigzag)"
                ),
            }),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]
mod tests {
    use super::*;
    use crate::rng::{Pcg32, SeedableRng};

    #[test]
    fn names_round_trip_through_from_str() {
        for pattern in MovementPattern::ALL {
            assert_eq!(pattern.as_str().parse::<MovementPattern>().unwrap(), pattern);
        }
        assert_eq!(
            "Random_Walk".parse::<MovementPattern>().unwrap(),
            MovementPattern::RandomWalk
        );
        assert!("teleport".parse::<MovementPattern>().is_err());
    }

    #[test]
    fn static_never_moves() {
        let mut rng = Pcg32::seed_from_u64(1);
        for t in 0..100 {
            let elapsed = f64::from(t) * 0.1;
            assert_eq!(
                MovementPattern::Static.entity_velocity(&mut rng, Vector3::new(3.0, 0.0, 4.0), elapsed, 1.0),
                Vector3::ZERO
            );
            assert_eq!(MovementPattern::Static.input(&mut rng, elapsed), Vector3::ZERO);
        }
    }

    #[test]
    fn random_walk_speed_is_bounded() {
        let mut rng = Pcg32::seed_from_u64(2);
        for _ in 0..1000 {
            let v = MovementPattern::RandomWalk.entity_velocity(&mut rng, Vector3::ZERO, 0.0, 0.0);
            assert!(v.x.abs() <= WALK_SPEED && v.z.abs() <= WALK_SPEED);
            assert_eq!(v.y, 0.0);
        }
    }

    #[test]
    fn circular_steers_toward_the_circle() {
        let mut rng = Pcg32::seed_from_u64(3);
        let v = MovementPattern::Circular.entity_velocity(&mut rng, Vector3::ZERO, 0.0, 0.0);
        assert!((v.x - CIRCLE_RADIUS * CIRCLE_PURSUIT).abs() < 1e-12);
        assert!(v.z.abs() < 1e-12);
    }

    #[test]
    fn inputs_stay_in_unit_range() {
        let mut rng = Pcg32::seed_from_u64(4);
        for pattern in MovementPattern::ALL {
            for t in 0..200 {
                let m = pattern.input(&mut rng, f64::from(t) / 60.0);
                assert!(m.x.abs() <= 1.0 && m.y.abs() <= 1.0 && m.z.abs() <= 1.0);
            }
        }
    }

    #[test]
    fn deterministic_patterns_ignore_the_rng() {
        let mut a = Pcg32::seed_from_u64(5);
        let mut b = Pcg32::seed_from_u64(6);
        for pattern in [MovementPattern::Circular, MovementPattern::Zigzag] {
            assert_eq!(pattern.input(&mut a, 1.25), pattern.input(&mut b, 1.25));
        }
    }
}

//! Target selection strategies for outside taps.

use std::f32::consts::TAU;
use std::fmt;
use std::str::FromStr;

use glam::Vec2;
use rand::Rng;
use serde::Deserialize;

/// How a requested point is turned into the next movement target.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behaviour {
    /// Walk to the point.
    Closer,
    /// Run away from it, toward the far side of the screen.
    Further,
    /// Wander somewhere unrelated to the point.
    #[default]
    Whimsical,
}

impl Behaviour {
    /// All behaviours in rotation order.
    pub const ALL: [Behaviour; 3] = [Behaviour::Closer, Behaviour::Further, Behaviour::Whimsical];

    pub fn index(self) -> usize {
        match self {
            Self::Closer => 0,
            Self::Further => 1,
            Self::Whimsical => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Closer => "closer",
            Self::Further => "further",
            Self::Whimsical => "whimsical",
        }
    }

    /// Target for a request at `point`, given the character's current
    /// `position` on a `display`-sized screen.
    pub fn pick_target<R: Rng + ?Sized>(
        self,
        point: Vec2,
        position: Vec2,
        display: Vec2,
        rng: &mut R,
    ) -> Vec2 {
        match self {
            Self::Closer => point,
            Self::Further => further_target(point, display, rng),
            Self::Whimsical => whimsical_target(position, display, rng),
        }
    }
}

impl fmt::Display for Behaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Behaviour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|b| b.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!("unknown behaviour '{s}' (expected closer, further or whimsical)")
            })
    }
}

/// Reflects `point` through the screen centre and heads for the far edge
/// along that line, stopping 90-100% of the way there.
pub fn further_target<R: Rng + ?Sized>(point: Vec2, display: Vec2, rng: &mut R) -> Vec2 {
    let (w, h) = (display.x, display.y);
    let mut d = display * 0.5 - point;
    if d == Vec2::ZERO {
        let angle = rng.gen::<f32>() * TAU;
        d = Vec2::new(angle.cos(), angle.sin());
    }
    if d.x < 0.0 {
        d = -d;
    }

    // Where the line through the centre with direction `d` meets the screen
    // border, on both sides.
    let (e1, e2) = if d.y > d.x * h / w || d.y < -d.x * h / w {
        let dxdy = d.x / d.y;
        (
            Vec2::new((w - h * dxdy) / 2.0, 0.0),
            Vec2::new((w + h * dxdy) / 2.0, h),
        )
    } else {
        let dydx = d.y / d.x;
        (
            Vec2::new(0.0, (h - w * dydx) / 2.0),
            Vec2::new(w, (h + w * dydx) / 2.0),
        )
    };
    let edge = if e1.distance(point) > e2.distance(point) {
        e1
    } else {
        e2
    };

    let r = 0.9 + rng.gen::<f32>() * 0.1;
    edge * r + point * (1.0 - r)
}

/// Random point on a ring around `position`, sometimes snapped to an edge,
/// then pulled back on screen.
pub fn whimsical_target<R: Rng + ?Sized>(position: Vec2, display: Vec2, rng: &mut R) -> Vec2 {
    let (w, h) = (display.x, display.y);
    let min_half = w.min(h) / 2.0;
    let radius = rng.gen::<f32>() * min_half + min_half;
    let angle = (rng.gen::<f32>() * 360.0).to_radians();
    let mut next = position + Vec2::new(angle.cos(), angle.sin()) * radius;

    if rng.gen::<f32>() < 0.15 {
        next.x = if rng.gen_bool(0.5) { 0.0 } else { w };
    }
    if rng.gen::<f32>() < 0.15 {
        next.y = if rng.gen_bool(0.5) { 0.0 } else { h };
    }

    if rng.gen::<f32>() < 0.15 {
        next.clamp(Vec2::ZERO, display)
    } else {
        Vec2::new(mirror_inside(next.x, w), mirror_inside(next.y, h)).clamp(Vec2::ZERO, display)
    }
}

fn mirror_inside(v: f32, extent: f32) -> f32 {
    if v < 0.0 {
        -v
    } else if v >= extent {
        extent * 2.0 - v - 1.0
    } else {
        v
    }
}

/// Uniform point on one of the four screen edges.
pub fn random_edge_point<R: Rng + ?Sized>(display: Vec2, rng: &mut R) -> Vec2 {
    let (w, h) = (display.x.max(1.0), display.y.max(1.0));
    match rng.gen_range(0..4) {
        0 => Vec2::new(0.0, rng.gen_range(0.0..h)),
        1 => Vec2::new(w, rng.gen_range(0.0..h)),
        2 => Vec2::new(rng.gen_range(0.0..w), 0.0),
        _ => Vec2::new(rng.gen_range(0.0..w), h),
    }
}

/// Simulated outside tap: 40% of taps land on an edge, the rest anywhere.
pub fn random_tap_point<R: Rng + ?Sized>(display: Vec2, rng: &mut R) -> Vec2 {
    if rng.gen::<f32>() < 0.4 {
        random_edge_point(display, rng)
    } else {
        let (w, h) = (display.x.max(1.0), display.y.max(1.0));
        Vec2::new(rng.gen_range(0.0..w), rng.gen_range(0.0..h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const DISPLAY: Vec2 = Vec2::new(400.0, 300.0);

    fn on_screen(p: Vec2) -> bool {
        p.x >= 0.0 && p.x <= DISPLAY.x && p.y >= 0.0 && p.y <= DISPLAY.y
    }

    #[test]
    fn closer_targets_the_point() {
        let mut rng = StdRng::seed_from_u64(1);
        let p = Vec2::new(12.0, 34.0);
        assert_eq!(Behaviour::Closer.pick_target(p, Vec2::ZERO, DISPLAY, &mut rng), p);
    }

    #[test]
    fn further_runs_to_opposite_side() {
        let mut rng = StdRng::seed_from_u64(2);
        // Tap left of centre: the far intersection is the right edge.
        let tap = Vec2::new(100.0, 150.0);
        for _ in 0..20 {
            let t = further_target(tap, DISPLAY, &mut rng);
            assert!(t.x >= 100.0 + 0.9 * 300.0 - 0.01, "x = {}", t.x);
            assert!(t.x <= 400.0 + 0.01);
            assert!((t.y - 150.0).abs() < 0.01);
        }
    }

    #[test]
    fn further_from_centre_picks_some_edge() {
        let mut rng = StdRng::seed_from_u64(3);
        let t = further_target(DISPLAY * 0.5, DISPLAY, &mut rng);
        assert!(on_screen(t));
        assert!(t.distance(DISPLAY * 0.5) > 100.0);
    }

    #[test]
    fn whimsical_stays_on_screen() {
        let mut rng = StdRng::seed_from_u64(4);
        for i in 0..500 {
            let pos = Vec2::new((i * 37 % 400) as f32, (i * 53 % 300) as f32);
            let t = whimsical_target(pos, DISPLAY, &mut rng);
            assert!(on_screen(t), "{t:?} from {pos:?}");
        }
    }

    #[test]
    fn taps_and_edges_land_on_screen() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut edge_hits = 0;
        for _ in 0..1000 {
            let e = random_edge_point(DISPLAY, &mut rng);
            assert!(on_screen(e));
            assert!(e.x == 0.0 || e.x == DISPLAY.x || e.y == 0.0 || e.y == DISPLAY.y);

            let t = random_tap_point(DISPLAY, &mut rng);
            assert!(on_screen(t));
            if t.x == 0.0 || t.x == DISPLAY.x || t.y == 0.0 || t.y == DISPLAY.y {
                edge_hits += 1;
            }
        }
        assert!((300..500).contains(&edge_hits), "edge hits {edge_hits}");
    }

    #[test]
    fn parses_labels_case_insensitively() {
        assert_eq!("Further".parse::<Behaviour>(), Ok(Behaviour::Further));
        assert_eq!("whimsical".parse::<Behaviour>(), Ok(Behaviour::Whimsical));
        assert!("sideways".parse::<Behaviour>().is_err());
        for b in Behaviour::ALL {
            assert_eq!(b.to_string().parse::<Behaviour>(), Ok(b));
            assert_eq!(Behaviour::ALL[b.index()], b);
        }
    }

    #[test]
    fn deserializes_lowercase() {
        let b: Behaviour = serde_json::from_str("\"closer\"").unwrap();
        assert_eq!(b, Behaviour::Closer);
        assert_eq!(Behaviour::default(), Behaviour::Whimsical);
    }
}

/// Axis-aligned bounding box in `[lng, lat]` space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb2 {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Aabb2 {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Self {
        Aabb2 { min, max }
    }

    /// Smallest box covering `points`; `None` when there are no finite points.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a [f64; 2]>) -> Option<Self> {
        let mut out: Option<Aabb2> = None;
        for p in points {
            if !p[0].is_finite() || !p[1].is_finite() {
                continue;
            }
            out = Some(match out {
                None => Aabb2::new(*p, *p),
                Some(b) => Aabb2::new(
                    [b.min[0].min(p[0]), b.min[1].min(p[1])],
                    [b.max[0].max(p[0]), b.max[1].max(p[1])],
                ),
            });
        }
        out
    }

    pub fn center(&self) -> [f64; 2] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
        ]
    }
}

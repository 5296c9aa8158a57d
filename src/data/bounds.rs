use std::f64::consts::FRAC_PI_4;

const EQUATOR_RADIUS: f64 = 6378137.0;

/// Geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pos {
    pub lat: f64,
    pub lon: f64,
}

impl Pos {
    pub fn new(lat: f64, lon: f64) -> Self {
        Pos { lat, lon }
    }

    pub fn valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Projected local coordinate relative to the center of the bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LPos {
    pub x: i32,
    pub y: i32,
}

impl LPos {
    pub fn new(x: i32, y: i32) -> Self {
        LPos { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PosArea {
    pub min: Pos,
    pub max: Pos,
}

impl PosArea {
    pub fn new(min: Pos, max: Pos) -> Self {
        PosArea { min, max }
    }

    pub fn contains(&self, pos: Pos) -> bool {
        (self.min.lat..=self.max.lat).contains(&pos.lat) && (self.min.lon..=self.max.lon).contains(&pos.lon)
    }

    pub fn center(&self) -> Pos {
        Pos::new((self.max.lat + self.min.lat) / 2.0, (self.max.lon + self.min.lon) / 2.0)
    }
}

fn mercator(pos: Pos) -> (f64, f64) {
    let x = EQUATOR_RADIUS * pos.lon.to_radians();
    let y = EQUATOR_RADIUS * (FRAC_PI_4 + pos.lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// Bounding box of the loaded data and the projection derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    pub ll: PosArea,
    center: (f64, f64),
    scale: f64,
    pub min: LPos,
    pub max: LPos,
}

impl Bounds {
    /// Set up the projection for `area`. Returns false and leaves `self`
    /// untouched if the area is not a valid lat/lon box.
    pub fn init(&mut self, area: PosArea) -> bool {
        if !area.min.valid() || !area.max.valid() || area.min.lat > area.max.lat || area.min.lon > area.max.lon {
            return false;
        }

        let center = area.center();
        self.ll = area;
        self.center = mercator(center);
        // compensate the stretching of the mercator projection
        self.scale = center.lat.to_radians().cos();
        self.min = self.pos2lpos(area.min);
        self.max = self.pos2lpos(area.max);
        // y grows southwards
        std::mem::swap(&mut self.min.y, &mut self.max.y);
        true
    }

    pub fn new(area: PosArea) -> Option<Self> {
        let mut bounds = Bounds::default();
        bounds.init(area).then_some(bounds)
    }

    pub fn is_valid(&self) -> bool {
        self.scale > 0.0
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn pos2lpos(&self, pos: Pos) -> LPos {
        let (x, y) = mercator(pos);
        LPos {
            x: ((x - self.center.0) * self.scale).round() as i32,
            y: ((self.center.1 - y) * self.scale).round() as i32,
        }
    }

    pub fn lpos2pos(&self, lpos: LPos) -> Pos {
        let x = f64::from(lpos.x) / self.scale + self.center.0;
        let y = -f64::from(lpos.y) / self.scale + self.center.1;
        Pos {
            lat: (2.0 * (y / EQUATOR_RADIUS).exp().atan() - 2.0 * FRAC_PI_4).to_degrees(),
            lon: (x / EQUATOR_RADIUS).to_degrees(),
        }
    }

    pub fn contains(&self, lpos: LPos) -> bool {
        (self.min.x..=self.max.x).contains(&lpos.x) && (self.min.y..=self.max.y).contains(&lpos.y)
    }
}

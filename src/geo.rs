const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Great-circle distance in metres (haversine).
pub fn distance_m(a: Point, b: Point) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FenceCheck {
    pub verified: bool,
    pub distance: f64,
}

pub fn check_fence(center: Point, radius_m: f64, at: Point) -> FenceCheck {
    let distance = distance_m(center, at);
    FenceCheck {
        verified: distance <= radius_m,
        distance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero() {
        let p = Point::new(19.0760, 72.8777);
        assert_eq!(distance_m(p, p), 0.0);
    }

    #[test]
    fn one_degree_latitude_is_about_111km() {
        let d = distance_m(Point::new(0.0, 0.0), Point::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 1.0, "got {d}");
    }

    #[test]
    fn fence_includes_boundary_neighbourhood() {
        let center = Point::new(19.8762, 74.4810);
        // ~55m north
        let near = Point::new(19.8767, 74.4810);
        let far = Point::new(19.8862, 74.4810);
        assert!(check_fence(center, 100.0, near).verified);
        let out = check_fence(center, 100.0, far);
        assert!(!out.verified);
        assert!(out.distance > 1000.0);
    }

    #[test]
    fn validates_ranges() {
        assert!(Point::new(90.0, -180.0).is_valid());
        assert!(!Point::new(91.0, 0.0).is_valid());
    }
}

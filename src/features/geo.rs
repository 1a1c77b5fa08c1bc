//! Cardholder-to-merchant distance on the WGS-84 ellipsoid.

use crate::error::ValidationError;
use crate::types::Coordinates;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);
const MEAN_EARTH_RADIUS_KM: f64 = 6_371.008_8;

/// Geodesic distance using Vincenty's inverse formula.
///
/// Nearly antipodal pairs, where the iteration does not converge, fall back to
/// the haversine distance on the mean-radius sphere.
#[derive(Debug, Clone)]
pub struct GeoDistanceCalculator {
    max_iterations: usize,
    tolerance: f64,
}

impl GeoDistanceCalculator {
    pub fn new() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-12,
        }
    }

    /// Validate both points, then compute the distance in kilometers.
    pub fn distance_checked(&self, home: Coordinates, merchant: Coordinates) -> Result<f64, ValidationError> {
        let home = Coordinates::new("home", home.lat, home.lon)?;
        let merchant = Coordinates::new("merchant", merchant.lat, merchant.lon)?;
        Ok(self.distance_km(home, merchant))
    }

    /// Distance in kilometers between two already-validated points.
    pub fn distance_km(&self, a: Coordinates, b: Coordinates) -> f64 {
        if a == b {
            return 0.0;
        }
        self.vincenty_km(a, b).unwrap_or_else(|| haversine_km(a, b))
    }

    fn vincenty_km(&self, a: Coordinates, b: Coordinates) -> Option<f64> {
        let l = (b.lon - a.lon).to_radians();
        let u1 = ((1.0 - WGS84_F) * a.lat.to_radians().tan()).atan();
        let u2 = ((1.0 - WGS84_F) * b.lat.to_radians().tan()).atan();
        let (sin_u1, cos_u1) = u1.sin_cos();
        let (sin_u2, cos_u2) = u2.sin_cos();

        let mut lambda = l;
        for _ in 0..self.max_iterations {
            let (sin_lambda, cos_lambda) = lambda.sin_cos();
            let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
                + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
            .sqrt();
            if sin_sigma == 0.0 {
                return Some(0.0);
            }
            let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
            let sigma = sin_sigma.atan2(cos_sigma);
            let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
            let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
            // equatorial line: cos_sq_alpha == 0
            let cos_2sigma_m = if cos_sq_alpha != 0.0 {
                cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
            } else {
                0.0
            };
            let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
            let previous = lambda;
            lambda = l
                + (1.0 - c)
                    * WGS84_F
                    * sin_alpha
                    * (sigma
                        + c * sin_sigma
                            * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

            if (lambda - previous).abs() < self.tolerance {
                let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - WGS84_B.powi(2)) / WGS84_B.powi(2);
                let big_a =
                    1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
                let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
                let delta_sigma = big_b
                    * sin_sigma
                    * (cos_2sigma_m
                        + big_b / 4.0
                            * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                                - big_b / 6.0
                                    * cos_2sigma_m
                                    * (-3.0 + 4.0 * sin_sigma.powi(2))
                                    * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
                let meters = WGS84_B * big_a * (sigma - delta_sigma);
                return Some(meters / 1000.0);
            }
        }
        None
    }
}

impl Default for GeoDistanceCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Great-circle distance on a sphere of mean Earth radius, in kilometers.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * MEAN_EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn point(lat: f64, lon: f64) -> Coordinates {
        Coordinates { lat, lon }
    }

    #[test]
    fn test_identical_points_are_zero() {
        let calc = GeoDistanceCalculator::new();
        let p = point(36.08, -81.18);
        assert_eq!(calc.distance_km(p, p), 0.0);
    }

    #[test]
    fn test_known_city_pair() {
        // Newport, RI to Cleveland, OH: 866.455 km on WGS-84
        let calc = GeoDistanceCalculator::new();
        let d = calc.distance_km(point(41.49008, -71.312796), point(41.499498, -81.695391));
        assert!((d - 866.455).abs() / 866.455 < 0.005, "distance {d}");
    }

    #[test]
    fn test_one_degree_along_equator() {
        let calc = GeoDistanceCalculator::new();
        let d = calc.distance_km(point(0.0, 0.0), point(0.0, 1.0));
        assert!((d - 111.319_49).abs() < 1e-3, "distance {d}");
    }

    #[test]
    fn test_antipodal_falls_back_to_sphere() {
        let calc = GeoDistanceCalculator::new();
        let d = calc.distance_km(point(0.0, 0.0), point(0.5, 179.7));
        assert!(d.is_finite());
        assert!(d > 19_000.0 && d < 20_100.0, "distance {d}");
    }

    #[test]
    fn test_invalid_coordinates_rejected() {
        let calc = GeoDistanceCalculator::new();
        let err = calc
            .distance_checked(point(45.0, 10.0), point(12.0, 181.0))
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::CoordinateOutOfRange { field: "merchant", .. }
        ));
    }

    proptest! {
        #[test]
        fn prop_distance_is_symmetric_and_close_to_sphere(
            lat1 in -80.0f64..80.0,
            lon1 in -179.0f64..179.0,
            dlat in -5.0f64..5.0,
            dlon in -5.0f64..5.0,
        ) {
            let calc = GeoDistanceCalculator::new();
            let a = point(lat1, lon1);
            let b = point((lat1 + dlat).clamp(-90.0, 90.0), (lon1 + dlon).clamp(-180.0, 180.0));

            let ab = calc.distance_km(a, b);
            let ba = calc.distance_km(b, a);
            prop_assert!((ab - ba).abs() <= 1e-6 * ab.max(1.0));
            prop_assert_eq!(calc.distance_km(a, a), 0.0);

            if ab > 1.0 {
                let sphere = haversine_km(a, b);
                prop_assert!((ab - sphere).abs() / ab < 0.01);
            }
        }
    }
}

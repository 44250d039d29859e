//! Signed indicator field over an oriented point set.
//!
//! The field approximates signed distance to the sampled surface: for a
//! query point it blends the plane distances `(q - p_i) . n_i` of the
//! nearest oriented samples with Gaussian weights. Negative values are
//! inside the surface, positive outside, and the zero level set is the
//! surface estimate that the extraction stage contours.

use nalgebra::{Point3, Vector3};

use crate::cloud::{OrientedCloud, OrientedPoint};
use crate::spatial::SpatialIndex;

/// Below this total weight the Gaussian blend is numerically meaningless
/// and the field falls back to the nearest sample's plane distance.
const MIN_BLEND_WEIGHT: f64 = 1e-12;

/// Smoothed signed indicator function over oriented samples.
pub(crate) struct IndicatorField {
    index: SpatialIndex,
    samples: Vec<OrientedPoint>,
    neighbors: usize,
    /// Gaussian bandwidth, squared and doubled for the exponent.
    two_sigma_sq: f64,
    center: Point3<f64>,
    domain_radius: f64,
}

impl IndicatorField {
    /// Builds the field over the cloud's samples.
    ///
    /// `bandwidth` controls how far each sample's plane influences the blend;
    /// `domain_radius` bounds the region of interest around `center`, beyond
    /// which queries are unconditionally outside.
    pub(crate) fn new(
        cloud: &OrientedCloud,
        neighbors: usize,
        bandwidth: f64,
        center: Point3<f64>,
        domain_radius: f64,
    ) -> Self {
        let positions = cloud.positions();
        Self {
            index: SpatialIndex::build(&positions),
            samples: cloud.points.clone(),
            neighbors,
            two_sigma_sq: 2.0 * bandwidth * bandwidth,
            center,
            domain_radius,
        }
    }

    /// Field value at a query point. Negative inside, positive outside.
    pub(crate) fn value(&self, q: &Point3<f64>) -> f64 {
        let from_center = (q - self.center).norm();
        if from_center > self.domain_radius {
            return from_center - self.domain_radius;
        }

        let nearest = self.index.nearest_n(q, self.neighbors);
        let mut weight_sum = 0.0;
        let mut value_sum = 0.0;
        for n in &nearest {
            let sample = &self.samples[n.index];
            let w = (-n.distance * n.distance / self.two_sigma_sq).exp();
            weight_sum += w;
            value_sum += w * (q - sample.position).dot(&sample.normal);
        }

        if weight_sum < MIN_BLEND_WEIGHT {
            // Far from every sample: the nearest plane distance keeps the
            // sign meaningful without the blend.
            return nearest.first().map_or(f64::INFINITY, |n| {
                let sample = &self.samples[n.index];
                (q - sample.position).dot(&sample.normal)
            });
        }

        value_sum / weight_sum
    }

    /// Numerical gradient by central differences with step `h`.
    ///
    /// Points from inside to outside wherever the field behaves like a
    /// signed distance.
    pub(crate) fn gradient(&self, q: &Point3<f64>, h: f64) -> Vector3<f64> {
        let dx = self.value(&Point3::new(q.x + h, q.y, q.z))
            - self.value(&Point3::new(q.x - h, q.y, q.z));
        let dy = self.value(&Point3::new(q.x, q.y + h, q.z))
            - self.value(&Point3::new(q.x, q.y - h, q.z));
        let dz = self.value(&Point3::new(q.x, q.y, q.z + h))
            - self.value(&Point3::new(q.x, q.y, q.z - h));
        Vector3::new(dx, dy, dz) / (2.0 * h)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn make_sphere_samples(n: usize, radius: f64) -> OrientedCloud {
        let golden = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
        let points: Vec<_> = (0..n)
            .map(|i| {
                let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                let r = (1.0 - y * y).sqrt();
                let theta = golden * i as f64;
                let dir = Vector3::new(r * theta.cos(), y, r * theta.sin());
                OrientedPoint::new(Point3::from(dir * radius), dir)
            })
            .collect();
        OrientedCloud::from_points(points)
    }

    fn sphere_field(n: usize) -> IndicatorField {
        let cloud = make_sphere_samples(n, 1.0);
        IndicatorField::new(&cloud, 8, 0.2, Point3::origin(), 5.0)
    }

    #[test]
    fn test_sign_inside_and_outside() {
        let field = sphere_field(400);
        assert!(field.value(&Point3::origin()) < 0.0);
        assert!(field.value(&Point3::new(0.5, 0.0, 0.0)) < 0.0);
        assert!(field.value(&Point3::new(1.5, 0.0, 0.0)) > 0.0);
        assert!(field.value(&Point3::new(0.0, -2.0, 0.0)) > 0.0);
    }

    #[test]
    fn test_near_zero_on_surface() {
        let field = sphere_field(400);
        let on_surface = field.value(&Point3::new(1.0, 0.0, 0.0));
        assert!(on_surface.abs() < 0.05, "surface value {on_surface}");
    }

    #[test]
    fn test_far_query_positive() {
        let field = sphere_field(100);
        assert!(field.value(&Point3::new(100.0, 0.0, 0.0)) > 0.0);
    }

    #[test]
    fn test_gradient_points_outward() {
        let field = sphere_field(400);
        let q = Point3::new(0.9, 0.0, 0.0);
        let g = field.gradient(&q, 0.01);
        // Radially outward at this query.
        assert!(g.x > 0.0, "gradient {g:?}");
        assert!(g.normalize().dot(&Vector3::x()) > 0.8);
    }
}

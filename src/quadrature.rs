/// Gauss quadrature rule on the reference square [-1, 1] x [-1, 1]
pub struct QuadQuadrature {
    /// Integration point coordinates (xi, eta)
    pub points: Vec<[f64; 2]>,
    /// Integration weights, summing to the reference area 4
    pub weights: Vec<f64>,
}

impl QuadQuadrature {
    /// 2x2 Gauss-Legendre product rule, exact for bicubic polynomials
    pub fn two_by_two() -> Self {
        let a = 1.0 / f64::sqrt(3.0);

        let mut points = Vec::new();
        let mut weights = Vec::new();
        for xi in [-a, a] {
            for eta in [-a, a] {
                points.push([xi, eta]);
                weights.push(1.0);
            }
        }

        QuadQuadrature { points, weights }
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }
}

/// Gauss quadrature rule on the reference line segment [-1, 1]
pub struct LineQuadrature {
    pub points: Vec<f64>,
    pub weights: Vec<f64>,
}

impl LineQuadrature {
    /// 2-point rule, exact for cubic polynomials
    pub fn two_point() -> Self {
        let a = 1.0 / f64::sqrt(3.0);
        LineQuadrature {
            points: vec![-a, a],
            weights: vec![1.0, 1.0],
        }
    }

    /// 3-point rule, exact for quintic polynomials
    pub fn three_point() -> Self {
        let a = f64::sqrt(3.0 / 5.0);
        LineQuadrature {
            points: vec![-a, 0.0, a],
            weights: vec![5.0 / 9.0, 8.0 / 9.0, 5.0 / 9.0],
        }
    }
}

//! Affine transforms in PDF row-vector convention

use crate::pdf_number;

/// 2D affine matrix `[a b c d e f]`, mapping `(x, y)` to
/// `(a*x + c*y + e, b*x + d*y + f)` like the PDF `cm` operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn scaling(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Build from six `cm`/`Tm` style operands
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [a, b, c, d, e, f] => Some(Self::new(*a, *b, *c, *d, *e, *f)),
            _ => None,
        }
    }

    /// `self` applied first, then `rhs`
    pub fn concat(self, rhs: Self) -> Self {
        Self {
            a: self.a * rhs.a + self.b * rhs.c,
            b: self.a * rhs.b + self.b * rhs.d,
            c: self.c * rhs.a + self.d * rhs.c,
            d: self.c * rhs.b + self.d * rhs.d,
            e: self.e * rhs.a + self.f * rhs.c + rhs.e,
            f: self.e * rhs.b + self.f * rhs.d + rhs.f,
        }
    }

    pub fn transform_point(self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    pub fn determinant(self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// Inverse transform, `None` when the matrix is singular
    pub fn invert(self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Self {
            a,
            b,
            c,
            d,
            e: -(self.e * a + self.f * c),
            f: -(self.e * b + self.f * d),
        })
    }

    /// Average scale factor, used for line widths
    pub fn expansion(self) -> f64 {
        self.determinant().abs().sqrt()
    }

    pub fn is_identity(self) -> bool {
        self == Self::identity()
    }

    /// Operands for a `cm` operator, e.g. `1 0 0 -1 0 842 cm`
    pub fn to_operator(self, operator: &str) -> String {
        format!(
            "{} {} {} {} {} {} {operator}",
            pdf_number(self.a),
            pdf_number(self.b),
            pdf_number(self.c),
            pdf_number(self.d),
            pdf_number(self.e),
            pdf_number(self.f)
        )
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

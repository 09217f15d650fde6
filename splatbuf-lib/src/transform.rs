use glam::{Affine3A, Mat3A, Quat, Vec3};

/// Real-SH rotation for degrees 1 and 2, derived from the 3x3 part of a world
/// transform. Orthogonality of the input is not verified.
///
/// Band 1 is three 3-vector rows; band 2 is five 5-vector rows built from
/// pairwise products of the band-1 rows. The band-2 construction maps the
/// stored coefficient basis directly and is not the textbook SH rotation
/// matrix; keep the expressions as written.
#[derive(Clone, Copy, Debug)]
pub struct ShRotation {
    band1: [[f32; 3]; 3],
    band2: [[f32; 5]; 5],
}

impl ShRotation {
    pub fn from_affine(transform: &Affine3A) -> Self {
        Self::from_mat3(&transform.matrix3)
    }

    pub fn from_mat3(m: &Mat3A) -> Self {
        // m[r][c] in row-major terms; glam stores columns.
        let e = |r: usize, c: usize| m.col(c)[r];

        let sh11 = [e(1, 1), -e(2, 1), e(0, 1)];
        let sh12 = [-e(1, 2), e(2, 2), -e(0, 2)];
        let sh13 = [e(1, 0), -e(2, 0), e(0, 0)];

        let k01_04 = (1.0f32 / 4.0).sqrt();
        let k03_04 = (3.0f32 / 4.0).sqrt();
        let k01_03 = (1.0f32 / 3.0).sqrt();
        let k04_03 = (4.0f32 / 3.0).sqrt();
        let k01_12 = (1.0f32 / 12.0).sqrt();

        let sh21 = [
            k01_04
                * ((sh13[2] * sh11[0] + sh13[0] * sh11[2])
                    + (sh11[2] * sh13[0] + sh11[0] * sh13[2])),
            sh13[1] * sh11[0] + sh11[1] * sh13[0],
            k03_04 * (sh13[1] * sh11[1] + sh11[1] * sh13[1]),
            sh13[1] * sh11[2] + sh11[1] * sh13[2],
            k01_04
                * ((sh13[2] * sh11[2] - sh13[0] * sh11[0])
                    + (sh11[2] * sh13[2] - sh11[0] * sh13[0])),
        ];
        let sh22 = [
            k01_04
                * ((sh12[2] * sh11[0] + sh12[0] * sh11[2])
                    + (sh11[2] * sh12[0] + sh11[0] * sh12[2])),
            sh12[1] * sh11[0] + sh11[1] * sh12[0],
            k03_04 * (sh12[1] * sh11[1] + sh11[1] * sh12[1]),
            sh12[1] * sh11[2] + sh11[1] * sh12[2],
            k01_04
                * ((sh12[2] * sh11[2] - sh12[0] * sh11[0])
                    + (sh11[2] * sh12[2] - sh11[0] * sh12[0])),
        ];
        let sh23 = [
            k01_03 * (sh12[2] * sh12[0] + sh12[0] * sh12[2])
                - k01_12
                    * ((sh13[2] * sh13[0] + sh13[0] * sh13[2])
                        + (sh11[2] * sh11[0] + sh11[0] * sh11[2])),
            k04_03 * sh12[1] * sh12[0] - k01_03 * (sh13[1] * sh13[0] + sh11[1] * sh11[0]),
            sh12[1] * sh12[1] - k01_04 * (sh13[1] * sh13[1] + sh11[1] * sh11[1]),
            k04_03 * sh12[1] * sh12[2] - k01_03 * (sh13[1] * sh13[2] + sh11[1] * sh11[2]),
            k01_03 * (sh12[2] * sh12[2] - sh12[0] * sh12[0])
                - k01_12
                    * ((sh13[2] * sh13[2] - sh13[0] * sh13[0])
                        + (sh11[2] * sh11[2] - sh11[0] * sh11[0])),
        ];
        let sh24 = [
            k01_04
                * ((sh12[2] * sh13[0] + sh12[0] * sh13[2])
                    + (sh13[2] * sh12[0] + sh13[0] * sh12[2])),
            sh12[1] * sh13[0] + sh13[1] * sh12[0],
            k03_04 * (sh12[1] * sh13[1] + sh13[1] * sh12[1]),
            sh12[1] * sh13[2] + sh13[1] * sh12[2],
            k01_04
                * ((sh12[2] * sh13[2] - sh12[0] * sh13[0])
                    + (sh13[2] * sh12[2] - sh13[0] * sh12[0])),
        ];
        let sh25 = [
            k01_04
                * ((sh13[2] * sh13[0] + sh13[0] * sh13[2])
                    - (sh11[2] * sh11[0] + sh11[0] * sh11[2])),
            sh13[1] * sh13[0] - sh11[1] * sh11[0],
            k03_04 * (sh13[1] * sh13[1] - sh11[1] * sh11[1]),
            sh13[1] * sh13[2] - sh11[1] * sh11[2],
            k01_04
                * ((sh13[2] * sh13[2] - sh13[0] * sh13[0])
                    - (sh11[2] * sh11[2] - sh11[0] * sh11[0])),
        ];

        Self {
            band1: [sh11, sh12, sh13],
            band2: [sh21, sh22, sh23, sh24, sh25],
        }
    }

    /// Rotate one band-1 block (channel-major: R0..R2, G0..G2, B0..B2).
    pub fn rotate_band1(&self, sh: &[f32], out: &mut [f32]) {
        for channel in 0..3 {
            let base = channel * 3;
            for (r, row) in self.band1.iter().enumerate() {
                out[base + r] =
                    row[0] * sh[base] + row[1] * sh[base + 1] + row[2] * sh[base + 2];
            }
        }
    }

    /// Rotate one band-2 block (channel-major: R3..R7, G3..G7, B3..B7).
    pub fn rotate_band2(&self, sh: &[f32], out: &mut [f32]) {
        for channel in 0..3 {
            let base = channel * 5;
            for (r, row) in self.band2.iter().enumerate() {
                let mut acc = 0.0;
                for (k, coeff) in row.iter().enumerate() {
                    acc += coeff * sh[base + k];
                }
                out[base + r] = acc;
            }
        }
    }
}

/// Upper-triangular covariance of one splat, in the element order
/// (0,0),(1,0),(2,0),(1,1),(2,1),(2,2). Sigma = M * M^T with M = R * S;
/// conjugated by `transform` when given.
pub(crate) fn splat_covariance(
    scale: [f32; 3],
    rotation_xyzw: [f32; 4],
    transform: Option<&Mat3A>,
) -> [f32; 6] {
    let q = Quat::from_xyzw(
        rotation_xyzw[0],
        rotation_xyzw[1],
        rotation_xyzw[2],
        rotation_xyzw[3],
    );
    let m = Mat3A::from_quat(q) * Mat3A::from_diagonal(Vec3::from(scale));
    let mut cov = m * m.transpose();
    if let Some(t) = transform {
        cov = *t * cov * t.transpose();
    }
    [
        cov.x_axis.x,
        cov.x_axis.y,
        cov.x_axis.z,
        cov.y_axis.y,
        cov.y_axis.z,
        cov.z_axis.z,
    ]
}

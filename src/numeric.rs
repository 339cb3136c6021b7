//! Shared numerical utilities
//!
//! Log-gamma, Cholesky factorisation of symmetric positive-definite
//! matrices, and the seeded samplers used by simulation and MCMC. All
//! sampling draws from the caller's generator so runs stay reproducible.

use rand::Rng;

/// Natural log of the gamma function (Lanczos approximation, g = 7)
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // reflection formula
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut sum = COEFFICIENTS[0];
    for (i, coefficient) in COEFFICIENTS.iter().enumerate().skip(1) {
        sum += coefficient / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + sum.ln()
}

/// Lower-triangular Cholesky factor of a symmetric positive-definite
/// matrix, or None when the matrix is not positive definite.
pub fn cholesky_decompose(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    if n == 0 || matrix.iter().any(|row| row.len() != n) {
        return None;
    }
    let mut lower = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += lower[i][k] * lower[j][k];
            }
            if i == j {
                let diagonal = matrix[i][i] - sum;
                if diagonal <= 0.0 {
                    return None;
                }
                lower[i][j] = diagonal.sqrt();
            } else {
                lower[i][j] = (matrix[i][j] - sum) / lower[j][j];
            }
        }
    }
    Some(lower)
}

/// Solve `L L' x = b` given the lower Cholesky factor
pub fn cholesky_solve(lower: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = lower.len();
    // forward substitution L y = b
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= lower[i][j] * y[j];
        }
        y[i] = sum / lower[i][i];
    }
    // back substitution L' x = y
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in i + 1..n {
            sum -= lower[j][i] * x[j];
        }
        x[i] = sum / lower[i][i];
    }
    x
}

/// Inverse of a symmetric positive-definite matrix via its Cholesky factor
pub fn invert_spd(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let lower = cholesky_decompose(matrix)?;
    let n = matrix.len();
    let mut inverse = vec![vec![0.0; n]; n];
    for column in 0..n {
        let mut e = vec![0.0; n];
        e[column] = 1.0;
        let x = cholesky_solve(&lower, &e);
        for row in 0..n {
            inverse[row][column] = x[row];
        }
    }
    Some(inverse)
}

/// Log-determinant of an SPD matrix from its Cholesky factor
pub fn ln_determinant(lower: &[Vec<f64>]) -> f64 {
    2.0 * lower.iter().enumerate().map(|(i, row)| row[i].ln()).sum::<f64>()
}

/// Standard normal draw (Marsaglia polar method)
pub fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    loop {
        let u: f64 = rng.random::<f64>() * 2.0 - 1.0;
        let v: f64 = rng.random::<f64>() * 2.0 - 1.0;
        let s = u * u + v * v;
        if s > 0.0 && s < 1.0 {
            return u * (-2.0 * s.ln() / s).sqrt();
        }
    }
}

/// Chi-square draw with integer degrees of freedom
pub fn chi_square<R: Rng>(rng: &mut R, df: u32) -> f64 {
    (0..df)
        .map(|_| {
            let z = standard_normal(rng);
            z * z
        })
        .sum()
}

/// Gamma(shape, 1) draw (Marsaglia-Tsang squeeze method)
pub fn gamma_sample<R: Rng>(rng: &mut R, shape: f64) -> f64 {
    if shape < 1.0 {
        // boost the shape and correct with a uniform power
        let u: f64 = rng.random();
        return gamma_sample(rng, shape + 1.0) * u.powf(1.0 / shape);
    }
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let z = standard_normal(rng);
        let v = (1.0 + c * z).powi(3);
        if v <= 0.0 {
            continue;
        }
        let u: f64 = rng.random();
        if u.ln() < 0.5 * z * z + d - d * v + d * v.ln() {
            return d * v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn test_ln_gamma_matches_factorials() {
        // ln_gamma(n+1) = ln(n!)
        assert_relative_eq!(ln_gamma(1.0), 0.0, epsilon = 1e-10);
        assert_relative_eq!(ln_gamma(5.0), 24.0_f64.ln(), epsilon = 1e-10);
        assert_relative_eq!(ln_gamma(11.0), 3_628_800.0_f64.ln(), epsilon = 1e-8);
        // half-integer identity: gamma(0.5) = sqrt(pi)
        assert_relative_eq!(
            ln_gamma(0.5),
            std::f64::consts::PI.sqrt().ln(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_cholesky_roundtrip() {
        let matrix = vec![
            vec![4.0, 2.0, 0.6],
            vec![2.0, 2.0, 0.5],
            vec![0.6, 0.5, 1.0],
        ];
        let lower = cholesky_decompose(&matrix).unwrap();
        // L L' reproduces the matrix
        for i in 0..3 {
            for j in 0..3 {
                let mut sum = 0.0;
                for k in 0..3 {
                    sum += lower[i][k] * lower[j][k];
                }
                assert_relative_eq!(sum, matrix[i][j], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let matrix = vec![vec![1.0, 2.0], vec![2.0, 1.0]];
        assert!(cholesky_decompose(&matrix).is_none());
    }

    #[test]
    fn test_spd_inverse() {
        let matrix = vec![vec![2.0, 0.5], vec![0.5, 1.0]];
        let inverse = invert_spd(&matrix).unwrap();
        // A * A^-1 = I
        for i in 0..2 {
            for j in 0..2 {
                let mut sum = 0.0;
                for k in 0..2 {
                    sum += matrix[i][k] * inverse[k][j];
                }
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(sum, expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_samplers_are_deterministic_by_seed() {
        let mut a = ChaCha12Rng::seed_from_u64(42);
        let mut b = ChaCha12Rng::seed_from_u64(42);
        for _ in 0..10 {
            assert_eq!(standard_normal(&mut a), standard_normal(&mut b));
        }
    }

    #[test]
    fn test_standard_normal_moments() {
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| standard_normal(&mut rng)).collect();
        let mean: f64 = draws.iter().sum::<f64>() / n as f64;
        let variance: f64 = draws.iter().map(|z| (z - mean) * (z - mean)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.03, "mean {}", mean);
        assert!((variance - 1.0).abs() < 0.05, "variance {}", variance);
    }

    #[test]
    fn test_gamma_sample_mean() {
        let mut rng = ChaCha12Rng::seed_from_u64(11);
        let shape = 4.5;
        let n = 20_000;
        let mean: f64 = (0..n).map(|_| gamma_sample(&mut rng, shape)).sum::<f64>() / n as f64;
        assert!((mean - shape).abs() < 0.1, "mean {}", mean);
    }
}

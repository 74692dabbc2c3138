// crates/cml_terrain/src/interpolation/solver.rs

//! 线性方程组求解接口
//!
//! 克里金只依赖“分解一次、多次求解”这一能力，具体实现可替换。
//! 默认实现为 nalgebra 的部分主元 LU 分解，求解后做残差校验，
//! 病态到残差不可接受的系统视为奇异。

use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};
use std::fmt::Debug;

/// 已分解的线性系统
pub trait FactoredSystem: Send + Sync + Debug {
    /// 系统维数
    fn dim(&self) -> usize;

    /// 求解 `A x = b`，奇异或数值失败时返回 `None`
    fn solve(&self, rhs: &DVector<f64>) -> Option<DVector<f64>>;
}

/// 线性求解器
pub trait LinearSolver: Send + Sync + Debug {
    /// 分解矩阵，奇异时返回 `None`
    fn factorize(&self, matrix: DMatrix<f64>) -> Option<Box<dyn FactoredSystem>>;

    /// 求解器名称
    fn name(&self) -> &'static str;
}

/// LU 分解求解器
#[derive(Debug, Clone, Copy)]
pub struct LuSolver {
    /// 相对残差容限
    pub residual_tolerance: f64,
}

impl Default for LuSolver {
    fn default() -> Self {
        Self {
            residual_tolerance: 1e-6,
        }
    }
}

impl LinearSolver for LuSolver {
    fn factorize(&self, matrix: DMatrix<f64>) -> Option<Box<dyn FactoredSystem>> {
        if !matrix.is_square() || matrix.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let lu = matrix.clone().lu();
        if !lu.is_invertible() {
            return None;
        }
        Some(Box::new(LuSystem {
            lu,
            matrix,
            residual_tolerance: self.residual_tolerance,
        }))
    }

    fn name(&self) -> &'static str {
        "lu"
    }
}

/// LU 分解结果
#[derive(Debug)]
struct LuSystem {
    lu: LU<f64, Dyn, Dyn>,
    matrix: DMatrix<f64>,
    residual_tolerance: f64,
}

impl FactoredSystem for LuSystem {
    fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    fn solve(&self, rhs: &DVector<f64>) -> Option<DVector<f64>> {
        let x = self.lu.solve(rhs)?;
        if x.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let residual = (&self.matrix * &x - rhs).norm();
        let scale = rhs.norm().max(1e-300) + (&self.matrix * &x).norm();
        if residual > self.residual_tolerance * scale {
            return None;
        }
        Some(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lu_solve() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let system = LuSolver::default().factorize(a).unwrap();
        let x = system.solve(&b).unwrap();
        assert!((x[0] - 1.0 / 11.0).abs() < 1e-12);
        assert!((x[1] - 7.0 / 11.0).abs() < 1e-12);
        assert_eq!(system.dim(), 2);
    }

    #[test]
    fn test_singular_matrix() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        assert!(LuSolver::default().factorize(a).is_none());
    }

    #[test]
    fn test_non_finite_matrix() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, f64::NAN, 0.0, 1.0]);
        assert!(LuSolver::default().factorize(a).is_none());
    }

    #[test]
    fn test_non_square_matrix() {
        let a = DMatrix::<f64>::zeros(2, 3);
        assert!(LuSolver::default().factorize(a).is_none());
    }
}

//! 线性松弛求解: Big-M 稠密单纯形法.

use ndarray::Array2;

use super::{LinearConstraint, Relation};

/// 人工变量的 Big-M 罚系数. 远大于 TED 目标中可能出现的任何系数.
const BIG_M: f64 = 1e6;

/// 线性松弛的求解结局.
#[derive(Debug, Clone)]
pub(crate) enum LpOutcome {
    /// 找到最优解.
    Optimal {
        /// 原始变量的取值.
        x: Vec<f64>,
        /// 目标函数值.
        value: f64,
    },

    /// 可行域为空.
    Infeasible,

    /// 目标在可行域上无下界.
    Unbounded,

    /// 迭代数耗尽.
    IterationLimit,
}

/// 求解 `min c^T x`, 约束为 `constraints` 加上逐变量闭区间 `bounds`.
///
/// 所有变量都隐含非负; `bounds` 的下界不小于 0.
/// 约束被规范化为 `<=` 与 `==` 两类, 右端为负的行借助人工变量处理.
pub(crate) fn solve_lp(
    c: &[f64],
    constraints: &[LinearConstraint],
    bounds: &[(f64, f64)],
    max_iterations: usize,
    tol: f64,
) -> LpOutcome {
    let n_orig = c.len();
    debug_assert_eq!(bounds.len(), n_orig);

    // 规范化: (稠密行, 右端) 的 <= 行与 == 行.
    let mut le_rows: Vec<(Vec<f64>, f64)> = Vec::new();
    let mut eq_rows: Vec<(Vec<f64>, f64)> = Vec::new();

    for cons in constraints {
        let mut row = vec![0.0; n_orig];
        for &(var, coef) in cons.coefficients() {
            row[var] += coef;
        }
        match cons.relation() {
            Relation::LessEqual => le_rows.push((row, cons.value())),
            Relation::GreaterEqual => {
                // 乘 -1 转成 <=.
                row.iter_mut().for_each(|v| *v = -*v);
                le_rows.push((row, -cons.value()));
            }
            Relation::Equal => eq_rows.push((row, cons.value())),
        }
    }

    // 有限上界与正下界转成显式行.
    for (i, &(lb, ub)) in bounds.iter().enumerate() {
        debug_assert!(lb >= 0.0);
        if ub.is_finite() {
            let mut row = vec![0.0; n_orig];
            row[i] = 1.0;
            le_rows.push((row, ub));
        }
        if lb > 0.0 {
            let mut row = vec![0.0; n_orig];
            row[i] = -1.0;
            le_rows.push((row, -lb));
        }
    }

    let n_le = le_rows.len();
    let n_rows = n_le + eq_rows.len();
    if n_rows == 0 {
        // 无约束: 非负变量下系数为负即无界.
        if c.iter().any(|v| *v < 0.0) {
            return LpOutcome::Unbounded;
        }
        return LpOutcome::Optimal {
            x: vec![0.0; n_orig],
            value: 0.0,
        };
    }

    // 松弛变量逐 <= 行一个; 右端为负的 <= 行和所有 == 行各需一个人工变量.
    let n_slack = n_le;
    let n_artificial =
        le_rows.iter().filter(|(_, b)| *b < 0.0).count() + eq_rows.len();
    let n_total = n_orig + n_slack + n_artificial;

    let mut tableau = Array2::<f64>::zeros((n_rows + 1, n_total + 1));
    let mut basis = vec![0usize; n_rows];
    let mut art_idx = n_orig + n_slack;

    for (i, (row, rhs)) in le_rows.iter().enumerate() {
        let (mult, rhs_val) = if *rhs < 0.0 { (-1.0, -*rhs) } else { (1.0, *rhs) };
        for (j, &v) in row.iter().enumerate() {
            tableau[(i, j)] = mult * v;
        }
        tableau[(i, n_total)] = rhs_val;
        // 行被取反时松弛系数变为 -1, 需要人工变量入基.
        tableau[(i, n_orig + i)] = mult;
        if mult < 0.0 {
            tableau[(i, art_idx)] = 1.0;
            basis[i] = art_idx;
            art_idx += 1;
        } else {
            basis[i] = n_orig + i;
        }
    }

    for (k, (row, rhs)) in eq_rows.iter().enumerate() {
        let i = n_le + k;
        let (mult, rhs_val) = if *rhs < 0.0 { (-1.0, -*rhs) } else { (1.0, *rhs) };
        for (j, &v) in row.iter().enumerate() {
            tableau[(i, j)] = mult * v;
        }
        tableau[(i, n_total)] = rhs_val;
        tableau[(i, art_idx)] = 1.0;
        basis[i] = art_idx;
        art_idx += 1;
    }
    debug_assert_eq!(art_idx, n_total);

    // 目标行: 原始系数 + 人工变量的 Big-M 罚.
    for (j, &cj) in c.iter().enumerate() {
        tableau[(n_rows, j)] = cj;
    }
    for j in (n_orig + n_slack)..n_total {
        tableau[(n_rows, j)] = BIG_M;
    }

    // 消去基变量在目标行的系数, 使目标行规范化.
    for i in 0..n_rows {
        let coef = tableau[(n_rows, basis[i])];
        if coef.abs() > tol {
            for j in 0..=n_total {
                tableau[(n_rows, j)] -= coef * tableau[(i, j)];
            }
        }
    }

    // 单纯形迭代.
    let mut iterations = 0usize;
    loop {
        if iterations >= max_iterations {
            return LpOutcome::IterationLimit;
        }

        // 入基变量: 目标行最负者.
        let pivot_col = (0..n_total)
            .filter(|j| tableau[(n_rows, *j)] < -tol)
            .min_by(|a, b| {
                tableau[(n_rows, *a)]
                    .partial_cmp(&tableau[(n_rows, *b)])
                    .unwrap()
            });
        let Some(pivot_col) = pivot_col else {
            break;
        };

        // 出基变量: 最小比值.
        let pivot_row = (0..n_rows)
            .filter(|i| tableau[(*i, pivot_col)] > tol)
            .min_by(|a, b| {
                let ra = tableau[(*a, n_total)] / tableau[(*a, pivot_col)];
                let rb = tableau[(*b, n_total)] / tableau[(*b, pivot_col)];
                ra.partial_cmp(&rb).unwrap()
            });
        let Some(pivot_row) = pivot_row else {
            return LpOutcome::Unbounded;
        };

        // 旋转.
        let pivot_val = tableau[(pivot_row, pivot_col)];
        for j in 0..=n_total {
            tableau[(pivot_row, j)] /= pivot_val;
        }
        for i in 0..=n_rows {
            if i == pivot_row {
                continue;
            }
            let factor = tableau[(i, pivot_col)];
            if factor != 0.0 {
                for j in 0..=n_total {
                    tableau[(i, j)] -= factor * tableau[(pivot_row, j)];
                }
            }
        }
        basis[pivot_row] = pivot_col;
        iterations += 1;
    }

    // 人工变量仍留在基中且非零 => 原问题不可行.
    for (i, &bv) in basis.iter().enumerate() {
        if bv >= n_orig + n_slack && tableau[(i, n_total)].abs() > tol.max(1e-7) {
            return LpOutcome::Infeasible;
        }
    }

    // 取出原始变量的取值并按界夹紧, 抹去数值漂移.
    let mut x = vec![0.0; n_orig];
    for (i, &bv) in basis.iter().enumerate() {
        if bv < n_orig {
            x[bv] = tableau[(i, n_total)];
        }
    }
    for (xi, &(lb, ub)) in x.iter_mut().zip(bounds.iter()) {
        *xi = xi.max(lb);
        if ub.is_finite() {
            *xi = xi.min(ub);
        }
    }

    let value = x.iter().zip(c.iter()).map(|(xi, ci)| xi * ci).sum();
    LpOutcome::Optimal { x, value }
}

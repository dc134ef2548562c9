//! 整数变量的分支定界.

use std::collections::BTreeMap;
use std::time::Instant;

use log::{debug, warn};

use super::simplex::{solve_lp, LpOutcome};
use super::{LinearConstraint, Objective, Solution, SolverBackend, SolverOptions, VarType};
use crate::{EvalError, EvalResult};

/// 内置 MILP 后端: 对线性松弛做深度优先分支定界.
///
/// 支持墙钟超时; 超时后返回当前最优可行解并置超时标志.
/// 未设置超时时会一直搜索到最优性被证明 (或节点预算耗尽).
#[derive(Debug, Clone)]
pub struct BranchAndBound {
    options: SolverOptions,
    var_types: Vec<VarType>,
    objective: Vec<f64>,
    constraints: Vec<LinearConstraint>,
}

/// 搜索树节点: 变量界与父节点的松弛下界.
#[derive(Debug, Clone)]
struct Node {
    bounds: Vec<(f64, f64)>,
    lower_bound: f64,
}

impl BranchAndBound {
    /// 以给定选项创建后端.
    #[inline]
    pub fn new(options: SolverOptions) -> Self {
        Self {
            options,
            var_types: vec![],
            objective: vec![],
            constraints: vec![],
        }
    }

    /// 变量类型对应的初始界.
    #[inline]
    fn base_bound(ty: VarType) -> (f64, f64) {
        match ty {
            VarType::Binary => (0.0, 1.0),
            VarType::Continuous | VarType::Integer => (0.0, f64::INFINITY),
        }
    }
}

impl SolverBackend for BranchAndBound {
    fn initialize(
        &mut self,
        num_vars: usize,
        default_type: VarType,
        overrides: &BTreeMap<usize, VarType>,
    ) {
        self.var_types = vec![default_type; num_vars];
        for (&var, &ty) in overrides {
            self.var_types[var] = ty;
        }
        self.objective = vec![0.0; num_vars];
        self.constraints.clear();
    }

    fn set_objective(&mut self, objective: Objective) {
        debug_assert_eq!(objective.coefficients().len(), self.var_types.len());
        self.objective = objective.coefficients().to_vec();
    }

    fn set_constraints(&mut self, constraints: Vec<LinearConstraint>) {
        self.constraints = constraints;
    }

    fn solve(&mut self) -> EvalResult<Solution> {
        let n = self.var_types.len();
        if n == 0 {
            return Err(EvalError::SolverUnavailable(
                "后端尚未初始化 (变量个数为 0)".to_string(),
            ));
        }

        let started = Instant::now();
        let base_bounds: Vec<(f64, f64)> =
            self.var_types.iter().map(|ty| Self::base_bound(*ty)).collect();

        let mut stack = vec![Node {
            bounds: base_bounds,
            lower_bound: f64::NEG_INFINITY,
        }];
        let mut best_x: Option<Vec<f64>> = None;
        let mut best_value = f64::INFINITY;
        let mut nodes = 0usize;
        let mut timed_out = false;
        let mut message = "已证明最优".to_string();

        while let Some(node) = stack.pop() {
            if let Some(limit) = self.options.timeout {
                if started.elapsed() >= limit {
                    timed_out = true;
                    message = "墙钟超时, 返回当前最优可行解".to_string();
                    break;
                }
            }
            nodes += 1;
            if nodes > self.options.max_nodes {
                timed_out = true;
                message = "节点预算耗尽, 返回当前最优可行解".to_string();
                break;
            }

            // 父节点下界已不优于当前最优, 剪枝.
            if node.lower_bound >= best_value - self.options.tol {
                continue;
            }

            let relaxed = solve_lp(
                &self.objective,
                &self.constraints,
                &node.bounds,
                self.options.max_iterations,
                self.options.tol,
            );
            let (x, value) = match relaxed {
                LpOutcome::Optimal { x, value } => (x, value),
                // 子问题不可行或松弛异常: 该分支废弃.
                LpOutcome::Infeasible | LpOutcome::IterationLimit => continue,
                LpOutcome::Unbounded => {
                    return Err(EvalError::SolverFailed(
                        "线性松弛无界, 问题建模有误".to_string(),
                    ))
                }
            };

            if value >= best_value - self.options.tol {
                continue;
            }

            // 找最分数化的整数变量作为分支变量.
            let mut branch_var = None;
            let mut max_fractionality = self.options.int_tol;
            for (i, (&ty, &xi)) in self.var_types.iter().zip(x.iter()).enumerate() {
                if ty == VarType::Continuous {
                    continue;
                }
                let frac = xi - xi.floor();
                let fractionality = frac.min(1.0 - frac);
                if fractionality > max_fractionality {
                    max_fractionality = fractionality;
                    branch_var = Some(i);
                }
            }

            let Some(var) = branch_var else {
                // 整数可行, 更新最优解.
                best_value = value;
                best_x = Some(x);
                continue;
            };

            let (floor_val, ceil_val) = (x[var].floor(), x[var].ceil());

            // 右孩子 x[var] >= ceil 后入栈, 左孩子先被探索.
            let mut right = node.bounds.clone();
            right[var].0 = right[var].0.max(ceil_val);
            if right[var].0 <= right[var].1 {
                stack.push(Node {
                    bounds: right,
                    lower_bound: value,
                });
            }
            let mut left = node.bounds;
            left[var].1 = left[var].1.min(floor_val);
            if left[var].0 <= left[var].1 {
                stack.push(Node {
                    bounds: left,
                    lower_bound: value,
                });
            }
        }

        let wall_time = started.elapsed().as_secs_f64();
        debug!("分支定界展开 {nodes} 个节点, 耗时 {wall_time:.6} 秒");
        if timed_out {
            warn!("{message}");
        }

        let Some(x) = best_x else {
            return Err(EvalError::SolverFailed(if timed_out {
                "预算耗尽且没有任何可行解".to_string()
            } else {
                "问题不可行".to_string()
            }));
        };

        // 整数变量吸附到最近整数.
        let values: Vec<f64> = x
            .iter()
            .zip(self.var_types.iter())
            .map(|(&xi, &ty)| match ty {
                VarType::Continuous => xi,
                VarType::Binary | VarType::Integer => xi.round(),
            })
            .collect();
        let value = values
            .iter()
            .zip(self.objective.iter())
            .map(|(xi, ci)| xi * ci)
            .sum();

        Ok(Solution {
            values,
            value,
            wall_time,
            timed_out,
            message,
        })
    }
}

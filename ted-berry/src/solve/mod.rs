//! 混合整数线性规划后端.
//!
//! ILP 构建方把问题交给一个不透明的求解服务: 初始化变量,
//! 设置目标与约束, 然后求解拿回变量取值和墙钟耗时.
//! 本模块内置一个单纯形法 + 分支定界的后端实现;
//! 契约本身不关心后端用什么算法.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::EvalResult;

mod branch;
mod simplex;

pub use branch::BranchAndBound;

/// 变量类型.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VarType {
    /// 连续变量, 取值范围 `[0, +inf)`.
    Continuous,

    /// 0-1 变量.
    Binary,

    /// 非负整数变量.
    Integer,
}

/// 线性约束的关系符.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Relation {
    /// 左端不大于右端.
    LessEqual,

    /// 左端不小于右端.
    GreaterEqual,

    /// 左端等于右端.
    Equal,
}

/// 一条稀疏线性约束: `sum(coef * x_var) <relation> value`.
#[derive(Debug, Clone)]
pub struct LinearConstraint {
    coefficients: Vec<(usize, f64)>,
    relation: Relation,
    value: f64,
}

impl LinearConstraint {
    /// 创建系数为空的约束.
    #[inline]
    pub fn new(relation: Relation, value: f64) -> Self {
        Self {
            coefficients: Vec::with_capacity(4),
            relation,
            value,
        }
    }

    /// 追加一项系数. 同一变量重复追加时系数相加.
    pub fn set_coefficient(&mut self, var: usize, coef: f64) {
        if let Some(entry) = self.coefficients.iter_mut().find(|(v, _)| *v == var) {
            entry.1 += coef;
        } else {
            self.coefficients.push((var, coef));
        }
    }

    /// 迭代全部 `(变量, 系数)` 项.
    #[inline]
    pub fn coefficients(&self) -> &[(usize, f64)] {
        &self.coefficients
    }

    /// 关系符.
    #[inline]
    pub fn relation(&self) -> Relation {
        self.relation
    }

    /// 右端值.
    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// 稠密目标函数 (最小化).
#[derive(Debug, Clone)]
pub struct Objective {
    coefficients: Vec<f64>,
}

impl Objective {
    /// 创建 `num_vars` 个变量的全零目标.
    #[inline]
    pub fn new(num_vars: usize) -> Self {
        Self {
            coefficients: vec![0.0; num_vars],
        }
    }

    /// 设置一个变量的目标系数.
    #[inline]
    pub fn set_coefficient(&mut self, var: usize, coef: f64) {
        self.coefficients[var] = coef;
    }

    /// 目标系数的稠密视图.
    #[inline]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
}

/// 求解结果.
#[derive(Debug, Clone)]
pub struct Solution {
    /// 每个变量的取值. 整数变量已四舍五入.
    pub values: Vec<f64>,

    /// 目标函数值.
    pub value: f64,

    /// 墙钟耗时, 秒.
    pub wall_time: f64,

    /// 超时标志. 为 `true` 时 `values` 是预算内的最优可行解,
    /// 而不是被证明的最优解.
    pub timed_out: bool,

    /// 后端诊断信息.
    pub message: String,
}

/// 后端求解选项.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// 墙钟超时. `None` 代表不限.
    pub timeout: Option<Duration>,

    /// 分支定界最多展开的节点数.
    pub max_nodes: usize,

    /// 整数可行性容差.
    pub int_tol: f64,

    /// 单次线性松弛的最大单纯形迭代数.
    pub max_iterations: usize,

    /// 数值容差.
    pub tol: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_nodes: 100_000,
            int_tol: 1e-6,
            max_iterations: 10_000,
            tol: 1e-9,
        }
    }
}

/// MILP 后端契约.
///
/// 调用次序: [`initialize`](Self::initialize) ->
/// [`set_objective`](Self::set_objective) ->
/// [`set_constraints`](Self::set_constraints) -> [`solve`](Self::solve).
pub trait SolverBackend {
    /// 声明变量个数与类型. `overrides` 覆盖默认类型.
    fn initialize(
        &mut self,
        num_vars: usize,
        default_type: VarType,
        overrides: &BTreeMap<usize, VarType>,
    );

    /// 设置最小化目标.
    fn set_objective(&mut self, objective: Objective);

    /// 设置全部约束.
    fn set_constraints(&mut self, constraints: Vec<LinearConstraint>);

    /// 求解. 不可行时返回 [`crate::EvalError::SolverFailed`];
    /// 超时但已有可行解时正常返回并置超时标志.
    fn solve(&mut self) -> EvalResult<Solution>;
}

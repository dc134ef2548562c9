//! 运行时错误.

use std::fmt;

use crate::Idx3d;

/// TED 求值的运行时错误.
///
/// 核心库不在内部做任何恢复: 每种错误都原样上交给调用者.
#[derive(Debug, Clone)]
pub enum EvalError {
    /// 真值与重建体的形状不一致. 两个参数分别为真值形状和重建形状.
    ShapeMismatch(Idx3d, Idx3d),

    /// 参数不合法 (如负的距离阈值).
    Usage(String),

    /// MILP 后端无法初始化.
    SolverUnavailable(String),

    /// MILP 后端在资源限制内找不到可行解. 携带后端的诊断信息.
    SolverFailed(String),

    /// 不变量被破坏 (如空的备选标签集合). 说明程序自身存在 bug.
    Internal(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch(gt, rec) => {
                write!(f, "真值形状 {gt:?} 与重建形状 {rec:?} 不一致")
            }
            Self::Usage(msg) => write!(f, "参数错误: {msg}"),
            Self::SolverUnavailable(msg) => write!(f, "求解器不可用: {msg}"),
            Self::SolverFailed(msg) => write!(f, "求解失败: {msg}"),
            Self::Internal(msg) => write!(f, "内部不变量被破坏: {msg}"),
        }
    }
}

impl std::error::Error for EvalError {}

/// TED 求值结果.
pub type EvalResult<T> = Result<T, EvalError>;

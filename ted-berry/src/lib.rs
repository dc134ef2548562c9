#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 对一对形状相同的体标签图 (真值 + 重建) 计算容忍编辑距离
//! (Tolerant Edit Distance, TED) 及其配套错误报告.
//!
//! 经典的逐像素指标 (Rand index, VoI) 会把毫米级的边界抖动当成真错误;
//! TED 先允许重建的每条边界在给定的物理距离阈值内移动,
//! 再统计为了和真值一致最少还需要多少次 split/merge 操作.
//! 整个计算是一次性的函数调用, 没有惰性失效, 也没有全局选项注册表.
//! 在非期望情况下, 程序会直接 panic 或返回 `Err`, 而不会导致内存错误.
//! As what Rust promises.
//!
//! # 开发计划
//!
//! ### 体标签数据结构 ✅
//!
//! `ndarray` 支撑的三维标签体, 携带体素物理分辨率, 可从 nii 文件打开.
//!
//! 实现位于 `ted-berry/src/data`.
//!
//! ### 联合连通域分解 ✅
//!
//! 在 (真值, 重建) 标签对上按 26-邻域提取 cell. cell 是后续
//! ILP 重标号的原子单元.
//!
//! 实现位于 `ted-berry/src/cells`.
//!
//! ### 容忍函数 ✅
//!
//! 体积模式与骨架模式两种变体, 共享候选筛选和备选标签枚举;
//! 候选筛选基于各向异性平方欧氏距离变换.
//!
//! 实现位于 `ted-berry/src/tol`.
//!
//! ### 混合整数线性规划 ✅
//!
//! 单纯形法 + 分支定界的内置 MILP 后端, 以不透明服务接口呈现,
//! 支持墙钟超时并在超时后回退到当前最优可行解.
//!
//! 实现位于 `ted-berry/src/solve`.
//!
//! ### 错误装配 ✅
//!
//! split/merge/FP/FN 计数与 cell 映射, 修正重建体,
//! 可选的错误定位记录, 以及制表符分隔的报告行.
//!
//! 实现位于 `ted-berry/src/report`.
//!
//! ### 驱动器 ✅
//!
//! `TolerantEditDistance::compute(gt, rec)` 一次性完成上述全部步骤.
//!
//! 实现位于 `ted-berry/src/ted.rs`.

/// 三维索引, 按 `(z, 高, 宽)` 组织; 元组字典序即位置的全序.
pub type Idx3d = (usize, usize, usize);

/// 三维偏移量, 按 `(z, 高, 宽)` 组织. 分量可以为负.
pub type Off3d = (isize, isize, isize);

/// 区域标签. 非负整数, 32 位宽.
pub type Label = u32;

pub mod consts;

mod error;

pub use error::{EvalError, EvalResult};

mod data;

pub use data::{LabelFrame, LabelVolume};

pub mod cells;

pub use cells::{extract_cells, Cell};

pub mod tol;

pub mod solve;

pub mod report;

pub use report::{MergeError, SplitError, TedReport};

mod ted;

pub use ted::{Mode, TedPolicy, TolerantEditDistance};

pub mod prelude;

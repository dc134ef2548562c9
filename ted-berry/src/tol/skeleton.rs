//! 骨架模式容忍函数.
//!
//! 真值是曲线状骨架而不是实心体时使用. 判定准则描述的是
//! "骨架离重建有多远可以不算错": 非骨架 cell (真值为背景的 cell)
//! 与评估无关, 被硬连线到内部哨兵标签并退出候选;
//! 骨架 cell 原样走距离枚举.

use super::{DistanceTolerance, ToleranceFunction};
use crate::cells::Cell;
use crate::consts::{is_ignore, IGNORE};
use crate::Label;

/// 骨架容忍函数.
///
/// 内部复用 [`DistanceTolerance`] 的枚举算法, 仅替换两个钩子.
/// 该模式下不允许背景显形.
#[derive(Debug, Clone)]
pub struct SkeletonTolerance {
    inner: DistanceTolerance,

    /// 真值背景标签. 真值为该标签的 cell 不是骨架 cell.
    gt_background: Label,
}

impl SkeletonTolerance {
    /// 创建骨架模式容忍函数.
    #[inline]
    pub fn new(threshold: f64, gt_background: Label, rec_background: Label) -> Self {
        Self {
            inner: DistanceTolerance::new(threshold, false, rec_background),
            gt_background,
        }
    }

    /// cell 是否是骨架 cell (真值标签不是背景).
    #[inline]
    fn is_skeleton_cell(&self, cell: &Cell) -> bool {
        cell.gt_label() != self.gt_background && !is_ignore(cell.gt_label())
    }
}

impl ToleranceFunction for SkeletonTolerance {
    fn init_possible_labels(&self, cells: &mut [Cell]) {
        for cell in cells.iter_mut() {
            if cell.gt_label() == self.gt_background {
                // 非骨架 cell 硬连线到哨兵, 之后不再参与任何重标号.
                cell.set_gt_label(IGNORE);
                cell.set_rec_label(IGNORE);
                cell.clear_possible_labels();
                cell.add_possible_label(IGNORE);
            } else {
                cell.add_possible_label(cell.rec_label());
            }
        }
    }

    fn select_relabel_candidates(&self, cells: &mut [Cell], _max_bdist2: &[f64]) -> Vec<usize> {
        // 骨架准则下每个骨架 cell 都允许重标号, 不做距离预筛.
        (0..cells.len())
            .filter(|i| self.is_skeleton_cell(&cells[*i]))
            .collect()
    }

    #[inline]
    fn threshold(&self) -> f64 {
        self.inner.threshold()
    }

    #[inline]
    fn allow_background_appearance(&self) -> bool {
        false
    }

    #[inline]
    fn rec_background(&self) -> Label {
        self.inner.rec_background()
    }
}

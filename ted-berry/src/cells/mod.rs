//! cell: ILP 重标号的原子单元.
//!
//! cell 是 `(真值标签, 重建标签)` 对保持恒定的极大 26-连通体素集合.
//! 真值连通域与重建连通域的交集恰好给出这些 cell;
//! 全体 cell 恰好划分整个标签体.

use std::collections::BTreeSet;

use crate::{Idx3d, Label};

mod extract;

pub use extract::extract_cells;

/// 一个 cell, 携带初始标签与容忍分析得到的可取标签集合.
#[derive(Debug, Clone)]
pub struct Cell {
    /// 真值标签. 骨架模式下可能被改写为内部哨兵.
    gt_label: Label,

    /// 初始重建标签. 骨架模式下可能被改写为内部哨兵.
    rec_label: Label,

    /// 构成该 cell 的体素坐标, 按扫描序 (z, 高, 宽 字典序) 存储.
    locations: Vec<Idx3d>,

    /// 容忍分析后, 该 cell 可以被重标号到的重建标签集合.
    /// 分析结束后保证非空.
    possible: BTreeSet<Label>,
}

impl Cell {
    /// 以初始标签对创建空 cell.
    #[inline]
    pub(crate) fn new(gt_label: Label, rec_label: Label) -> Self {
        Self {
            gt_label,
            rec_label,
            locations: Vec::with_capacity(4),
            possible: BTreeSet::new(),
        }
    }

    /// 获取真值标签.
    #[inline]
    pub fn gt_label(&self) -> Label {
        self.gt_label
    }

    /// 获取当前重建标签.
    #[inline]
    pub fn rec_label(&self) -> Label {
        self.rec_label
    }

    /// 改写真值标签. 仅容忍分析在初始化阶段使用.
    #[inline]
    pub(crate) fn set_gt_label(&mut self, label: Label) {
        self.gt_label = label;
    }

    /// 改写重建标签. 仅容忍分析在初始化阶段使用.
    #[inline]
    pub(crate) fn set_rec_label(&mut self, label: Label) {
        self.rec_label = label;
    }

    /// 该 cell 的体素个数. 提取结束后至少为 1.
    #[inline]
    pub fn size(&self) -> usize {
        self.locations.len()
    }

    /// 按扫描序迭代该 cell 的体素坐标.
    #[inline]
    pub fn locations(&self) -> &[Idx3d] {
        &self.locations
    }

    /// 向 cell 添加一个体素坐标.
    #[inline]
    pub(crate) fn push(&mut self, pos: Idx3d) {
        self.locations.push(pos);
    }

    /// 将体素坐标排成 (z, 高, 宽) 字典序.
    #[inline]
    pub(crate) fn sort_locations(&mut self) {
        self.locations.sort_unstable();
    }

    /// 该 cell 可取的重建标签集合, 按升序迭代.
    #[inline]
    pub fn possible_labels(&self) -> &BTreeSet<Label> {
        &self.possible
    }

    /// 登记一个可取标签. 重复登记是无害的.
    #[inline]
    pub(crate) fn add_possible_label(&mut self, label: Label) {
        self.possible.insert(label);
    }

    /// 清空可取标签集合. 仅骨架模式的初始化使用.
    #[inline]
    pub(crate) fn clear_possible_labels(&mut self) {
        self.possible.clear();
    }

    /// 该 cell 的备选标签 (可取标签中除去当前重建标签), 按升序.
    #[inline]
    pub fn alternative_labels(&self) -> impl Iterator<Item = Label> + '_ {
        let rec = self.rec_label;
        self.possible.iter().copied().filter(move |l| *l != rec)
    }
}

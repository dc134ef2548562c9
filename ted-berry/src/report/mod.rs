//! TED 错误报告.
//!
//! 报告由驱动器在 ILP 求解结束后一次性装配:
//! 稀疏混淆矩阵, split/merge/FP/FN 计数与 cell 映射,
//! 修正后的重建体, 以及可选的错误定位记录.
//! 装配后报告只读, 并独占 cell 列表的所有权.

use std::collections::{BTreeMap, BTreeSet};

use crate::cells::Cell;
use crate::{Label, LabelVolume};

mod locate;

pub use locate::{MergeError, SplitError};

pub(crate) use locate::{localize_merges, localize_splits};

/// 标签 -> 对侧标签 -> 参与的 cell 下标.
pub type CellMap = BTreeMap<Label, BTreeMap<Label, BTreeSet<usize>>>;

/// 一对实际发生的匹配及其重叠体素数.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Match {
    /// 真值标签.
    pub gt_label: Label,

    /// 重建标签.
    pub rec_label: Label,

    /// 两标签共享的体素数.
    pub overlap: usize,
}

/// TED 求值报告.
#[derive(Debug, Clone)]
pub struct TedReport {
    /// 全体 cell. 报告装配后由报告独占.
    cells: Vec<Cell>,

    /// 真值标签到重建标签的稀疏混淆矩阵.
    by_gt: CellMap,

    /// 重建标签到真值标签的稀疏混淆矩阵.
    by_rec: CellMap,

    /// 有 >= 2 个重建伙伴的真值标签 (背景行被归入 FP 时除外).
    splits: CellMap,

    /// 有 >= 2 个真值伙伴的重建标签 (背景行被归入 FN 时除外).
    merges: CellMap,

    /// 假阳性: 真值背景 split 出的非背景重建标签及其 cell.
    fp_cells: BTreeMap<Label, BTreeSet<usize>>,

    /// 假阴性: 重建背景 merge 掉的非背景真值标签及其 cell.
    fn_cells: BTreeMap<Label, BTreeSet<usize>>,

    num_splits: usize,
    num_merges: usize,
    num_fp: usize,
    num_fn: usize,

    /// 实际发生的全部匹配, 按 (真值, 重建) 标签升序.
    matches: Vec<Match>,

    /// 修正后的重建体.
    corrected: LabelVolume,

    /// split 错误定位记录. 仅在被要求时装配.
    split_errors: Option<Vec<SplitError>>,

    /// merge 错误定位记录. 仅在被要求时装配.
    merge_errors: Option<Vec<MergeError>>,

    /// MILP 求解墙钟耗时, 秒.
    solver_time: f64,

    /// ILP 变量总数.
    solver_vars: usize,

    /// 求解是否因超时而止步于可行解.
    timed_out: bool,
}

/// 对一侧混淆矩阵统计 split (或对称地统计 merge).
///
/// 一对一的行不算错误; `background` 给定时, 背景行的错误数
/// 单独归入第二个计数 (FP 或 FN) 并从 split 行集中剔除.
fn classify(
    map: &CellMap,
    background: Option<Label>,
) -> (CellMap, BTreeMap<Label, BTreeSet<usize>>, usize, usize) {
    let mut splits = CellMap::new();
    let mut bg_cells = BTreeMap::new();
    let (mut num_splits, mut num_bg) = (0usize, 0usize);

    for (label, partners) in map.iter() {
        if partners.len() == 1 {
            continue;
        }
        if background == Some(*label) {
            num_bg += partners.len() - 1;
            // 背景行: 对侧背景自身不是错误对象.
            for (partner, cell_ids) in partners.iter() {
                bg_cells.insert(*partner, cell_ids.clone());
            }
        } else {
            num_splits += partners.len() - 1;
            splits.insert(*label, partners.clone());
        }
    }
    (splits, bg_cells, num_splits, num_bg)
}

impl TedReport {
    /// 由求得的 cell -> 标签指派装配完整报告.
    ///
    /// `assignment[i]` 是第 `i` 个 cell 最终选定的重建标签.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        cells: Vec<Cell>,
        assignment: &[Label],
        corrected: LabelVolume,
        report_fp_fn: bool,
        gt_background: Label,
        rec_background: Label,
        solver_time: f64,
        solver_vars: usize,
        timed_out: bool,
    ) -> Self {
        debug_assert_eq!(cells.len(), assignment.len());

        let mut by_gt = CellMap::new();
        let mut by_rec = CellMap::new();
        for (index, (cell, label)) in cells.iter().zip(assignment.iter()).enumerate() {
            by_gt
                .entry(cell.gt_label())
                .or_default()
                .entry(*label)
                .or_default()
                .insert(index);
            by_rec
                .entry(*label)
                .or_default()
                .entry(cell.gt_label())
                .or_default()
                .insert(index);
        }

        let gt_bg = report_fp_fn.then_some(gt_background);
        let rec_bg = report_fp_fn.then_some(rec_background);
        let (splits, mut fp_cells, num_splits, num_fp) = classify(&by_gt, gt_bg);
        let (merges, mut fn_cells, num_merges, num_fn) = classify(&by_rec, rec_bg);
        // 背景对背景不是错误对象.
        fp_cells.remove(&rec_background);
        fn_cells.remove(&gt_background);

        let mut matches = Vec::with_capacity(by_gt.len());
        for (gt_label, partners) in by_gt.iter() {
            for (rec_label, cell_ids) in partners.iter() {
                let overlap = cell_ids.iter().map(|i| cells[*i].size()).sum();
                matches.push(Match {
                    gt_label: *gt_label,
                    rec_label: *rec_label,
                    overlap,
                });
            }
        }

        Self {
            cells,
            by_gt,
            by_rec,
            splits,
            merges,
            fp_cells,
            fn_cells,
            num_splits,
            num_merges,
            num_fp,
            num_fn,
            matches,
            corrected,
            split_errors: None,
            merge_errors: None,
            solver_time,
            solver_vars,
            timed_out,
        }
    }

    /// 装配错误定位记录. 由驱动器在被要求时调用.
    pub(crate) fn localize_errors(&mut self, res: [f64; 3]) {
        self.split_errors = Some(localize_splits(&self.cells, &self.splits, res));
        self.merge_errors = Some(localize_merges(&self.cells, &self.merges, res));
    }

    /// split 错误总数.
    #[inline]
    pub fn num_splits(&self) -> usize {
        self.num_splits
    }

    /// merge 错误总数.
    #[inline]
    pub fn num_merges(&self) -> usize {
        self.num_merges
    }

    /// 假阳性总数. 仅在启用背景重分类时非零.
    #[inline]
    pub fn num_fp(&self) -> usize {
        self.num_fp
    }

    /// 假阴性总数. 仅在启用背景重分类时非零.
    #[inline]
    pub fn num_fn(&self) -> usize {
        self.num_fn
    }

    /// 全部错误之和.
    #[inline]
    pub fn num_errors(&self) -> usize {
        self.num_splits + self.num_merges + self.num_fp + self.num_fn
    }

    /// 被 split 的真值标签及其重建伙伴 cell.
    #[inline]
    pub fn splits(&self) -> &CellMap {
        &self.splits
    }

    /// 发生 merge 的重建标签及其真值伙伴 cell.
    #[inline]
    pub fn merges(&self) -> &CellMap {
        &self.merges
    }

    /// 假阳性重建标签及其 cell.
    #[inline]
    pub fn fp_cells(&self) -> &BTreeMap<Label, BTreeSet<usize>> {
        &self.fp_cells
    }

    /// 假阴性真值标签及其 cell.
    #[inline]
    pub fn fn_cells(&self) -> &BTreeMap<Label, BTreeSet<usize>> {
        &self.fn_cells
    }

    /// 真值标签到重建标签的完整混淆矩阵.
    #[inline]
    pub fn cells_by_gt(&self) -> &CellMap {
        &self.by_gt
    }

    /// 重建标签到真值标签的完整混淆矩阵.
    #[inline]
    pub fn cells_by_rec(&self) -> &CellMap {
        &self.by_rec
    }

    /// 实际发生的全部匹配.
    #[inline]
    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    /// 两个标签共享的体素数. 没有发生匹配的标签对返回 0.
    pub fn overlap(&self, gt_label: Label, rec_label: Label) -> usize {
        self.by_gt
            .get(&gt_label)
            .and_then(|partners| partners.get(&rec_label))
            .map_or(0, |ids| ids.iter().map(|i| self.cells[*i].size()).sum())
    }

    /// 全体 cell.
    #[inline]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// 修正后的重建体: 每个 cell 按选定标签重新涂色.
    #[inline]
    pub fn corrected(&self) -> &LabelVolume {
        &self.corrected
    }

    /// split 错误定位记录. 未被要求时为 `None`.
    #[inline]
    pub fn split_errors(&self) -> Option<&[SplitError]> {
        self.split_errors.as_deref()
    }

    /// merge 错误定位记录. 未被要求时为 `None`.
    #[inline]
    pub fn merge_errors(&self) -> Option<&[MergeError]> {
        self.merge_errors.as_deref()
    }

    /// MILP 求解墙钟耗时, 秒.
    #[inline]
    pub fn solver_time(&self) -> f64 {
        self.solver_time
    }

    /// ILP 变量总数.
    #[inline]
    pub fn solver_vars(&self) -> usize {
        self.solver_vars
    }

    /// 求解是否因超时而止步于可行解 (而不是被证明的最优解).
    #[inline]
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// 持久化报告行的表头.
    #[inline]
    pub fn error_header() -> &'static str {
        "TED_FP\tTED_FN\tTED_FS\tTED_FM\tTED_SUM"
    }

    /// 制表符分隔的持久化报告行, 与 [`Self::error_header`] 对应.
    pub fn error_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}",
            self.num_fp,
            self.num_fn,
            self.num_splits,
            self.num_merges,
            self.num_errors()
        )
    }

    /// 单行人类可读报告.
    pub fn human_readable(&self) -> String {
        format!(
            "TED FP: {}, TED FN: {}, TED FS: {}, TED FM: {}, TED Total: {}",
            self.num_fp,
            self.num_fn,
            self.num_splits,
            self.num_merges,
            self.num_errors()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::TedReport;
    use crate::cells::extract_cells;
    use crate::LabelVolume;
    use ndarray::arr2;

    /// 手工指派下的计数与映射.
    #[test]
    fn test_assemble_counts() {
        // gt: 1 2 / rec: 3 4, 指派保持原标签 => gt 与 rec 双向一对一.
        let gt = LabelVolume::from_frame(arr2(&[[1u32, 1, 2, 2]]), [1.0; 3]);
        let rec = LabelVolume::from_frame(arr2(&[[3u32, 3, 4, 4]]), [1.0; 3]);
        let cells = extract_cells(&gt, &rec).unwrap();
        let assignment: Vec<u32> = cells.iter().map(|c| c.rec_label()).collect();

        let report = TedReport::assemble(
            cells,
            &assignment,
            rec.clone(),
            false,
            0,
            0,
            0.0,
            0,
            false,
        );
        assert_eq!(report.num_errors(), 0);
        assert_eq!(report.matches().len(), 2);
        assert_eq!(report.overlap(1, 3), 2);
        assert_eq!(report.overlap(1, 4), 0);
        assert_eq!(report.error_line(), "0\t0\t0\t0\t0");
    }

    /// 背景重分类: 真值背景 split 出前景 => FP 而不是 split.
    #[test]
    fn test_assemble_fp_reclassify() {
        let gt = LabelVolume::from_frame(arr2(&[[0u32, 0, 0, 0]]), [1.0; 3]);
        let rec = LabelVolume::from_frame(arr2(&[[4u32, 4, 0, 0]]), [1.0; 3]);
        let cells = extract_cells(&gt, &rec).unwrap();
        let assignment: Vec<u32> = cells.iter().map(|c| c.rec_label()).collect();

        let report =
            TedReport::assemble(cells, &assignment, rec.clone(), true, 0, 0, 0.0, 0, false);
        assert_eq!(report.num_fp(), 1);
        assert_eq!(report.num_fn(), 0);
        assert_eq!(report.num_splits(), 0);
        assert_eq!(report.num_merges(), 0);
        assert!(report.fp_cells().contains_key(&4));
        assert!(!report.fp_cells().contains_key(&0));
        assert!(report.splits().is_empty());
        assert_eq!(report.error_line(), "1\t0\t0\t0\t1");
    }

    /// 不做背景重分类时, 同样的输入是一次普通 split.
    #[test]
    fn test_assemble_no_reclassify() {
        let gt = LabelVolume::from_frame(arr2(&[[0u32, 0, 0, 0]]), [1.0; 3]);
        let rec = LabelVolume::from_frame(arr2(&[[4u32, 4, 0, 0]]), [1.0; 3]);
        let cells = extract_cells(&gt, &rec).unwrap();
        let assignment: Vec<u32> = cells.iter().map(|c| c.rec_label()).collect();

        let report =
            TedReport::assemble(cells, &assignment, rec.clone(), false, 0, 0, 0.0, 0, false);
        assert_eq!(report.num_fp(), 0);
        assert_eq!(report.num_splits(), 1);
        assert_eq!(report.num_merges(), 0);
        assert!(report.splits().contains_key(&0));
    }

    /// 人类可读行格式.
    #[test]
    fn test_report_lines() {
        assert_eq!(
            TedReport::error_header(),
            "TED_FP\tTED_FN\tTED_FS\tTED_FM\tTED_SUM"
        );
    }
}

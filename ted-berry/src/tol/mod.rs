//! 容忍函数: 为每个 cell 标注其在容忍准则下可取的重建标签.
//!
//! 两个具体变体共享同一套骨架:
//!
//! 1. 初始化每个 cell 的可取标签集合 (钩子一);
//! 2. 以逐 cell 最大边界距离为依据, 廉价筛选重标号候选 (钩子二);
//! 3. 对每个候选枚举合法备选标签并写入集合.
//!
//! 候选筛选必须保守: 允许假阳性, 绝不允许漏掉真正拥有备选标签的 cell.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use ndarray::Array3;

use crate::cells::Cell;
use crate::{Label, LabelVolume, Off3d};

mod distance;
mod edt;
mod skeleton;

pub use distance::DistanceTolerance;
pub use skeleton::SkeletonTolerance;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

        /// 逐候选枚举备选标签. 候选之间互不依赖, 并行执行;
        /// 结果按候选次序收集, 与串行逐字节一致.
        fn enumerate_candidates(
            candidates: &[usize],
            cells: &[Cell],
            offsets: &[Off3d],
            rec: &LabelVolume,
            boundary: &Array3<bool>,
        ) -> Vec<BTreeSet<Label>> {
            candidates
                .par_iter()
                .map(|i| distance::alternative_labels(&cells[*i], offsets, rec, boundary))
                .collect()
        }
    } else {
        /// 逐候选枚举备选标签.
        fn enumerate_candidates(
            candidates: &[usize],
            cells: &[Cell],
            offsets: &[Off3d],
            rec: &LabelVolume,
            boundary: &Array3<bool>,
        ) -> Vec<BTreeSet<Label>> {
            candidates
                .iter()
                .map(|i| distance::alternative_labels(&cells[*i], offsets, rec, boundary))
                .collect()
        }
    }
}

/// 容忍函数的公共契约. 两个钩子之外的流程由 [`analyze`] 统一驱动.
///
/// 实现必须是 `Sync` 的, 以便分析阶段跨线程共享.
pub trait ToleranceFunction: Sync {
    /// 钩子一: 初始化每个 cell 的可取标签集合.
    /// 这是修改 cell 初始标签的最后机会.
    fn init_possible_labels(&self, cells: &mut [Cell]);

    /// 钩子二: 依据逐 cell 最大平方边界距离 `max_bdist2`
    /// 筛选出可能被重标号的 cell 下标.
    fn select_relabel_candidates(&self, cells: &mut [Cell], max_bdist2: &[f64]) -> Vec<usize>;

    /// 边界移动距离阈值, 物理单位.
    fn threshold(&self) -> f64;

    /// 是否允许背景在两个前景标签之间显形.
    fn allow_background_appearance(&self) -> bool;

    /// 重建背景标签.
    fn rec_background(&self) -> Label;
}

/// 容忍分析结束后的标签汇总表. ILP 构建阶段只依赖该表与 cell 列表.
///
/// 所有集合均有序, 保证变量编号可复现.
#[derive(Debug, Clone, Default)]
pub struct MatchTable {
    /// 全体真值标签.
    gt_labels: BTreeSet<Label>,

    /// 容忍初始化后各 cell 携带的重建标签. ILP 的标签保留约束作用于该集合.
    rec_labels: BTreeSet<Label>,

    /// 真值标签 -> 其可能匹配到的重建标签.
    by_gt: BTreeMap<Label, BTreeSet<Label>>,

    /// 重建标签 -> 其可能匹配到的真值标签.
    by_rec: BTreeMap<Label, BTreeSet<Label>>,
}

impl MatchTable {
    /// 登记一对可能匹配.
    fn register(&mut self, gt_label: Label, rec_label: Label) {
        self.gt_labels.insert(gt_label);
        self.by_gt.entry(gt_label).or_default().insert(rec_label);
        self.by_rec.entry(rec_label).or_default().insert(gt_label);
    }

    /// 全体真值标签, 升序.
    #[inline]
    pub fn gt_labels(&self) -> &BTreeSet<Label> {
        &self.gt_labels
    }

    /// 必须在解中保留的重建标签, 升序.
    #[inline]
    pub fn rec_labels(&self) -> &BTreeSet<Label> {
        &self.rec_labels
    }

    /// `gt_label` 可能匹配到的重建标签, 升序. 未知标签返回空集.
    pub fn matches_by_gt(&self, gt_label: Label) -> impl Iterator<Item = Label> + '_ {
        self.by_gt.get(&gt_label).into_iter().flatten().copied()
    }

    /// `rec_label` 可能匹配到的真值标签, 升序. 未知标签返回空集.
    pub fn matches_by_rec(&self, rec_label: Label) -> impl Iterator<Item = Label> + '_ {
        self.by_rec.get(&rec_label).into_iter().flatten().copied()
    }
}

/// 容忍分析驱动: 填充每个 cell 的可取标签集合并汇总 [`MatchTable`].
///
/// 流程与开销的主体都在备选标签枚举上; 候选筛选把枚举范围压缩到
/// "每个体素都够得着某条边界" 的 cell. 启用 `rayon` 特性时,
/// 逐候选的枚举并行执行, 结果与串行逐字节一致.
pub fn analyze(f: &dyn ToleranceFunction, cells: &mut [Cell], rec: &LabelVolume) -> MatchTable {
    f.init_possible_labels(cells);

    let boundary = distance::boundary_map(rec);
    let bdist2 = edt::squared_edt(&boundary, rec.pix_dim());

    // 逐 cell 的最大平方边界距离.
    let max_bdist2: Vec<f64> = cells
        .iter()
        .map(|c| {
            c.locations()
                .iter()
                .map(|pos| bdist2[*pos])
                .fold(0.0, f64::max)
        })
        .collect();

    let candidates = f.select_relabel_candidates(cells, &max_bdist2);
    debug!("{} 个 cell 可以被重标号", candidates.len());

    if !candidates.is_empty() {
        let offsets = distance::threshold_offsets(rec, f.threshold());
        debug!(
            "阈值 {} 的邻域内共有 {} 个偏移",
            f.threshold(),
            offsets.len()
        );

        let alternatives = enumerate_candidates(&candidates, cells, &offsets, rec, &boundary);

        for (i, mut labels) in candidates.into_iter().zip(alternatives) {
            let cell = &mut cells[i];
            // 两条相向的容忍边界移动可以在前景之间露出一条背景细缝.
            // 充分条件是该 cell 已被其它标签完整覆盖, 即存在至少一个备选.
            if f.allow_background_appearance()
                && !labels.is_empty()
                && cell.rec_label() != f.rec_background()
            {
                labels.insert(f.rec_background());
            }
            for label in labels {
                cell.add_possible_label(label);
            }
        }
    }

    let mut table = MatchTable::default();
    for cell in cells.iter() {
        debug_assert!(!cell.possible_labels().is_empty());
        debug_assert!(cell.possible_labels().contains(&cell.rec_label()));
        table.rec_labels.insert(cell.rec_label());
        for label in cell.possible_labels().iter().copied() {
            table.register(cell.gt_label(), label);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::{analyze, DistanceTolerance, SkeletonTolerance, ToleranceFunction};
    use crate::cells::extract_cells;
    use crate::LabelVolume;
    use ndarray::arr2;

    fn analyze_pair(
        gt: &LabelVolume,
        rec: &LabelVolume,
        f: &dyn ToleranceFunction,
    ) -> Vec<crate::Cell> {
        let mut cells = extract_cells(gt, rec).unwrap();
        let _ = analyze(f, &mut cells, rec);
        cells
    }

    /// 单 cell 的容忍正确性: `l` 可取当且仅当 cell 每个体素都在
    /// 某个标签 `l` 的边界体素的阈值距离内.
    #[test]
    fn test_tolerance_correctness_single_cell() {
        // 行方向: 两列 1, 一列 2, 三列 3.
        let gt = LabelVolume::from_frame(arr2(&[[1u32, 1, 1, 1, 1, 1]]), [1.0; 3]);
        let rec = LabelVolume::from_frame(arr2(&[[1u32, 1, 2, 3, 3, 3]]), [1.0; 3]);

        let f = DistanceTolerance::new(1.0, false, 0);
        let cells = analyze_pair(&gt, &rec, &f);

        // 宽度为 1 的 cell (1,2): 左右各一列 1 和 3 的边界体素, 全部可取.
        let c2 = cells.iter().find(|c| c.rec_label() == 2).unwrap();
        assert!(c2.possible_labels().iter().copied().eq([1, 2, 3]));

        // cell (1,1) 宽 2: 标签 3 的最近边界在 2 列之外, 标签 2 邻接,
        // 但左端体素距其 2 列, 同样超出阈值.
        let c1 = cells.iter().find(|c| c.rec_label() == 1).unwrap();
        assert!(c1.possible_labels().iter().copied().eq([1]));
    }

    /// 背景显形开启时, 存在备选的前景 cell 可额外取背景标签.
    #[test]
    fn test_background_appearance() {
        let gt = LabelVolume::from_frame(arr2(&[[1u32, 1, 1, 1, 1, 1]]), [1.0; 3]);
        let rec = LabelVolume::from_frame(arr2(&[[1u32, 1, 2, 3, 3, 3]]), [1.0; 3]);

        let f = DistanceTolerance::new(1.0, true, 0);
        let cells = analyze_pair(&gt, &rec, &f);

        let c2 = cells.iter().find(|c| c.rec_label() == 2).unwrap();
        assert!(c2.possible_labels().iter().copied().eq([0, 1, 2, 3]));

        // 没有备选的 cell 不会凭空获得背景标签.
        let c1 = cells.iter().find(|c| c.rec_label() == 1).unwrap();
        assert!(c1.possible_labels().iter().copied().eq([1]));
    }

    /// 匹配汇总表覆盖所有 (真值, 可取标签) 对.
    #[test]
    fn test_match_table() {
        let gt = LabelVolume::from_frame(arr2(&[[1u32, 1, 2, 2]]), [1.0; 3]);
        let rec = LabelVolume::from_frame(arr2(&[[4u32, 4, 5, 5]]), [1.0; 3]);

        let f = DistanceTolerance::new(0.0, false, 0);
        let mut cells = extract_cells(&gt, &rec).unwrap();
        let table = analyze(&f, &mut cells, &rec);

        assert!(table.gt_labels().iter().copied().eq([1, 2]));
        assert!(table.rec_labels().iter().copied().eq([4, 5]));
        assert!(table.matches_by_gt(1).eq([4]));
        assert!(table.matches_by_gt(2).eq([5]));
        assert!(table.matches_by_rec(5).eq([2]));
        assert!(table.matches_by_gt(9).next().is_none());
    }

    /// 骨架模式: 非骨架 cell 被改写为哨兵并退出候选.
    #[test]
    fn test_skeleton_rewires_background() {
        use crate::consts::IGNORE;

        // 3x3 重建全为 5, 真值在中间行画一条标签 1 的线.
        let gt = LabelVolume::from_frame(arr2(&[[0u32, 0, 0], [1, 1, 1], [0, 0, 0]]), [1.0; 3]);
        let rec = LabelVolume::from_frame(arr2(&[[5u32; 3]; 3]), [1.0; 3]);

        let f = SkeletonTolerance::new(3.0, 0, 0);
        let cells = analyze_pair(&gt, &rec, &f);

        for cell in cells.iter() {
            if cell.gt_label() == IGNORE {
                assert_eq!(cell.rec_label(), IGNORE);
                assert!(cell.possible_labels().iter().copied().eq([IGNORE]));
            } else {
                assert_eq!(cell.gt_label(), 1);
                assert!(cell.possible_labels().contains(&5));
            }
        }
    }
}

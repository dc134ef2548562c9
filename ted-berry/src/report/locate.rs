//! 错误定位: 为每个 split/merge 给出一个代表性的空间位置.
//!
//! 对每个被 split 的真值标签, 把它的重建伙伴看成一张虚拟图:
//! 伙伴之间的边权是二者 cell 集合间的最小物理距离.
//! 从重叠最大的伙伴出发做 Prim 式生长, 每纳入一个新伙伴
//! 就产出一条 split 记录; 一个 k 路 split 恰好产出 k - 1 条记录.
//! merge 完全对称.

use std::collections::{BTreeMap, BTreeSet};

use binary_heap_plus::BinaryHeap;

use super::CellMap;
use crate::cells::Cell;
use crate::{Idx3d, Label};

/// 一条 split 错误记录.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SplitError {
    /// 被 split 的真值标签.
    pub gt_label: Label,

    /// 已在生长树中的重建伙伴.
    pub rec_label_1: Label,

    /// 本条记录新纳入的重建伙伴.
    pub rec_label_2: Label,

    /// 两伙伴 cell 集合间的最小物理距离.
    pub distance: f64,

    /// 取得最小距离的体素对的中点.
    pub location: Idx3d,

    /// 新纳入伙伴在该真值标签下的体素数.
    pub size: usize,
}

/// 一条 merge 错误记录.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MergeError {
    /// 发生 merge 的重建标签.
    pub rec_label: Label,

    /// 已在生长树中的真值伙伴.
    pub gt_label_1: Label,

    /// 本条记录新纳入的真值伙伴.
    pub gt_label_2: Label,

    /// 两伙伴 cell 集合间的最小物理距离.
    pub distance: f64,

    /// 取得最小距离的体素对的中点.
    pub location: Idx3d,

    /// 新纳入伙伴在该重建标签下的体素数.
    pub size: usize,
}

/// 两个体素索引间的平方物理距离. `res` 按 `(z, 高, 宽)` 排列.
#[inline]
fn physical_dist2(a: Idx3d, b: Idx3d, res: [f64; 3]) -> f64 {
    let dz = (a.0 as f64 - b.0 as f64) * res[0];
    let dh = (a.1 as f64 - b.1 as f64) * res[1];
    let dw = (a.2 as f64 - b.2 as f64) * res[2];
    dz * dz + dh * dh + dw * dw
}

/// 两个 cell 下标集合间最近的体素对: `(平方距离, 甲体素, 乙体素)`.
fn closest_locations(
    cells: &[Cell],
    a: &BTreeSet<usize>,
    b: &BTreeSet<usize>,
    res: [f64; 3],
) -> (f64, Idx3d, Idx3d) {
    let mut best = (f64::INFINITY, (0, 0, 0), (0, 0, 0));
    for i in a.iter() {
        for j in b.iter() {
            for &pa in cells[*i].locations() {
                for &pb in cells[*j].locations() {
                    let d2 = physical_dist2(pa, pb, res);
                    if d2 < best.0 {
                        best = (d2, pa, pb);
                    }
                }
            }
        }
    }
    best
}

/// 体素对的中点, 逐分量向下取整.
#[inline]
fn midpoint(a: Idx3d, b: Idx3d) -> Idx3d {
    ((a.0 + b.0) / 2, (a.1 + b.1) / 2, (a.2 + b.2) / 2)
}

/// 生长树上待考察的一条边.
struct Edge {
    dist2: f64,
    from: Label,
    to: Label,
    location: Idx3d,
}

/// 对一行伙伴映射执行 Prim 式生长, 依次回调产出每条树边.
///
/// 种子是重叠体素最多的伙伴 (平手取较小标签).
/// 边的考察次序按 (距离, 两端标签) 排序, 保证结果可复现.
fn grow<F>(cells: &[Cell], partners: &BTreeMap<Label, BTreeSet<usize>>, res: [f64; 3], mut emit: F)
where
    F: FnMut(Label, Label, f64, Idx3d, usize),
{
    debug_assert!(partners.len() >= 2);

    let overlap =
        |ids: &BTreeSet<usize>| ids.iter().map(|i| cells[*i].size()).sum::<usize>();

    // 种子: 重叠体素最多的伙伴, 平手取较小标签.
    let mut best: Option<(usize, Label)> = None;
    for (label, ids) in partners.iter() {
        let o = overlap(ids);
        if best.map_or(true, |(bo, _)| o > bo) {
            best = Some((o, *label));
        }
    }
    let seed = best.unwrap().1;

    let mut in_tree: BTreeSet<Label> = BTreeSet::new();
    let mut heap = BinaryHeap::new_by(|a: &Edge, b: &Edge| {
        b.dist2
            .total_cmp(&a.dist2)
            .then(b.from.cmp(&a.from))
            .then(b.to.cmp(&a.to))
    });

    let attach = |label: Label, in_tree: &BTreeSet<Label>, heap: &mut BinaryHeap<Edge, _>| {
        for (other, ids) in partners.iter() {
            if in_tree.contains(other) || *other == label {
                continue;
            }
            let (d2, pa, pb) = closest_locations(cells, &partners[&label], ids, res);
            heap.push(Edge {
                dist2: d2,
                from: label,
                to: *other,
                location: midpoint(pa, pb),
            });
        }
    };

    in_tree.insert(seed);
    attach(seed, &in_tree, &mut heap);

    while in_tree.len() < partners.len() {
        let edge = heap.pop().expect("伙伴图是完全图, 边不可能耗尽");
        if in_tree.contains(&edge.to) {
            continue;
        }
        in_tree.insert(edge.to);
        emit(
            edge.from,
            edge.to,
            edge.dist2.sqrt(),
            edge.location,
            overlap(&partners[&edge.to]),
        );
        attach(edge.to, &in_tree, &mut heap);
    }
}

/// 为全部 split 行产出定位记录.
pub(crate) fn localize_splits(
    cells: &[Cell],
    splits: &CellMap,
    res: [f64; 3],
) -> Vec<SplitError> {
    let mut ans = Vec::with_capacity(splits.len());
    for (gt_label, partners) in splits.iter() {
        grow(cells, partners, res, |from, to, distance, location, size| {
            ans.push(SplitError {
                gt_label: *gt_label,
                rec_label_1: from,
                rec_label_2: to,
                distance,
                location,
                size,
            });
        });
    }
    ans
}

/// 为全部 merge 行产出定位记录.
pub(crate) fn localize_merges(
    cells: &[Cell],
    merges: &CellMap,
    res: [f64; 3],
) -> Vec<MergeError> {
    let mut ans = Vec::with_capacity(merges.len());
    for (rec_label, partners) in merges.iter() {
        grow(cells, partners, res, |from, to, distance, location, size| {
            ans.push(MergeError {
                rec_label: *rec_label,
                gt_label_1: from,
                gt_label_2: to,
                distance,
                location,
                size,
            });
        });
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::{closest_locations, localize_splits, physical_dist2};
    use crate::cells::extract_cells;
    use crate::report::CellMap;
    use crate::LabelVolume;
    use ndarray::arr2;
    use std::collections::BTreeSet;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// 对角体素对的距离是平方和 (而不是平方积).
    #[test]
    fn test_physical_dist2_diagonal() {
        // (1,1,1) 对角: 平方和 = 3, 平方积 = 1. 在此处区分.
        assert!(f64_eq(physical_dist2((0, 0, 0), (1, 1, 1), [1.0; 3]), 3.0));
        // 各向异性: (2*2)^2 + (1*3)^2 + (1*1)^2.
        assert!(f64_eq(
            physical_dist2((0, 0, 0), (2, 1, 1), [2.0, 3.0, 1.0]),
            26.0
        ));
    }

    /// 最近体素对在两个多体素 cell 集合之间取得.
    #[test]
    fn test_closest_locations() {
        let gt = LabelVolume::from_frame(arr2(&[[1u32, 1, 0, 2, 2]]), [1.0; 3]);
        let rec = gt.clone();
        let cells = extract_cells(&gt, &rec).unwrap();
        let find = |label: u32| -> BTreeSet<usize> {
            cells
                .iter()
                .enumerate()
                .filter(|(_, c)| c.rec_label() == label)
                .map(|(i, _)| i)
                .collect()
        };

        let (d2, pa, pb) = closest_locations(&cells, &find(1), &find(2), [1.0; 3]);
        assert!(f64_eq(d2, 4.0));
        assert_eq!(pa, (0, 0, 1));
        assert_eq!(pb, (0, 0, 3));
    }

    /// 三路 split 产出两条记录, 种子是重叠最大的伙伴.
    #[test]
    fn test_localize_three_way_split() {
        // gt 全 1; rec 三段: 4 (三列), 5 (两列), 6 (一列).
        let gt = LabelVolume::from_frame(arr2(&[[1u32; 6]]), [1.0; 3]);
        let rec = LabelVolume::from_frame(arr2(&[[4u32, 4, 4, 5, 5, 6]]), [1.0; 3]);
        let cells = extract_cells(&gt, &rec).unwrap();

        let mut splits = CellMap::new();
        let row = splits.entry(1).or_default();
        for (i, c) in cells.iter().enumerate() {
            row.entry(c.rec_label()).or_default().insert(i);
        }

        let errors = localize_splits(&cells, &splits, [1.0; 3]);
        assert_eq!(errors.len(), 2);

        // 种子为 4 (重叠 3). 第一条边 4 -> 5 (相邻, 距离 1),
        // 第二条边 5 -> 6 (相邻, 距离 1, 比 4 -> 6 的 3 更近).
        assert_eq!((errors[0].rec_label_1, errors[0].rec_label_2), (4, 5));
        assert!(f64_eq(errors[0].distance, 1.0));
        assert_eq!(errors[0].size, 2);
        assert_eq!((errors[1].rec_label_1, errors[1].rec_label_2), (5, 6));
        assert!(f64_eq(errors[1].distance, 1.0));
        assert_eq!(errors[1].size, 1);
        assert_eq!(errors[0].gt_label, 1);
        // 4 的最右列与 5 的最左列之间的中点.
        assert_eq!(errors[0].location, (0, 0, 2));
    }
}

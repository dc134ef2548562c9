//! 体积模式容忍函数.
//!
//! 判定准则: cell `C` 可以取备选重建标签 `l`, 当且仅当 `C` 的每个体素
//! 都在某个标签为 `l` 的重建边界体素的 `tau` 物理距离之内.

use std::collections::{BTreeSet, HashMap, HashSet};

use itertools::iproduct;
use log::debug;
use ndarray::Array3;

use super::ToleranceFunction;
use crate::cells::Cell;
use crate::{Label, LabelVolume, Off3d};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use ndarray::Zip;

        /// 填充边界图. 逐体素判定互不依赖, 并行执行.
        fn fill_boundary(map: &mut Array3<bool>, rec: &LabelVolume) {
            Zip::indexed(map).par_for_each(|pos, b| *b = is_boundary_voxel(rec, pos));
        }
    } else {
        /// 填充边界图.
        fn fill_boundary(map: &mut Array3<bool>, rec: &LabelVolume) {
            for (pos, b) in map.indexed_iter_mut() {
                *b = is_boundary_voxel(rec, pos);
            }
        }
    }
}

/// 距离容忍函数 (体积真值).
#[derive(Debug, Clone)]
pub struct DistanceTolerance {
    /// 允许的边界移动距离, 物理单位.
    threshold: f64,

    /// 是否允许相向的边界移动让背景在前景之间 "显形".
    allow_background_appearance: bool,

    /// 重建背景标签.
    rec_background: Label,
}

impl DistanceTolerance {
    /// 创建体积模式容忍函数.
    ///
    /// `threshold` 为允许的边界移动距离 (物理单位), 必须非负,
    /// 由驱动器在参数检查时保证.
    #[inline]
    pub fn new(threshold: f64, allow_background_appearance: bool, rec_background: Label) -> Self {
        debug_assert!(threshold >= 0.0);
        Self {
            threshold,
            allow_background_appearance,
            rec_background,
        }
    }
}

impl ToleranceFunction for DistanceTolerance {
    fn init_possible_labels(&self, cells: &mut [Cell]) {
        // 每个 cell 至少保有自己原本的标签.
        for cell in cells.iter_mut() {
            cell.add_possible_label(cell.rec_label());
        }
    }

    fn select_relabel_candidates(&self, cells: &mut [Cell], max_bdist2: &[f64]) -> Vec<usize> {
        // 必要条件: cell 的每个体素都够得着某条边界.
        let t2 = self.threshold * self.threshold;
        (0..cells.len()).filter(|i| max_bdist2[*i] <= t2).collect()
    }

    #[inline]
    fn threshold(&self) -> f64 {
        self.threshold
    }

    #[inline]
    fn allow_background_appearance(&self) -> bool {
        self.allow_background_appearance
    }

    #[inline]
    fn rec_background(&self) -> Label {
        self.rec_background
    }
}

/// 标出重建体中的边界体素.
///
/// 边界体素: 与某个 6-邻域体素标签不同, 或位于标签体边缘
/// (z 方向只有在深度大于 1 时才算边缘).
pub(crate) fn boundary_map(rec: &LabelVolume) -> Array3<bool> {
    let (z_len, h_len, w_len) = rec.shape();
    let mut map = Array3::from_elem(rec.shape(), false);
    debug!("构建 {w_len}x{h_len}x{z_len} 边界图");
    fill_boundary(&mut map, rec);
    map
}

/// 判断 `(z, h, w)` 处的重建体素是否是边界体素.
fn is_boundary_voxel(rec: &LabelVolume, (z, h, w): crate::Idx3d) -> bool {
    let (z_len, h_len, w_len) = rec.shape();

    // 标签体边缘一律是边界; z 方向只在多于一个切片时考虑.
    if w == 0 || w + 1 == w_len || h == 0 || h + 1 == h_len {
        return true;
    }
    if z_len > 1 && (z == 0 || z + 1 == z_len) {
        return true;
    }

    let center = rec[(z, h, w)];
    let differs = |pos: crate::Idx3d| rec[pos] != center;
    differs((z, h, w - 1))
        || differs((z, h, w + 1))
        || differs((z, h - 1, w))
        || differs((z, h + 1, w))
        || (z > 0 && differs((z - 1, h, w)))
        || (z + 1 < z_len && differs((z + 1, h, w)))
}

/// 预计算阈值邻域: 所有物理范数不超过 `tau` 的整数偏移.
///
/// 轴向偏移最先插入, 这样内层枚举在轴向上就能碰到大部分覆盖标签,
/// 从而尽早触发提前退出. 每个方向的步数不会超过对应维度的最大有效位移.
pub(crate) fn threshold_offsets(rec: &LabelVolume, tau: f64) -> Vec<Off3d> {
    let (z_len, h_len, w_len) = rec.shape();
    let [rz, rh, rw] = rec.pix_dim();

    let steps = |len: usize, r: f64| ((tau / r).round() as usize).min(len.saturating_sub(1)) as isize;
    let (mz, mh, mw) = (steps(z_len, rz), steps(h_len, rh), steps(w_len, rw));

    let mut offsets = Vec::with_capacity(64);
    for z in 1..=mz {
        offsets.push((z, 0, 0));
        offsets.push((-z, 0, 0));
    }
    for h in 1..=mh {
        offsets.push((0, h, 0));
        offsets.push((0, -h, 0));
    }
    for w in 1..=mw {
        offsets.push((0, 0, w));
        offsets.push((0, 0, -w));
    }

    let t2 = tau * tau;
    for (z, h, w) in iproduct!(-mz..=mz, -mh..=mh, -mw..=mw) {
        // 轴向偏移已经插入, 中心点不需要.
        if (z == 0 && h == 0) || (z == 0 && w == 0) || (h == 0 && w == 0) {
            continue;
        }
        let (dz, dh, dw) = (z as f64 * rz, h as f64 * rh, w as f64 * rw);
        if dz * dz + dh * dh + dw * dw <= t2 {
            offsets.push((z, h, w));
        }
    }
    offsets
}

/// 枚举单个 cell 的全部备选标签.
///
/// 维护 `counts[l]` = cell 中 "其 `tau`-邻域内出现过标签为 `l` 的
/// 边界体素" 的体素个数; `l` 是备选标签当且仅当计数等于 cell 体素总数.
/// 一旦某个体素对任何标签都没有贡献, 该 cell 不可能有备选标签, 立即中止.
pub(crate) fn alternative_labels(
    cell: &Cell,
    offsets: &[Off3d],
    rec: &LabelVolume,
    boundary: &Array3<bool>,
) -> BTreeSet<Label> {
    let cell_label = cell.rec_label();

    // 每个备选标签在多少个已访问体素的邻域里出现过.
    let mut counts: HashMap<Label, u32> = HashMap::new();

    // 已访问体素数.
    let mut num_visited = 0u32;

    // 备选标签数上界: 从首个体素邻域内的标签数开始, 只会逐体素减少.
    let mut max_alternatives = 0u32;

    for &i in cell.locations() {
        // 当前体素邻域里见过的标签.
        let mut neighbourhood: HashSet<Label> = HashSet::new();
        num_visited += 1;

        // 当前体素处计数达到 num_visited 的标签个数.
        let mut num_complete = 0u32;

        for &off in offsets {
            let Some(j) = rec.offset(i, off) else {
                continue;
            };
            if !boundary[j] {
                continue;
            }

            let label = rec[j];
            if label == cell_label || !neighbourhood.insert(label) {
                continue;
            }

            // 该标签在当前体素的邻域里第一次出现.
            let count = counts.entry(label).or_insert(0);
            *count += 1;
            if *count == num_visited {
                num_complete += 1;
                // 所有可能完整的标签都已经见到, 当前体素无需再搜.
                if num_complete == max_alternatives {
                    break;
                }
            }
        }

        max_alternatives = num_complete;
        if max_alternatives == 0 {
            break;
        }
    }

    counts
        .into_iter()
        .filter(|(_, count)| *count as usize == cell.size())
        .map(|(label, _)| label)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{boundary_map, threshold_offsets};
    use crate::LabelVolume;
    use ndarray::{arr2, Array3};

    /// 内部同质体素不是边界, 标签变化处与图像边缘是边界.
    #[test]
    fn test_boundary_map_basic() {
        let mut data = Array3::<u32>::zeros((1, 5, 5));
        data.slice_mut(ndarray::s![.., .., 3..]).fill(7);
        let rec = LabelVolume::new(data, [1.0; 3]);
        let b = boundary_map(&rec);

        // 深度为 1: z 边缘不参与判定, (0, 2, 1) 是纯内部体素.
        assert!(!b[(0, 2, 1)]);
        // 标签 0/7 交界两侧.
        assert!(b[(0, 2, 2)]);
        assert!(b[(0, 2, 3)]);
        // 图像四边.
        assert!(b[(0, 0, 1)]);
        assert!(b[(0, 4, 1)]);
        assert!(b[(0, 2, 0)]);
        assert!(b[(0, 2, 4)]);
    }

    /// 多切片时 z 边缘也是边界.
    #[test]
    fn test_boundary_map_z_border() {
        let rec = LabelVolume::new(Array3::<u32>::zeros((3, 5, 5)), [1.0; 3]);
        let b = boundary_map(&rec);
        assert!(b[(0, 2, 2)]);
        assert!(b[(2, 2, 2)]);
        assert!(!b[(1, 2, 2)]);
    }

    /// 邻域偏移: 轴向偏移在最前, 全部偏移物理范数不超过阈值.
    #[test]
    fn test_threshold_offsets() {
        let rec = LabelVolume::from_frame(arr2(&[[0u32; 8]; 8]), [1.0; 3]);
        let offs = threshold_offsets(&rec, 2.0);

        // 深度 1: 无 z 向偏移. 轴向: h 两步, w 两步, 各双向.
        assert_eq!(&offs[..8], &[
            (0, 1, 0),
            (0, -1, 0),
            (0, 2, 0),
            (0, -2, 0),
            (0, 0, 1),
            (0, 0, -1),
            (0, 0, 2),
            (0, 0, -2),
        ]);
        for &(z, h, w) in offs.iter() {
            let d2 = (z * z + h * h + w * w) as f64;
            assert!(d2 <= 4.0 + 1e-12);
            assert_ne!((z, h, w), (0, 0, 0));
        }
        // (±1, ±1) 四个对角偏移补足.
        assert_eq!(offs.len(), 12);
    }

    /// 阈值为零时邻域为空.
    #[test]
    fn test_threshold_offsets_zero() {
        let rec = LabelVolume::from_frame(arr2(&[[0u32; 4]; 4]), [1.0; 3]);
        assert!(threshold_offsets(&rec, 0.0).is_empty());
    }
}

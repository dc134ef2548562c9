//! 联合连通域分解.

use std::collections::VecDeque;

use log::debug;
use ndarray::Array3;

use super::Cell;
use crate::{EvalError, EvalResult, LabelVolume};

/// 在 `(真值, 重建)` 标签对上运行连通域分解, 返回有序的 cell 列表.
///
/// 连通性取 26-邻域 (面, 棱, 角相邻). cell 按其扫描序首体素的先后编号,
/// 因此对相同输入, 返回的列表逐字节稳定. 每个体素恰好属于一个 cell,
/// 全体 cell 的体素总数等于标签体体素总数.
///
/// # 错误
///
/// 真值与重建形状不一致时返回 [`EvalError::ShapeMismatch`].
/// 空标签体返回空列表.
pub fn extract_cells(gt: &LabelVolume, rec: &LabelVolume) -> EvalResult<Vec<Cell>> {
    if gt.shape() != rec.shape() {
        return Err(EvalError::ShapeMismatch(gt.shape(), rec.shape()));
    }
    if gt.is_empty() {
        return Ok(vec![]);
    }

    let (z_len, h_len, w_len) = gt.shape();
    debug!("在 {w_len}x{h_len}x{z_len} 标签体上提取 cell");

    // 体素所属 cell 的编号, 内部从 1 开始; 0 预留为 "未访问".
    let mut cell_ids = Array3::<u32>::zeros(gt.shape());
    let mut cells: Vec<Cell> = Vec::with_capacity(16);
    let mut bfs_q = VecDeque::with_capacity(64);

    let gt_view = gt.data();
    for seed in gt_view.indexed_iter().map(|(pos, _)| pos) {
        if cell_ids[seed] != 0 {
            continue;
        }

        let pair = (gt[seed], rec[seed]);
        let id = cells.len() as u32 + 1;
        let mut cell = Cell::new(pair.0, pair.1);

        // bfs
        cell_ids[seed] = id;
        bfs_q.push_back(seed);
        while let Some(cur) = bfs_q.pop_front() {
            cell.push(cur);
            for neigh in gt.moore_neighbours(cur) {
                if cell_ids[neigh] == 0 && (gt[neigh], rec[neigh]) == pair {
                    cell_ids[neigh] = id;
                    bfs_q.push_back(neigh);
                }
            }
        }

        // 体素坐标统一回到扫描序, 与 cell 编号的约定一致.
        cell.sort_locations();
        cells.push(cell);
    }

    debug!("共提取 {} 个 cell", cells.len());
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::extract_cells;
    use crate::{EvalError, LabelVolume};
    use ndarray::{arr2, Array3};

    fn vol_2d(rows: &[[u32; 4]; 2]) -> LabelVolume {
        LabelVolume::from_frame(arr2(rows), [1.0; 3])
    }

    /// 形状不一致必须报错.
    #[test]
    fn test_extract_shape_mismatch() {
        let a = vol_2d(&[[1, 1, 1, 1], [1, 1, 1, 1]]);
        let b = LabelVolume::from_frame(arr2(&[[1u32, 1], [1, 1]]), [1.0; 3]);
        let e = extract_cells(&a, &b).unwrap_err();
        assert!(matches!(e, EvalError::ShapeMismatch(..)));
    }

    /// 空体返回空列表.
    #[test]
    fn test_extract_empty() {
        let v = LabelVolume::new(Array3::zeros((0, 0, 0)), [1.0; 3]);
        assert!(extract_cells(&v, &v).unwrap().is_empty());
    }

    /// cell 必须划分整个标签体, 且对内标签恒定.
    #[test]
    fn test_extract_partition() {
        let gt = vol_2d(&[[1, 1, 2, 2], [1, 1, 2, 2]]);
        let rec = vol_2d(&[[1, 3, 3, 2], [1, 3, 3, 2]]);
        let cells = extract_cells(&gt, &rec).unwrap();

        assert_eq!(cells.iter().map(|c| c.size()).sum::<usize>(), gt.size());
        let mut seen = std::collections::HashSet::new();
        for c in cells.iter() {
            for pos in c.locations() {
                assert!(seen.insert(*pos));
                assert_eq!(gt[*pos], c.gt_label());
                assert_eq!(rec[*pos], c.rec_label());
            }
        }
        // (1,1), (1,3), (2,3), (2,2) 四种标签对.
        assert_eq!(cells.len(), 4);
    }

    /// 相同标签对的两个不相邻区域必须是两个 cell.
    #[test]
    fn test_extract_disconnected_same_pair() {
        let gt = vol_2d(&[[1, 0, 0, 1], [1, 0, 0, 1]]);
        let rec = gt.clone();
        let cells = extract_cells(&gt, &rec).unwrap();
        let ones = cells
            .iter()
            .filter(|c| c.gt_label() == 1 && c.rec_label() == 1)
            .count();
        assert_eq!(ones, 2);
        assert_eq!(cells.len(), 3);
    }

    /// 角相邻的体素属于同一个 cell (26-邻域).
    #[test]
    fn test_extract_corner_connectivity() {
        let gt = LabelVolume::from_frame(arr2(&[[5u32, 0], [0, 5]]), [1.0; 3]);
        let rec = gt.clone();
        let cells = extract_cells(&gt, &rec).unwrap();
        // 对角的两个 5 连成一个 cell, 对角的两个 0 同理.
        assert_eq!(cells.len(), 2);
    }

    /// cell 编号按扫描序首体素排序, 重复运行结果一致.
    #[test]
    fn test_extract_deterministic() {
        let gt = vol_2d(&[[1, 1, 2, 2], [3, 3, 2, 2]]);
        let rec = vol_2d(&[[1, 4, 4, 2], [3, 3, 2, 2]]);
        let a = extract_cells(&gt, &rec).unwrap();
        let b = extract_cells(&gt, &rec).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.locations(), y.locations());
            assert_eq!(x.gt_label(), y.gt_label());
            assert_eq!(x.rec_label(), y.rec_label());
        }
        assert_eq!(a[0].locations()[0], (0, 0, 0));
    }
}

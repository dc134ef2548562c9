//! 各向异性平方欧氏距离变换.
//!
//! 沿三个坐标轴逐一做一维下包络变换 (Felzenszwalb–Huttenlocher),
//! 每个轴使用各自的体素间距, 得到每个体素到最近边界体素的平方物理距离.
//! 轴可分离意味着结果在强各向异性下只是欧氏距离的近似,
//! 但与逐轴间距加权的定义完全一致.

use ndarray::{Array3, ArrayViewMut1, Axis};

/// 计算 `mask` 中每个体素到最近 `true` 体素的平方物理距离.
///
/// `res` 是按 `(z, 高, 宽)` 排列的体素分辨率. `true` 体素的距离为 0;
/// 如果 `mask` 中没有任何 `true` 体素, 则全部距离为正无穷.
pub(crate) fn squared_edt(mask: &Array3<bool>, res: [f64; 3]) -> Array3<f64> {
    let mut dist = mask.map(|&b| if b { 0.0 } else { f64::INFINITY });

    // 先沿宽方向, 再高, 再 z. 三个一维变换的次序不影响结果.
    for axis in [2usize, 1, 0] {
        transform_lanes(&mut dist, axis, res[axis]);
    }
    dist
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use ndarray::parallel::prelude::*;

        /// 逐 lane 跑一维变换. 各 lane 互不依赖, 并行执行.
        fn transform_lanes(dist: &mut Array3<f64>, axis: usize, spacing: f64) {
            dist.lanes_mut(Axis(axis))
                .into_par_iter()
                .for_each(|lane| dt_1d(lane, spacing));
        }
    } else {
        /// 逐 lane 跑一维变换.
        fn transform_lanes(dist: &mut Array3<f64>, axis: usize, spacing: f64) {
            dist.lanes_mut(Axis(axis))
                .into_iter()
                .for_each(|lane| dt_1d(lane, spacing));
        }
    }
}

/// 单条一维下包络变换: `f[p] <- min_q ((p - q) * s)^2 + f[q]`.
///
/// 无穷高的抛物线 (该轴向上没有任何有限源) 会被直接跳过;
/// 整条 lane 均为无穷时保持原样.
fn dt_1d(mut f: ArrayViewMut1<f64>, s: f64) {
    debug_assert!(s > 0.0);
    let n = f.len();
    if n <= 1 {
        return;
    }
    let s2 = s * s;

    // 包络求值阶段会覆写 `f`, 因此先固化一份原值.
    let vals: Vec<f64> = f.iter().copied().collect();

    // v: 下包络抛物线的中心下标; z: 相邻抛物线的分界点 (下标单位).
    // 不变量: z.len() == v.len() + 1.
    let mut v: Vec<usize> = Vec::with_capacity(n);
    let mut z: Vec<f64> = Vec::with_capacity(n + 1);

    let parabola = |q: usize| vals[q] + (q * q) as f64 * s2;
    let intersect = |q: usize, p: usize| (parabola(q) - parabola(p)) / (2.0 * s2 * (q - p) as f64);

    for q in 0..n {
        if vals[q].is_infinite() {
            continue;
        }
        if v.is_empty() {
            v.push(q);
            z.push(f64::NEG_INFINITY);
            z.push(f64::INFINITY);
            continue;
        }

        let mut inter = intersect(q, *v.last().unwrap());
        while inter <= z[v.len() - 1] {
            v.pop();
            z.pop();
            if v.is_empty() {
                break;
            }
            inter = intersect(q, *v.last().unwrap());
        }
        if v.is_empty() {
            v.push(q);
            z.push(f64::INFINITY);
        } else {
            *z.last_mut().unwrap() = inter;
            v.push(q);
            z.push(f64::INFINITY);
        }
    }

    if v.is_empty() {
        return;
    }

    let mut k = 0usize;
    for p in 0..n {
        while z[k + 1] < p as f64 {
            k += 1;
        }
        let c = v[k];
        let d = p.abs_diff(c) as f64 * s;
        f[p] = vals[c] + d * d;
    }
}

#[cfg(test)]
mod tests {
    use super::squared_edt;
    use ndarray::Array3;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// 与朴素的全对比较结果一致.
    fn brute_force(mask: &Array3<bool>, res: [f64; 3]) -> Array3<f64> {
        let mut out = Array3::from_elem(mask.raw_dim(), f64::INFINITY);
        for (pos, d) in out.indexed_iter_mut() {
            for (src, &on) in mask.indexed_iter() {
                if !on {
                    continue;
                }
                let dz = (pos.0 as f64 - src.0 as f64) * res[0];
                let dh = (pos.1 as f64 - src.1 as f64) * res[1];
                let dw = (pos.2 as f64 - src.2 as f64) * res[2];
                *d = d.min(dz * dz + dh * dh + dw * dw);
            }
        }
        out
    }

    fn assert_matches_brute(mask: &Array3<bool>, res: [f64; 3]) {
        let fast = squared_edt(mask, res);
        let slow = brute_force(mask, res);
        for (a, b) in fast.iter().zip(slow.iter()) {
            assert!(a == b || f64_eq(*a, *b), "{a} != {b}");
        }
    }

    /// 各向同性小体上与暴力解一致.
    #[test]
    fn test_edt_isotropic() {
        let mut mask = Array3::from_elem((3, 4, 5), false);
        mask[(1, 2, 3)] = true;
        mask[(0, 0, 0)] = true;
        assert_matches_brute(&mask, [1.0; 3]);
    }

    /// 各向异性间距下与暴力解一致.
    #[test]
    fn test_edt_anisotropic() {
        let mut mask = Array3::from_elem((4, 3, 3), false);
        mask[(0, 1, 1)] = true;
        mask[(3, 0, 2)] = true;
        assert_matches_brute(&mask, [5.0, 1.0, 2.0]);
    }

    /// 空掩码全为正无穷.
    #[test]
    fn test_edt_empty_mask() {
        let mask = Array3::from_elem((2, 2, 2), false);
        let d = squared_edt(&mask, [1.0; 3]);
        assert!(d.iter().all(|x| x.is_infinite()));
    }

    /// 全真掩码处处为零.
    #[test]
    fn test_edt_full_mask() {
        let mask = Array3::from_elem((2, 3, 2), true);
        let d = squared_edt(&mask, [2.0, 3.0, 4.0]);
        assert!(d.iter().all(|x| *x == 0.0));
    }
}

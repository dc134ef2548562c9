//! 三维标签体基础数据结构.

use std::collections::BTreeSet;
use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array2, Array3, ArrayView, ArrayViewMut, Axis, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::{Idx3d, Label, Off3d};

mod frame;

pub use frame::LabelFrame;

/// 三维标签体, 包括标签数据和体素物理分辨率.
///
/// 数据按 `(z, 高, 宽)` 组织, 行优先, 宽方向变化最快.
/// 分辨率以毫米为单位, 同样按 `(z, 高, 宽)` 排列.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelVolume {
    data: Array3<Label>,
    res: [f64; 3],
}

impl Index<Idx3d> for LabelVolume {
    type Output = Label;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for LabelVolume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl LabelVolume {
    /// 根据裸标签数据和体素分辨率直接创建标签体.
    ///
    /// # 参数
    ///
    /// 1. `data` 按 `(z, 高, 宽)` 组织.
    /// 2. `res` 是按 `(z, 高, 宽)` 排列的体素分辨率, 以毫米为单位,
    ///    三个分量必须为正, 否则程序 panic.
    pub fn new(data: Array3<Label>, res: [f64; 3]) -> Self {
        assert!(res.iter().all(|r| *r > 0.0), "体素分辨率必须为正");
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };
        Self { data, res }
    }

    /// 将单张二维标签帧包装成深度为 1 的标签体.
    ///
    /// `frame` 按 `(高, 宽)` 组织; `res` 约定同 [`Self::new`].
    pub fn from_frame(frame: Array2<Label>, res: [f64; 3]) -> Self {
        let (h, w) = frame.dim();
        let data = frame.into_shape((1, h, w)).unwrap();
        Self::new(data, res)
    }

    /// 打开 nii 文件格式的三维标签体. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    ///
    /// 体素分辨率从 header 的 `pixdim` 字段读取.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = obj.header().clone();

        // [W, H, z] -> [z, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray::<u32>()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        let [_, w, h, z, ..] = header.dim;
        let shape = (z as usize, h as usize, w as usize);
        let [_, pw, ph, pz, ..] = header.pixdim;
        let res = [pz as f64, ph as f64, pw as f64];

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data = Array3::<Label>::from_shape_vec(shape, data.into_raw_vec()).unwrap();

        Ok(Self::new(data, res))
    }

    /// 创建与 `self` 形状和分辨率相同的全零标签体.
    #[inline]
    pub(crate) fn zeros_like(&self) -> Self {
        Self {
            data: Array3::zeros(self.data.raw_dim()),
            res: self.res,
        }
    }

    /// 获取数据形状大小, 按 `(z, 高, 宽)` 排列.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let &[z, h, w] = self.data.shape() else {
            unreachable!()
        };
        (z, h, w)
    }

    /// 获取水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 判断该标签体是否不含任何体素.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// 检查索引是否合法.
    #[inline]
    pub fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取体素分辨率, 以毫米为单位, 按 `(z, 高, 宽)` 排列.
    #[inline]
    pub fn pix_dim(&self) -> [f64; 3] {
        self.res
    }

    /// 获取空间方向 (相邻 2D 切片的方向) 体素分辨率, 以毫米为单位.
    #[inline]
    pub fn z_mm(&self) -> f64 {
        self.res[0]
    }

    /// 获取 height 方向 (自然 2D 图像的垂直方向) 体素分辨率, 以毫米为单位.
    #[inline]
    pub fn height_mm(&self) -> f64 {
        self.res[1]
    }

    /// 获取 width 方向 (自然 2D 图像的水平方向) 体素分辨率, 以毫米为单位.
    #[inline]
    pub fn width_mm(&self) -> f64 {
        self.res[2]
    }

    /// 获取 3D 标签体 z 空间的第 `z_index` 层不可变切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> LabelFrame<'_> {
        LabelFrame::new(self.data.index_axis(Axis(0), z_index))
    }

    /// 获取能按升序迭代 3D 标签体水平不可变切片的迭代器.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = LabelFrame> {
        self.data.axis_iter(Axis(0)).map(LabelFrame::new)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, Label, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, Label, Ix3> {
        self.data.view_mut()
    }

    /// 获取标签体中值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: Label) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 收集标签体中出现过的全部标签, 按升序返回.
    pub fn labels(&self) -> BTreeSet<Label> {
        self.data.iter().copied().collect()
    }

    /// 对 `pos` 施加偏移 `off`. 结果越界时返回 `None`.
    #[inline]
    pub(crate) fn offset(&self, (z, h, w): Idx3d, (dz, dh, dw): Off3d) -> Option<Idx3d> {
        let pos = (
            z.checked_add_signed(dz)?,
            h.checked_add_signed(dh)?,
            w.checked_add_signed(dw)?,
        );
        self.check(&pos).then_some(pos)
    }

    /// 获取 `pos` 的 26-邻域 (面 + 棱 + 角相邻) 体素坐标.
    ///
    /// 在数据范围外的坐标会被过滤掉, 不会包含在返回值中.
    pub(crate) fn moore_neighbours(&self, pos: Idx3d) -> Vec<Idx3d> {
        let mut ans = Vec::with_capacity(26);
        for dz in -1..=1isize {
            for dh in -1..=1isize {
                for dw in -1..=1isize {
                    if (dz, dh, dw) == (0, 0, 0) {
                        continue;
                    }
                    if let Some(p) = self.offset(pos, (dz, dh, dw)) {
                        ans.push(p);
                    }
                }
            }
        }
        ans
    }
}

#[cfg(test)]
mod tests {
    use super::LabelVolume;
    use ndarray::arr2;

    /// 基本形状与分辨率访问.
    #[test]
    fn test_volume_shape_attrs() {
        let v = LabelVolume::from_frame(arr2(&[[1u32, 2], [3, 4]]), [2.0, 1.0, 0.5]);
        assert_eq!(v.shape(), (1, 2, 2));
        assert_eq!(v.len_z(), 1);
        assert_eq!(v.size(), 4);
        assert!(!v.is_empty());
        assert_eq!(v.z_mm(), 2.0);
        assert_eq!(v.height_mm(), 1.0);
        assert_eq!(v.width_mm(), 0.5);
        assert_eq!(v[(0, 1, 0)], 3);
    }

    /// 标签普查与计数.
    #[test]
    fn test_volume_labels() {
        let v = LabelVolume::from_frame(arr2(&[[1u32, 1], [0, 7]]), [1.0; 3]);
        assert_eq!(v.count(1), 2);
        assert_eq!(v.count(9), 0);
        assert!(v.labels().into_iter().eq([0, 1, 7]));
    }

    /// 角落体素的 26-邻域会被裁剪到数据范围内.
    #[test]
    fn test_moore_neighbours_clipped() {
        let v = LabelVolume::new(ndarray::Array3::zeros((2, 2, 2)), [1.0; 3]);
        assert_eq!(v.moore_neighbours((0, 0, 0)).len(), 7);
        let inner = LabelVolume::new(ndarray::Array3::zeros((3, 3, 3)), [1.0; 3]);
        assert_eq!(inner.moore_neighbours((1, 1, 1)).len(), 26);
    }
}

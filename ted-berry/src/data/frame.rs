//! 二维标签帧视图与其持久化存储.

use std::path::Path;

use image::ImageResult;
use ndarray::iter::Iter;
use ndarray::{ArrayView2, Ix2};
use std::ops::Index;

use crate::Label;

/// 2D 索引 (高, 宽).
type Idx2d = (usize, usize);

/// 不可变、借用的二维水平标签帧.
pub struct LabelFrame<'a> {
    /// 底层数据的轻量级视图, 借用于 [`crate::LabelVolume`].
    ///
    /// 这里有意把代码写死为 `ArrayView` 降低灵活性, 但使结构的意图更加明确.
    data: ArrayView2<'a, Label>,
}

impl Index<Idx2d> for LabelFrame<'_> {
    type Output = Label;

    #[inline]
    fn index(&self, index: Idx2d) -> &Self::Output {
        &self.data[index]
    }
}

impl<'a> LabelFrame<'a> {
    /// 直接初始化.
    #[inline]
    pub(crate) fn new(data: ArrayView2<'a, Label>) -> Self {
        Self { data }
    }

    /// 图像的分辨率 (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        let &[h, w] = self.data.shape() else {
            unreachable!()
        };
        (h, w)
    }

    /// 图像的像素个数.
    #[inline]
    pub fn size(&self) -> usize {
        let (h, w) = self.shape();
        h * w
    }

    /// 获取给定位置 (高, 宽) 的标签值. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, pos: Idx2d) -> Option<&Label> {
        self.data.get(pos)
    }

    /// 获取可以迭代帧内标签的迭代器.
    #[inline]
    pub fn iter(&self) -> Iter<'_, Label, Ix2> {
        self.data.iter()
    }

    /// 以行优先规则, 获取能迭代帧内所有 `(索引, 标签值)` 的迭代器.
    #[inline]
    pub fn indexed_iter(&self) -> impl Iterator<Item = (Idx2d, &Label)> {
        self.data.indexed_iter()
    }

    /// 按原样将帧保存为 16 位灰度 PNG.
    ///
    /// # 注意
    ///
    /// 标签值必须不超过 `u16::MAX`, 否则程序 panic.
    /// 超过该范围的标签体请改用 nii 等原生 32 位格式存储.
    pub fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        let (height, width) = self.shape();
        let mut buf = image::ImageBuffer::<image::Luma<u16>, _>::new(width as u32, height as u32);
        for ((h, w), &pix) in self.indexed_iter() {
            assert!(pix <= u16::MAX as Label, "标签值 `{pix}` 超出 16 位灰度范围");
            buf.put_pixel(w as u32, h as u32, image::Luma([pix as u16]));
        }
        buf.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::LabelFrame;
    use ndarray::arr2;

    /// 帧视图的基本访问.
    #[test]
    fn test_frame_access() {
        let data = arr2(&[[1u32, 2, 3], [4, 5, 6]]);
        let frame = LabelFrame::new(data.view());
        assert_eq!(frame.shape(), (2, 3));
        assert_eq!(frame.size(), 6);
        assert_eq!(frame[(1, 2)], 6);
        assert_eq!(frame.get((2, 0)), None);
        assert_eq!(frame.iter().copied().max(), Some(6));
    }
}

//! 通用常量与默认参数.

use crate::Label;

/// 约定俗成的真值背景标签默认值.
pub const DEFAULT_GT_BACKGROUND: Label = 0;

/// 约定俗成的重建背景标签默认值.
pub const DEFAULT_REC_BACKGROUND: Label = 0;

/// 默认边界移动距离阈值 (物理单位).
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 10.0;

/// 骨架模式内部使用的哨兵标签. 与任何真实标签都不同;
/// 真实标签不允许取到该值.
pub(crate) const IGNORE: Label = Label::MAX;

/// 判断 `label` 在骨架模式中是否为哨兵.
#[inline]
pub(crate) const fn is_ignore(label: Label) -> bool {
    label == IGNORE
}

//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Label, Off3d};

pub use crate::data::{LabelFrame, LabelVolume};

pub use crate::cells::{extract_cells, Cell};

pub use crate::report::{Match, MergeError, SplitError, TedReport};

pub use crate::{EvalError, EvalResult};

pub use crate::{Mode, TedPolicy, TolerantEditDistance};

pub use crate::consts::{
    DEFAULT_DISTANCE_THRESHOLD, DEFAULT_GT_BACKGROUND, DEFAULT_REC_BACKGROUND,
};

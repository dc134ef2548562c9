//! 容忍编辑距离驱动器与 ILP 构建.
//!
//! `compute` 是一次严格顺序的状态机: 提取 cell -> 容忍分析 ->
//! 构建并求解 ILP -> 装配报告. 调用之间不共享任何可变状态,
//! 因此在不相交的输入对上并行调用是安全的.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use log::debug;

use crate::cells::{extract_cells, Cell};
use crate::consts::{
    is_ignore, DEFAULT_DISTANCE_THRESHOLD, DEFAULT_GT_BACKGROUND, DEFAULT_REC_BACKGROUND,
};
use crate::report::TedReport;
use crate::solve::{
    BranchAndBound, LinearConstraint, Objective, Relation, SolverBackend, SolverOptions, VarType,
};
use crate::tol::{analyze, DistanceTolerance, MatchTable, SkeletonTolerance, ToleranceFunction};
use crate::{EvalError, EvalResult, Label, LabelVolume};

/// 容忍准则家族.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// 体积真值: 逐 cell 距离准则 (默认).
    #[default]
    Volumetric,

    /// 曲线骨架真值: 非骨架体素被忽略.
    Skeleton,
}

/// TED 求值策略. 所有选项显式传入, 不存在进程级的隐藏状态.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TedPolicy {
    /// 容忍准则家族.
    pub mode: Mode,

    /// 允许的边界移动距离, 物理单位. 必须非负.
    pub distance_threshold: f64,

    /// 为 `true` 时, 涉及背景标签的 split/merge 分别重分类为假阳性/假阴性.
    pub report_fp_fn: bool,

    /// 为 `true` 时, 允许相向的边界移动让背景在前景之间显形.
    pub allow_background_appearance: bool,

    /// 真值背景标签.
    pub gt_background_label: Label,

    /// 重建背景标签.
    pub rec_background_label: Label,

    /// 为 `true` 时, 报告额外携带逐错误的空间定位记录.
    pub report_error_locations: bool,

    /// MILP 求解的墙钟预算. `None` 代表不限.
    pub solver_timeout: Option<Duration>,

    /// 数据并行阶段使用的线程数. `None` 代表由后端自行决定.
    /// 未启用 `rayon` 特性时该选项没有效果.
    pub num_threads: Option<usize>,
}

impl Default for TedPolicy {
    fn default() -> Self {
        Self {
            mode: Mode::Volumetric,
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            report_fp_fn: false,
            allow_background_appearance: false,
            gt_background_label: DEFAULT_GT_BACKGROUND,
            rec_background_label: DEFAULT_REC_BACKGROUND,
            report_error_locations: false,
            solver_timeout: None,
            num_threads: None,
        }
    }
}

/// 容忍编辑距离求值器.
#[derive(Clone, Debug, Default)]
pub struct TolerantEditDistance {
    policy: TedPolicy,
}

impl TolerantEditDistance {
    /// 以给定策略创建求值器.
    #[inline]
    pub fn new(policy: TedPolicy) -> Self {
        Self { policy }
    }

    /// 当前策略.
    #[inline]
    pub fn policy(&self) -> &TedPolicy {
        &self.policy
    }

    /// 对一对标签体计算 TED 报告.
    ///
    /// 输出只取决于输入与策略; ILP 目标中的体素改动决胜项消除了
    /// 等价最优解之间的随机性, 因此相同输入产生逐字节相同的报告
    /// (求解耗时除外).
    pub fn compute(&self, gt: &LabelVolume, rec: &LabelVolume) -> EvalResult<TedReport> {
        let policy = &self.policy;
        if !policy.distance_threshold.is_finite() || policy.distance_threshold < 0.0 {
            return Err(EvalError::Usage(format!(
                "距离阈值必须是非负有限值, 实际为 {}",
                policy.distance_threshold
            )));
        }
        if policy.num_threads == Some(0) {
            return Err(EvalError::Usage("线程数不能为 0".to_string()));
        }

        let mut cells = extract_cells(gt, rec)?;
        if cells.is_empty() {
            // 空标签体: 按约定返回零错误报告.
            return Ok(TedReport::assemble(
                cells,
                &[],
                rec.clone(),
                policy.report_fp_fn,
                policy.gt_background_label,
                policy.rec_background_label,
                0.0,
                0,
                false,
            ));
        }

        let tolerance: Box<dyn ToleranceFunction> = match policy.mode {
            Mode::Volumetric => Box::new(DistanceTolerance::new(
                policy.distance_threshold,
                policy.allow_background_appearance,
                policy.rec_background_label,
            )),
            Mode::Skeleton => Box::new(SkeletonTolerance::new(
                policy.distance_threshold,
                policy.gt_background_label,
                policy.rec_background_label,
            )),
        };
        let table = self.run_tolerance(tolerance.as_ref(), &mut cells, rec)?;
        debug!(
            "容忍分析结束: {} 个真值标签, {} 个重建标签",
            table.gt_labels().len(),
            table.rec_labels().len()
        );

        let ilp = build_ilp(&cells, &table, gt.size());
        debug!("ILP 共 {} 个变量", ilp.num_vars);

        let mut backend = BranchAndBound::new(SolverOptions {
            timeout: policy.solver_timeout,
            ..SolverOptions::default()
        });
        backend.initialize(ilp.num_vars, VarType::Binary, &ilp.overrides);
        backend.set_objective(ilp.objective);
        backend.set_constraints(ilp.constraints);
        let solution = backend.solve()?;
        debug!("求解耗时 {:.6} 秒", solution.wall_time);

        let assignment = decode_assignment(&cells, &table, &ilp.labeling_by_var, &solution.values)?;
        let corrected = paint_corrected(&cells, &assignment, rec);

        let mut report = TedReport::assemble(
            cells,
            &assignment,
            corrected,
            policy.report_fp_fn,
            policy.gt_background_label,
            policy.rec_background_label,
            solution.wall_time,
            ilp.num_vars,
            solution.timed_out,
        );
        if policy.report_error_locations {
            report.localize_errors(rec.pix_dim());
        }
        Ok(report)
    }

    /// 执行容忍分析, 按策略应用线程数上限.
    ///
    /// 未启用 `rayon` 特性时分析串行执行, 线程数选项没有效果.
    fn run_tolerance(
        &self,
        f: &dyn ToleranceFunction,
        cells: &mut [Cell],
        rec: &LabelVolume,
    ) -> EvalResult<MatchTable> {
        #[cfg(feature = "rayon")]
        if let Some(n) = self.policy.num_threads {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| EvalError::Usage(format!("无法创建计算线程池: {e}")))?;
            return Ok(pool.install(|| analyze(f, cells, rec)));
        }
        Ok(analyze(f, cells, rec))
    }
}

/// 构建完毕的 ILP.
struct Ilp {
    /// 变量总数.
    num_vars: usize,

    /// 指示变量 -> (cell 下标, 取该指派时的重建标签).
    /// 指示变量是编号从 0 开始的前缀段.
    labeling_by_var: Vec<(usize, Label)>,

    /// 非默认类型的变量.
    overrides: BTreeMap<usize, VarType>,

    constraints: Vec<LinearConstraint>,
    objective: Objective,
}

/// 把 cell 与候选标签翻译成变量, 约束和目标.
///
/// 变量次序固定: 先按 cell 顺序排所有指示变量 (每个 cell 默认标签在前,
/// 备选标签按升序), 然后按标签升序排匹配变量, split 槽, split 总数,
/// merge 槽, merge 总数. 全部集合有序, 编号可复现.
fn build_ilp(cells: &[Cell], table: &MatchTable, volume_size: usize) -> Ilp {
    let mut var = 0usize;
    let mut constraints = Vec::with_capacity(cells.len() * 2);
    let mut labeling_by_var: Vec<(usize, Label)> = Vec::with_capacity(cells.len());
    let mut indicators_by_rec: BTreeMap<Label, Vec<usize>> = BTreeMap::new();
    let mut indicators_by_gt_rec: BTreeMap<(Label, Label), Vec<usize>> = BTreeMap::new();
    // 备选指示变量及其 cell 体素数, 用于目标中的决胜项.
    let mut alternative_indicators: Vec<(usize, usize)> = Vec::new();

    let mut assign_indicator =
        |var: usize, cell_index: usize, gt_label: Label, rec_label: Label| {
            debug_assert_eq!(var, labeling_by_var.len());
            labeling_by_var.push((cell_index, rec_label));
            indicators_by_rec.entry(rec_label).or_default().push(var);
            indicators_by_gt_rec
                .entry((gt_label, rec_label))
                .or_default()
                .push(var);
        };

    // 每个 cell 一个默认标签指示变量, 每个备选标签再各一个.
    for (cell_index, cell) in cells.iter().enumerate() {
        let begin = var;
        assign_indicator(var, cell_index, cell.gt_label(), cell.rec_label());
        var += 1;
        for label in cell.alternative_labels() {
            alternative_indicators.push((var, cell.size()));
            assign_indicator(var, cell_index, cell.gt_label(), label);
            var += 1;
        }
        let end = var;

        // 每个 cell 必须恰好取一个标签.
        let mut one_label = LinearConstraint::new(Relation::Equal, 1.0);
        for v in begin..end {
            one_label.set_coefficient(v, 1.0);
        }
        constraints.push(one_label);
    }
    // 重建标签不允许消失.
    for rec_label in table.rec_labels().iter() {
        let mut persists = LinearConstraint::new(Relation::GreaterEqual, 1.0);
        for v in indicators_by_rec.get(rec_label).into_iter().flatten() {
            persists.set_coefficient(*v, 1.0);
        }
        constraints.push(persists);
    }

    // 每对可能匹配一个 0-1 匹配变量.
    let mut match_vars: BTreeMap<(Label, Label), usize> = BTreeMap::new();
    for gt_label in table.gt_labels().iter().copied() {
        for rec_label in table.matches_by_gt(gt_label) {
            match_vars.insert((gt_label, rec_label), var);
            var += 1;
        }
    }

    // 指派激活匹配: 任一指示为 1 则匹配为 1; 全部为 0 则匹配为 0.
    for (&(gt_label, rec_label), &match_var) in match_vars.iter() {
        let mut no_match = LinearConstraint::new(Relation::GreaterEqual, 0.0);
        for v in indicators_by_gt_rec
            .get(&(gt_label, rec_label))
            .into_iter()
            .flatten()
        {
            no_match.set_coefficient(*v, 1.0);

            let mut activates = LinearConstraint::new(Relation::GreaterEqual, 0.0);
            activates.set_coefficient(match_var, 1.0);
            activates.set_coefficient(*v, -1.0);
            constraints.push(activates);
        }
        no_match.set_coefficient(match_var, -1.0);
        constraints.push(no_match);
    }

    let mut overrides: BTreeMap<usize, VarType> = BTreeMap::new();

    // 每个真值标签一个 split 槽: s_g = sum(m_{g, r}) - 1.
    let split_begin = var;
    for gt_label in table.gt_labels().iter().copied() {
        let split_var = var;
        var += 1;
        overrides.insert(split_var, VarType::Integer);

        let mut num_splits = LinearConstraint::new(Relation::Equal, -1.0);
        num_splits.set_coefficient(split_var, 1.0);
        for rec_label in table.matches_by_gt(gt_label) {
            num_splits.set_coefficient(match_vars[&(gt_label, rec_label)], -1.0);
        }
        constraints.push(num_splits);
    }
    let split_end = var;

    // split 总数.
    let total_splits = var;
    var += 1;
    overrides.insert(total_splits, VarType::Integer);
    let mut sum_splits = LinearConstraint::new(Relation::Equal, 0.0);
    sum_splits.set_coefficient(total_splits, 1.0);
    for v in split_begin..split_end {
        sum_splits.set_coefficient(v, -1.0);
    }
    constraints.push(sum_splits);

    // 每个重建标签一个 merge 槽: t_r = sum(m_{g, r}) - 1.
    let merge_begin = var;
    for rec_label in table.rec_labels().iter().copied() {
        let merge_var = var;
        var += 1;
        overrides.insert(merge_var, VarType::Integer);

        let mut num_merges = LinearConstraint::new(Relation::Equal, -1.0);
        num_merges.set_coefficient(merge_var, 1.0);
        for gt_label in table.matches_by_rec(rec_label) {
            num_merges.set_coefficient(match_vars[&(gt_label, rec_label)], -1.0);
        }
        constraints.push(num_merges);
    }
    let merge_end = var;

    // merge 总数.
    let total_merges = var;
    var += 1;
    overrides.insert(total_merges, VarType::Integer);
    let mut sum_merges = LinearConstraint::new(Relation::Equal, 0.0);
    sum_merges.set_coefficient(total_merges, 1.0);
    for v in merge_begin..merge_end {
        sum_merges.set_coefficient(v, -1.0);
    }
    constraints.push(sum_merges);

    // 最小化 split + merge 总数; 在等价最优之间, 偏好改动体素最少的指派.
    // 每个 cell 至多一个指示为 1, 任何可行解的决胜罚分之和严格小于 1,
    // 不会干扰主目标.
    let mut objective = Objective::new(var);
    objective.set_coefficient(total_splits, 1.0);
    objective.set_coefficient(total_merges, 1.0);
    for (v, cell_size) in alternative_indicators.iter() {
        objective.set_coefficient(*v, *cell_size as f64 / (volume_size as f64 + 1.0));
    }

    Ilp {
        num_vars: var,
        labeling_by_var,
        overrides,
        constraints,
        objective,
    }
}

/// 从解向量恢复每个 cell 的选定标签, 并核验解的基本不变量.
fn decode_assignment(
    cells: &[Cell],
    table: &MatchTable,
    labeling_by_var: &[(usize, Label)],
    values: &[f64],
) -> EvalResult<Vec<Label>> {
    let mut assignment: Vec<Option<Label>> = vec![None; cells.len()];
    for (var, (cell_index, rec_label)) in labeling_by_var.iter().enumerate() {
        if values[var] > 0.5 {
            if assignment[*cell_index].is_some() {
                return Err(EvalError::Internal(format!(
                    "cell {cell_index} 被指派了多个标签"
                )));
            }
            assignment[*cell_index] = Some(*rec_label);
        }
    }

    let mut ans = Vec::with_capacity(cells.len());
    for (index, (cell, label)) in cells.iter().zip(assignment).enumerate() {
        let Some(label) = label else {
            return Err(EvalError::Internal(format!("cell {index} 没有被指派标签")));
        };
        if !cell.possible_labels().contains(&label) {
            return Err(EvalError::Internal(format!(
                "cell {index} 被指派了不可取的标签 {label}"
            )));
        }
        ans.push(label);
    }

    // 重建标签不允许消失 (标签保留约束的事后核验).
    let chosen: BTreeSet<Label> = ans.iter().copied().collect();
    for rec_label in table.rec_labels().iter() {
        if !chosen.contains(rec_label) {
            return Err(EvalError::Internal(format!(
                "重建标签 {rec_label} 在解中消失"
            )));
        }
    }
    Ok(ans)
}

/// 按选定标签把每个 cell 涂进新的重建体.
///
/// 骨架模式下被硬连线到哨兵的 cell 原样保留输入重建的体素.
fn paint_corrected(cells: &[Cell], assignment: &[Label], rec: &LabelVolume) -> LabelVolume {
    let mut corrected = rec.zeros_like();
    for (cell, label) in cells.iter().zip(assignment.iter()) {
        if is_ignore(*label) {
            for &pos in cell.locations() {
                corrected[pos] = rec[pos];
            }
        } else {
            for &pos in cell.locations() {
                corrected[pos] = *label;
            }
        }
    }
    corrected
}

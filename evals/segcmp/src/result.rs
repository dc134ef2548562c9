//! 评估结果的人类可读展示.

use std::io::{self, Write};

use ted_berry::TedReport;

/// 将 `report` 的明细写进 `w` 中.
fn describe_into<W: Write>(report: &TedReport, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    writeln!(w, "{}", report.human_readable())?;
    writeln!(w, "{S4}Matches: {}", report.matches().len())?;

    for (gt_label, partners) in report.splits().iter() {
        let into: Vec<String> = partners.keys().map(|l| l.to_string()).collect();
        writeln!(w, "{S4}Split {gt_label} -> {{{}}}", into.join(", "))?;
    }
    for (rec_label, partners) in report.merges().iter() {
        let from: Vec<String> = partners.keys().map(|l| l.to_string()).collect();
        writeln!(w, "{S4}Merge {rec_label} <- {{{}}}", from.join(", "))?;
    }
    for label in report.fp_cells().keys() {
        writeln!(w, "{S4}False positive: {label}")?;
    }
    for label in report.fn_cells().keys() {
        writeln!(w, "{S4}False negative: {label}")?;
    }

    if let Some(errors) = report.split_errors() {
        for e in errors.iter() {
            writeln!(
                w,
                "{S4}Split location {:?}: {} -> ({}, {}), 距离 {:.3}, 体素 {}",
                e.location, e.gt_label, e.rec_label_1, e.rec_label_2, e.distance, e.size
            )?;
        }
    }
    if let Some(errors) = report.merge_errors() {
        for e in errors.iter() {
            writeln!(
                w,
                "{S4}Merge location {:?}: {} <- ({}, {}), 距离 {:.3}, 体素 {}",
                e.location, e.rec_label, e.gt_label_1, e.gt_label_2, e.distance, e.size
            )?;
        }
    }

    write!(
        w,
        "{S4}Solver: {} 变量, {:.6} 秒",
        report.solver_vars(),
        report.solver_time()
    )?;
    Ok(())
}

/// 将报告明细写进 `w` 中, 两侧以分隔线包围.
pub fn describe_to<W: Write>(report: &TedReport, w: &mut W) -> io::Result<()> {
    utils::sep_to(&mut *w);
    describe_into(report, w)?;
    writeln!(w)?;
    utils::sep_to(&mut *w);
    Ok(())
}

/// 将报告明细打印到标准输出, 两侧以分隔线包围.
pub fn describe(report: &TedReport) {
    let mut buf = Vec::with_capacity(512);
    describe_to(report, &mut buf).unwrap();
    print!("{}", std::str::from_utf8(&buf).unwrap());
}

#[cfg(test)]
mod tests {
    use super::{describe_into, describe_to};
    use ndarray::arr2;
    use ted_berry::{LabelVolume, TedPolicy, TolerantEditDistance};

    fn split_report() -> ted_berry::TedReport {
        let gt = LabelVolume::from_frame(arr2(&[[1u32, 1, 1, 1], [1, 1, 1, 1]]), [1.0; 3]);
        let rec = LabelVolume::from_frame(arr2(&[[2u32, 2, 3, 3], [2, 2, 3, 3]]), [1.0; 3]);
        let policy = TedPolicy {
            distance_threshold: 1.0,
            ..TedPolicy::default()
        };
        TolerantEditDistance::new(policy).compute(&gt, &rec).unwrap()
    }

    /// 明细输出包含关键字段.
    #[test]
    fn test_describe_split() {
        let mut buf = Vec::new();
        describe_into(&split_report(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("TED FS: 1"));
        assert!(text.contains("Split 1 -> {2, 3}"));
        assert!(text.contains("Solver:"));
    }

    /// 写入任意 writer 的明细被分隔线包围.
    #[test]
    fn test_describe_to_separators() {
        let mut buf = Vec::new();
        describe_to(&split_report(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("----"));
        assert!(text.trim_end().ends_with("--------"));
        assert!(text.contains("TED FS: 1"));
    }
}

//! segcmp: 对一对标签体计算 TED 报告的命令行入口.

use std::process::ExitCode;

use log::warn;
use ted_berry::{TedReport, TolerantEditDistance};

mod opts;
mod result;

fn main() -> ExitCode {
    env_logger::init();

    let opts = match opts::parse(std::env::args().skip(1)) {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("{msg}");
            eprintln!("{}", opts::USAGE);
            return ExitCode::from(2);
        }
    };

    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("segcmp: {msg}");
            ExitCode::FAILURE
        }
    }
}

/// 加载, 求值, 打印, 写出.
fn run(opts: &opts::Opts) -> Result<(), String> {
    let gt = utils::loader::open_volume(&opts.gt, opts.res)
        .map_err(|e| format!("无法加载真值 {}: {e}", opts.gt.display()))?;
    let rec = utils::loader::open_volume(&opts.rec, opts.res)
        .map_err(|e| format!("无法加载重建 {}: {e}", opts.rec.display()))?;

    let ted = TolerantEditDistance::new(opts.policy.clone());
    let report = ted.compute(&gt, &rec).map_err(|e| e.to_string())?;

    if report.timed_out() {
        warn!("求解超时, 以下报告基于预算内的最优可行解");
    }

    if opts.header {
        println!("{}", TedReport::error_header());
    }
    println!("{}", report.error_line());
    result::describe(&report);

    if let Some(dir) = opts.corrected.as_ref() {
        utils::loader::write_volume_dir(report.corrected(), dir)
            .map_err(|e| format!("无法写出修正体到 {}: {e}", dir.display()))?;
    }
    Ok(())
}

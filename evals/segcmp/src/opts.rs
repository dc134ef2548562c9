//! 命令行参数解析.

use std::path::PathBuf;
use std::time::Duration;

use ted_berry::{Mode, TedPolicy};

/// 使用说明.
pub const USAGE: &str = "\
用法: segcmp [选项] <真值> <重建>

<真值> 和 <重建> 各是一个 nii 文件或一个逐帧灰度 PNG 目录.

选项:
  --skeleton            真值是曲线骨架而不是实心体
  --threshold <t>       边界移动距离阈值, 物理单位 (默认 10)
  --fp-fn               把涉及背景的错误重分类为假阳性/假阴性
  --allow-bg            允许背景在前景之间显形
  --gt-bg <label>       真值背景标签 (默认 0)
  --rec-bg <label>      重建背景标签 (默认 0)
  --res <z,h,w>         PNG 目录输入的体素分辨率, 毫米 (默认 1,1,1)
  --timeout <secs>      MILP 墙钟预算, 秒
  --threads <n|auto>    数据并行线程数
  --locations           报告携带逐错误的空间定位记录
  --corrected <dir>     把修正后的重建体写到该 PNG 目录
  --header              额外打印制表符分隔报告的表头";

/// 解析完毕的命令行参数.
pub struct Opts {
    /// 真值路径.
    pub gt: PathBuf,

    /// 重建路径.
    pub rec: PathBuf,

    /// 求值策略.
    pub policy: TedPolicy,

    /// PNG 目录输入使用的体素分辨率.
    pub res: [f64; 3],

    /// 修正体输出目录.
    pub corrected: Option<PathBuf>,

    /// 是否打印表头.
    pub header: bool,
}

/// 解析参数. 失败时返回给用户看的错误信息.
pub fn parse<I: Iterator<Item = String>>(mut args: I) -> Result<Opts, String> {
    let mut policy = TedPolicy::default();
    let mut positional: Vec<PathBuf> = Vec::with_capacity(2);
    let mut res = [1.0; 3];
    let mut corrected = None;
    let mut header = false;

    let next_value = |args: &mut I, flag: &str| {
        args.next().ok_or_else(|| format!("选项 {flag} 缺少值"))
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--skeleton" => policy.mode = Mode::Skeleton,
            "--fp-fn" => policy.report_fp_fn = true,
            "--allow-bg" => policy.allow_background_appearance = true,
            "--locations" => policy.report_error_locations = true,
            "--header" => header = true,
            "--threshold" => {
                let v = next_value(&mut args, "--threshold")?;
                policy.distance_threshold =
                    v.parse().map_err(|_| format!("非法阈值: {v}"))?;
            }
            "--gt-bg" => {
                let v = next_value(&mut args, "--gt-bg")?;
                policy.gt_background_label =
                    v.parse().map_err(|_| format!("非法标签: {v}"))?;
            }
            "--rec-bg" => {
                let v = next_value(&mut args, "--rec-bg")?;
                policy.rec_background_label =
                    v.parse().map_err(|_| format!("非法标签: {v}"))?;
            }
            "--res" => {
                let v = next_value(&mut args, "--res")?;
                res = parse_res(&v)?;
            }
            "--corrected" => {
                let v = next_value(&mut args, "--corrected")?;
                corrected = Some(PathBuf::from(v));
            }
            "--timeout" => {
                let v = next_value(&mut args, "--timeout")?;
                let secs: f64 = v.parse().map_err(|_| format!("非法超时: {v}"))?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(format!("非法超时: {v}"));
                }
                policy.solver_timeout = Some(Duration::from_secs_f64(secs));
            }
            "--threads" => {
                let v = next_value(&mut args, "--threads")?;
                let n = if v == "auto" {
                    utils::cpus()
                } else {
                    v.parse().map_err(|_| format!("非法线程数: {v}"))?
                };
                policy.num_threads = Some(n);
            }
            other if other.starts_with("--") => {
                return Err(format!("未知选项: {other}"));
            }
            other => positional.push(PathBuf::from(other)),
        }
    }

    let [gt, rec] = <[PathBuf; 2]>::try_from(positional)
        .map_err(|_| "需要恰好两个位置参数: <真值> <重建>".to_string())?;
    Ok(Opts {
        gt,
        rec,
        policy,
        res,
        corrected,
        header,
    })
}

/// 解析 `z,h,w` 格式的分辨率.
fn parse_res(v: &str) -> Result<[f64; 3], String> {
    let parts: Vec<f64> = v
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("非法分辨率: {v}"))?;
    let [z, h, w] = <[f64; 3]>::try_from(parts)
        .map_err(|_| format!("分辨率需要三个分量: {v}"))?;
    if [z, h, w].iter().any(|r| !r.is_finite() || *r <= 0.0) {
        return Err(format!("分辨率分量必须为正: {v}"));
    }
    Ok([z, h, w])
}

#[cfg(test)]
mod tests {
    use super::parse;
    use ted_berry::Mode;

    fn args(list: &[&str]) -> impl Iterator<Item = String> + '_ {
        list.iter().map(|s| s.to_string())
    }

    /// 基本选项组合.
    #[test]
    fn test_parse_basic() {
        let opts = parse(args(&[
            "gt.nii",
            "rec.nii",
            "--skeleton",
            "--threshold",
            "2.5",
            "--fp-fn",
            "--res",
            "5,1,1",
        ]))
        .unwrap();
        assert_eq!(opts.gt.to_str(), Some("gt.nii"));
        assert_eq!(opts.policy.mode, Mode::Skeleton);
        assert_eq!(opts.policy.distance_threshold, 2.5);
        assert!(opts.policy.report_fp_fn);
        assert_eq!(opts.res, [5.0, 1.0, 1.0]);
    }

    /// 位置参数个数错误.
    #[test]
    fn test_parse_missing_positional() {
        assert!(parse(args(&["gt.nii"])).is_err());
        assert!(parse(args(&["a", "b", "c"])).is_err());
    }

    /// 非法值被拒绝.
    #[test]
    fn test_parse_bad_values() {
        assert!(parse(args(&["a", "b", "--threshold", "x"])).is_err());
        assert!(parse(args(&["a", "b", "--res", "1,2"])).is_err());
        assert!(parse(args(&["a", "b", "--res", "0,1,1"])).is_err());
        assert!(parse(args(&["a", "b", "--unknown"])).is_err());
    }
}

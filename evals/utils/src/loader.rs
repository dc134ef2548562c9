//! 标签体的加载与写出.
//!
//! 支持两种输入: 单个 nii 文件, 或一个装有逐帧灰度 PNG 的目录
//! (按文件名升序作为 z 方向次序). 写出侧把标签体存成一个 PNG 目录.

use std::path::{Path, PathBuf};
use std::{env, fmt, fs, io};

use ndarray::Array3;
use ted_berry::{Label, LabelVolume};

/// 加载 / 写出错误.
#[derive(Debug)]
pub enum LoadError {
    /// 文件系统错误.
    Io(io::Error),

    /// 图像解码 / 编码错误.
    Image(image::ImageError),

    /// nii 文件格式错误.
    Format(String),

    /// 输入数据不自洽 (空目录, 帧形状不一致等).
    Inconsistent(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "文件系统错误: {e}"),
            Self::Image(e) => write!(f, "图像错误: {e}"),
            Self::Format(msg) => write!(f, "nii 格式错误: {msg}"),
            Self::Inconsistent(msg) => write!(f, "输入不自洽: {msg}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<io::Error> for LoadError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<image::ImageError> for LoadError {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e)
    }
}

/// 获取数据集基本路径.
///
/// 1. 若环境变量 `$SEGCMP_DATA_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `{用户主目录}/dataset`.
pub fn data_dir_from_env_or_home() -> Option<PathBuf> {
    if let Ok(d) = env::var("SEGCMP_DATA_DIR") {
        return Some(PathBuf::from(d));
    }
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 打开一个标签体.
///
/// `path` 是目录时按 PNG 帧目录加载并使用 `res` 作为体素分辨率;
/// 否则按 nii 文件加载 (分辨率从 header 读取, `res` 被忽略).
pub fn open_volume<P: AsRef<Path>>(path: P, res: [f64; 3]) -> Result<LabelVolume, LoadError> {
    let path = path.as_ref();
    if path.is_dir() {
        open_png_dir(path, res)
    } else {
        LabelVolume::open(path).map_err(|e| LoadError::Format(e.to_string()))
    }
}

/// 按文件名升序收集目录下的全部 PNG 路径.
fn png_paths(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let mut ans: Vec<PathBuf> = fs::read_dir(dir)?
        .collect::<io::Result<Vec<_>>>()?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        })
        .collect();
    ans.sort();
    Ok(ans)
}

/// 把一个逐帧 PNG 目录加载成标签体.
fn open_png_dir(dir: &Path, res: [f64; 3]) -> Result<LabelVolume, LoadError> {
    let paths = png_paths(dir)?;
    if paths.is_empty() {
        return Err(LoadError::Inconsistent(format!(
            "目录 {} 下没有任何 PNG 帧",
            dir.display()
        )));
    }

    let mut data: Option<Array3<Label>> = None;
    for (z, path) in paths.iter().enumerate() {
        let frame = image::open(path)?.into_luma16();
        let (w, h) = frame.dimensions();

        let volume = data.get_or_insert_with(|| {
            Array3::zeros((paths.len(), h as usize, w as usize))
        });
        let (_, vh, vw) = volume.dim();
        if (h as usize, w as usize) != (vh, vw) {
            return Err(LoadError::Inconsistent(format!(
                "帧 {} 的形状 {}x{} 与首帧 {}x{} 不一致",
                path.display(),
                h,
                w,
                vh,
                vw
            )));
        }
        for (x, y, pix) in frame.enumerate_pixels() {
            volume[(z, y as usize, x as usize)] = pix.0[0] as Label;
        }
    }

    Ok(LabelVolume::new(data.unwrap(), res))
}

/// 把标签体逐帧写成 16 位灰度 PNG 目录. 已存在的同名帧会被覆盖.
pub fn write_volume_dir<P: AsRef<Path>>(volume: &LabelVolume, dir: P) -> Result<(), LoadError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    for (z, frame) in volume.slice_iter().enumerate() {
        frame.save_raw(dir.join(format!("{z:04}.png")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{open_volume, write_volume_dir};
    use ndarray::arr2;
    use ted_berry::LabelVolume;

    /// 写出再读回, 数据一致.
    #[test]
    fn test_png_dir_round_trip() {
        let vol = LabelVolume::new(
            ndarray::Array3::from_shape_fn((3, 4, 5), |(z, h, w)| (z * 100 + h * 10 + w) as u32),
            [2.0, 1.0, 1.0],
        );
        let dir = std::env::temp_dir().join("segcmp-loader-test");
        let _ = std::fs::remove_dir_all(&dir);
        write_volume_dir(&vol, &dir).unwrap();

        let loaded = open_volume(&dir, [2.0, 1.0, 1.0]).unwrap();
        assert_eq!(loaded, vol);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    /// 空目录报错.
    #[test]
    fn test_empty_dir() {
        let dir = std::env::temp_dir().join("segcmp-loader-empty");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        assert!(open_volume(&dir, [1.0; 3]).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    /// 单帧目录得到深度为 1 的标签体.
    #[test]
    fn test_single_frame() {
        let vol = LabelVolume::from_frame(arr2(&[[7u32, 8], [9, 10]]), [1.0; 3]);
        let dir = std::env::temp_dir().join("segcmp-loader-single");
        let _ = std::fs::remove_dir_all(&dir);
        write_volume_dir(&vol, &dir).unwrap();

        let loaded = open_volume(&dir, [1.0; 3]).unwrap();
        assert_eq!(loaded.shape(), (1, 2, 2));
        assert_eq!(loaded, vol);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

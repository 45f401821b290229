use std::path::PathBuf;

use thiserror::Error;

/// 数据集相关操作的错误类型
#[derive(Error, Debug)]
pub enum DatasetError {
    /// 配置无法满足请求，例如未启用 k 折却请求测试数据
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// 不变量被破坏，说明上游存在 bug，不应被捕获
    #[error("logic error: {0}")]
    Logic(String),

    /// 数据文件中有无法解析的行
    #[error("corrupt record at {}:{line}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = DatasetError> = std::result::Result<T, E>;

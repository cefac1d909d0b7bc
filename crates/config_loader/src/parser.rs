//! 总线配置文件解析
//!
//! BusConfig 通常写成 TOML；JSON 用于随记录数据一起保存的配置快照。
//! 格式由文件扩展名决定（不区分大小写）。

use contracts::{BusConfig, ContractError};

/// Bus config file format, picked from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.toml`, the usual hand-written form
    Toml,
    /// `.json`, as stored next to recorded sessions
    Json,
}

impl ConfigFormat {
    /// `None` for anything but `toml` / `json`
    pub fn from_extension(ext: &str) -> Option<Self> {
        [Self::Toml, Self::Json]
            .into_iter()
            .find(|format| ext.eq_ignore_ascii_case(format.extension()))
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Toml => "toml",
            Self::Json => "json",
        }
    }
}

/// Deserialize a [`BusConfig`]; missing fields take their defaults.
/// Values are not validated here.
pub fn parse(content: &str, format: ConfigFormat) -> Result<BusConfig, ContractError> {
    match format {
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| parse_error(format, e)),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| parse_error(format, e)),
    }
}

fn parse_error<E>(format: ConfigFormat, e: E) -> ContractError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ContractError::ConfigParse {
        message: format!("invalid {} bus config: {e}", format.extension()),
        source: Some(Box::new(e)),
    }
}

//! 生命周期内核的运行参数。
//!
//! # 教案式说明
//! - **意图 (Why)**：竞争失败的调用方需要短暂等待赢家发布 Promise，等待的退避节奏与端点标签
//!   应由部署方按延迟预算调整，而不是写死在内核里；
//! - **契约 (What)**：[`LifecycleSettings`] 可由 `serde` 反序列化，缺省字段取默认值；
//!   `validate` 拒绝“既不自旋也不休眠”的配置，否则等待循环会退化为纯忙等；
//! - **实现 (How)**：启用 `config-toml` 特性后，[`LifecycleSettings::from_toml_str`]
//!   读取 `[lifecycle]` 表并在返回前完成校验。

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_LABEL: &str = "endpoint";
const DEFAULT_SPIN_LIMIT: u32 = 64;
const DEFAULT_PARK_MICROS: u64 = 50;

/// 生命周期内核配置。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifecycleSettings {
    /// 端点标签，写入每条日志与非法状态消息。
    pub label: String,
    /// 进入休眠前的自旋次数。
    pub spin_limit: u32,
    /// 每次休眠的微秒数。
    pub park_micros: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_owned(),
            spin_limit: DEFAULT_SPIN_LIMIT,
            park_micros: DEFAULT_PARK_MICROS,
        }
    }
}

impl LifecycleSettings {
    /// 以指定标签构造，其余取默认值。
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// 校验约束。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spin_limit == 0 && self.park_micros == 0 {
            return Err(ConfigError::Invalid(
                "spin_limit and park_micros must not both be zero".to_owned(),
            ));
        }
        if self.label.trim().is_empty() {
            return Err(ConfigError::Invalid("label must not be blank".to_owned()));
        }
        Ok(())
    }

    pub(crate) fn park_interval(&self) -> Duration {
        Duration::from_micros(self.park_micros)
    }

    /// 从 TOML 文本中的 `[lifecycle]` 表读取配置；缺少该表时返回默认值。
    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct Document {
            #[serde(default)]
            lifecycle: LifecycleSettings,
        }

        let document: Document = toml::from_str(raw)?;
        document.lifecycle.validate()?;
        Ok(document.lifecycle)
    }
}

//! ログ初期化
//!
//! `tracing` のグローバルサブスクライバを設定します。

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub ansi_colors: bool,
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            ansi_colors: true,
            include_target: false,
        }
    }
}

impl LogConfig {
    /// デバッグ用の詳細ログ
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            ansi_colors: true,
            include_target: true,
        }
    }
}

/// サブスクライバを設定
///
/// 2回目以降の呼び出しはエラーになります。
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

#![recursion_limit = "256"]

//! ゴミ画像分類器
//!
//! VGG16 の畳み込み部に小さな分類ヘッドを付け、6種類のゴミ画像
//! (cardboard, glass, metal, paper, plastic, trash) を分類します。

pub mod backend;
pub mod error;
pub mod logging;
pub mod ml;
pub mod model;
pub mod pipeline;

pub use error::WasteSorterError;
pub use logging::{init_logging, LogConfig};
pub use model::AppConfig;
pub use pipeline::{build_model, load_data, model_config, run_pipeline, DataPipeline, PipelineReport};

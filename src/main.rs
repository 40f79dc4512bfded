#![recursion_limit = "256"]

//! ゴミ画像分類器 CLI
//!
//! サブコマンドを省略するとパイプライン全体（学習 -> 評価 -> 可視化）を実行します。

use std::path::PathBuf;

use anyhow::Result;
use burn::tensor::backend::AutodiffBackend;
use clap::{Parser, Subcommand};
use tracing::info;

use waste_sorter_lib::backend::{cpu_device, gpu_device, CpuTrainBackend, GpuTrainBackend};
use waste_sorter_lib::ml::display::display_saved_predictions;
use waste_sorter_lib::ml::evaluation::evaluate_model;
use waste_sorter_lib::ml::inference::InferenceEngine;
use waste_sorter_lib::model::{latest_artifact, AppConfig, DeviceType};
use waste_sorter_lib::pipeline::{load_data, run_pipeline, train};
use waste_sorter_lib::{init_logging, LogConfig};

/// VGG16 転移学習によるゴミ画像分類
#[derive(Parser, Debug)]
#[command(name = "waste_sorter")]
#[command(version)]
#[command(about = "Waste image classifier built on a VGG16 backbone", long_about = None)]
struct Cli {
    /// 設定ファイル (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 詳細ログを出力
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// 設定に関わらず CPU (NdArray) で実行
    #[arg(long, global = true, default_value = "false")]
    cpu: bool,

    /// データセットのルートを上書き
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// モデルファイルのパスを上書き
    #[arg(long, global = true)]
    model_path: Option<PathBuf>,

    /// 事前学習済み重みのパスを上書き
    #[arg(long, global = true, conflicts_with = "random_init")]
    pretrained_weights: Option<PathBuf>,

    /// 事前学習済み重みを使わずランダム初期化で学習
    #[arg(long, global = true, default_value = "false")]
    random_init: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// 学習 -> 評価 -> 可視化 をまとめて実行
    Run,

    /// モデルを学習して保存
    Train {
        /// エポック数を上書き
        #[arg(short, long)]
        epochs: Option<usize>,
    },

    /// 保存済みモデルを検証データで評価
    Evaluate,

    /// 1枚の画像を分類
    Predict {
        /// 分類する画像
        #[arg(short, long)]
        image: PathBuf,
    },

    /// 検証バッチの予測結果をSVGに書き出す
    Display {
        /// 出力先を上書き
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 現在の設定を表示し、設定ファイルに保存
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    init_logging(&log_config)?;

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_or_default_from(&config_path);
    if cli.cpu {
        config.device_type = DeviceType::Cpu;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }
    if let Some(model_path) = cli.model_path {
        config.artifact.model_path = model_path;
    }
    if let Some(weights) = cli.pretrained_weights {
        config.model.pretrained_weights = Some(weights);
    }
    if cli.random_init {
        config.model.pretrained_weights = None;
    }

    let command = cli.command.unwrap_or(Commands::Run);
    match &command {
        Commands::Train { epochs: Some(epochs) } => config.training.num_epochs = *epochs,
        Commands::Display { output: Some(output) } => config.display.output_path = output.clone(),
        Commands::Config => {
            config.display();
            config.save(&config_path)?;
            info!("設定を保存しました: {}", config_path.display());
            return Ok(());
        }
        _ => {}
    }

    info!("計算デバイス: {}", config.device_type);
    match config.device_type {
        DeviceType::Wgpu => execute::<GpuTrainBackend>(&command, &config, gpu_device()),
        DeviceType::Cpu => execute::<CpuTrainBackend>(&command, &config, cpu_device()),
    }
}

fn execute<B: AutodiffBackend>(command: &Commands, config: &AppConfig, device: B::Device) -> Result<()> {
    match command {
        Commands::Run => {
            let report = run_pipeline::<B>(config, &device)?;
            info!("最終評価: {}", report.evaluation);
        }

        Commands::Train { .. } => {
            let data = load_data(config)?;
            let (_, report) = train::<B>(config, &data, &device)?;
            if let Some(last) = report.epochs.last() {
                info!(
                    "最終エポック: val_loss {:.4}, val_accuracy {:.4}",
                    last.valid_loss, last.valid_accuracy
                );
            }
        }

        Commands::Evaluate => {
            let data = load_data(config)?;
            let model_path = latest_artifact(&config.artifact.model_path, config.artifact.versioned)?;
            evaluate_model::<B::InnerBackend>(
                &model_path,
                &data.valid,
                config.training.validation_steps,
                &device,
            )?;
        }

        Commands::Predict { image } => {
            let model_path = latest_artifact(&config.artifact.model_path, config.artifact.versioned)?;
            let engine = InferenceEngine::<B::InnerBackend>::load(&model_path, device)?;
            let prediction = engine.predict_path(image)?;
            info!(
                "{}: {} ({:.2}%)",
                image.display(),
                prediction.label,
                prediction.confidence * 100.0
            );
            println!("{}", prediction.label);
        }

        Commands::Display { .. } => {
            let data = load_data(config)?;
            let model_path = latest_artifact(&config.artifact.model_path, config.artifact.versioned)?;
            display_saved_predictions::<B::InnerBackend>(
                &model_path,
                &data.valid,
                &config.display,
                &device,
            )?;
        }

        Commands::Config => {}
    }

    Ok(())
}

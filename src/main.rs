//! celldet 命令行：数据集划分、训练、热力图、细胞裁剪与单图检测

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use celldet::vision::{class_colors, save_image};
use celldet::{Config, build_detector, draw_detections, load_image};

#[derive(Parser)]
#[command(name = "celldet")]
#[command(author, version)]
#[command(about = "显微细胞检测工具：划分数据集、训练、生成热力图、裁剪细胞")]
struct Cli {
    /// 配置文件（TOML），缺省时全部使用默认值
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 增加日志详细程度 (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 按比例把图像与标签划分为训练集和验证集
    Split {
        #[arg(long, value_name = "DIR")]
        images: Option<PathBuf>,
        #[arg(long, value_name = "DIR")]
        labels: Option<PathBuf>,
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
        /// 随机种子，指定后划分可复现
        #[arg(long)]
        seed: Option<u64>,
    },
    /// 训练检测网络
    Train {
        /// 数据集描述文件 data.toml
        #[arg(long, value_name = "FILE")]
        data: Option<PathBuf>,
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// 为目标层生成类激活热力图
    Heatmap {
        #[arg(long, value_name = "PATH")]
        image: Option<PathBuf>,
        #[arg(long, value_name = "PATH")]
        weights: Option<PathBuf>,
        /// 目标层名称或序号，可重复
        #[arg(long = "layer", value_name = "NAME")]
        layers: Vec<String>,
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// 裁剪不在 Cross 区域内的目标细胞
    Crop {
        #[arg(long, value_name = "DIR")]
        input: Option<PathBuf>,
        #[arg(long, value_name = "PATH")]
        weights: Option<PathBuf>,
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// 对单张图像检测并画框
    Detect {
        #[arg(long, value_name = "PATH")]
        image: PathBuf,
        #[arg(long, value_name = "PATH")]
        weights: Option<PathBuf>,
        #[arg(long, value_name = "PATH", default_value = "detections.png")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("读取配置 {path:?} 失败"))?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Split {
            images,
            labels,
            out,
            seed,
        } => {
            let split = &mut config.split;
            override_with(&mut split.images, images);
            override_with(&mut split.labels, labels);
            override_with(&mut split.output, out);
            if seed.is_some() {
                split.seed = seed;
            }

            let report = celldet::split_dataset(split).context("划分数据集失败")?;
            println!(
                "训练集 {} 对, 验证集 {} 对, 缺少标签 {} 张 -> {:?}",
                report.copied_train,
                report.copied_val,
                report.missing_labels.len(),
                split.output
            );
        }
        Commands::Train { data, epochs } => {
            let train = &mut config.train;
            override_with(&mut train.data, data);
            override_with(&mut train.epochs, epochs);

            let report = celldet::train(train).context("训练失败")?;
            println!(
                "训练完成: 最优第 {} 轮 -> {:?}",
                report.best_epoch, report.best_checkpoint
            );
        }
        Commands::Heatmap {
            image,
            weights,
            layers,
            out,
        } => {
            let heatmap = &mut config.heatmap;
            override_with(&mut heatmap.image, image);
            override_with(&mut heatmap.weights, weights);
            override_with(&mut heatmap.output_dir, out);
            if !layers.is_empty() {
                heatmap.layers = layers;
            }

            let report = celldet::run_heatmap(heatmap).context("生成热力图失败")?;
            for layer in &report.layers {
                println!(
                    "{}: {} 张 (跳过 {}) -> {:?}",
                    layer.layer, layer.written, layer.skipped, layer.output_dir
                );
            }
        }
        Commands::Crop { input, weights, out } => {
            override_with(&mut config.crop.input_dir, input);
            override_with(&mut config.crop.output_dir, out);
            override_with(&mut config.detector.weights, weights);

            let mut detector = build_detector(&config.detector)
                .with_context(|| format!("加载检测模型 {:?} 失败", config.detector.weights))?;
            let report = celldet::extract_cells(&config.crop, detector.as_mut()).context("裁剪细胞失败")?;
            let mut saved: Vec<_> = report.saved.iter().collect();
            saved.sort();
            for (label, count) in saved {
                println!("{label}: {count}");
            }
            println!("排除(Cross 内): {}, 空框: {}", report.excluded, report.empty);
        }
        Commands::Detect { image, weights, out } => {
            override_with(&mut config.detector.weights, weights);

            let mut detector = build_detector(&config.detector)
                .with_context(|| format!("加载检测模型 {:?} 失败", config.detector.weights))?;
            let img = load_image(&image)?;
            let detections = detector.detect(&img).context("检测失败")?;
            for d in &detections {
                println!(
                    "{} {:.2} [{:.1}, {:.1}, {:.1}, {:.1}]",
                    d.class_name, d.confidence, d.bbox.x1, d.bbox.y1, d.bbox.x2, d.bbox.y2
                );
            }

            let colors = class_colors(detector.class_names().len());
            save_image(&draw_detections(&img, &detections, &colors), &out)?;
            println!("{} 个目标 -> {:?}", detections.len(), out);
        }
    }

    Ok(())
}

fn override_with<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

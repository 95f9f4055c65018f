use std::sync::Arc;

use clap::Parser;
use latent_extract::{
    config::{Args, ExtractConfig},
    dataset::VideoDataset,
    encode::{EncodeOrchestrator, OnnxVideoEncoder},
    manifest::{ShardedManifest, load_manifest},
    persist::{AsyncPersistor, SafetensorsWriter},
    pipeline::PipelineDriver,
};

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("ffmpeg_next", log::LevelFilter::Warn)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let config = ExtractConfig::from_args(Args::parse())?;
    video_frames::init()?;

    let group = config.process_group()?;
    let entries = load_manifest(&config.anno_file)?;
    let shard = ShardedManifest::new(entries, group.world_size(), group.rank())?;
    if shard.is_empty() {
        log::warn!(
            "rank {} has no manifest entries ({} in total)",
            group.rank(),
            shard.total()
        );
    }
    let dataset = Arc::new(VideoDataset::new(
        shard,
        config.frame_budget,
        Some(config.frame_size),
    ));

    let encoder = OnnxVideoEncoder::load(
        &config.model_path,
        config.device_id,
        config.precision,
        config.seed,
    )?;
    let orchestrator =
        EncodeOrchestrator::new(encoder, config.encode, config.precision, config.save_memory);
    let persistor = AsyncPersistor::new(SafetensorsWriter, config.max_writers);

    let driver = PipelineDriver::new(group, dataset, config.loader, persistor);
    let summary = driver.run(orchestrator).await?;
    if !summary.write_failed.is_empty() {
        log::warn!(
            "{} latents were not saved, first: {}",
            summary.write_failed.len(),
            summary.write_failed[0].0.display()
        );
    }
    Ok(())
}

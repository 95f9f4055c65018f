//! Batch encoding of video manifests into VAE latents, one process per device.

pub mod config;
pub mod dataset;
pub mod dist;
pub mod encode;
pub mod manifest;
pub mod persist;
pub mod pipeline;

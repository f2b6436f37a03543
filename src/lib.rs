pub mod args;
pub mod audio;
pub mod config;
pub mod filter;
pub mod harmonics;
pub mod notes;
pub mod pitch;
pub mod suppressor;
pub mod util;

/// Host stream parameters passed to every `prepare`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSpec {
    pub sample_rate: u32,
    pub max_block_size: usize,
    pub channels: usize,
}

use clap::Parser;

use crate::config::EstimatorKind;

#[derive(Parser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tracks the pitch of a voice and notches out its harmonics.")]
#[command(allow_negative_numbers = true)]
pub struct Cli {
    #[arg(index = 1)]
    pub in_file: String,
    #[arg(index = 2)]
    pub out_file: String,
    /// KDL config file; defaults to config.kdl in the user config directory.
    #[arg(short, long)]
    pub config: Option<String>,
    /// yin, direct, vectorized or spectral.
    #[arg(short, long)]
    pub estimator: Option<EstimatorKind>,
    #[arg(short, long)]
    pub block_size: Option<usize>,
    #[arg(long)]
    pub harmonics: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::NoteFinder;

    #[test]
    fn test_positional_only() {
        let cli = Cli::try_parse_from(["vocalnotch", "in.wav", "out.wav"]).unwrap();
        assert_eq!(cli.in_file, "in.wav");
        assert_eq!(cli.out_file, "out.wav");
        assert!(cli.config.is_none());
        assert!(cli.estimator.is_none());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "vocalnotch", "in.wav", "out.wav", "--estimator", "spectral", "-b", "256", "--harmonics", "8",
        ])
        .unwrap();
        assert_eq!(cli.estimator, Some(EstimatorKind::Windowed(NoteFinder::Spectral)));
        assert_eq!(cli.block_size, Some(256));
        assert_eq!(cli.harmonics, Some(8));
    }

    #[test]
    fn test_rejects_unknown_estimator() {
        assert!(Cli::try_parse_from(["vocalnotch", "in.wav", "out.wav", "-e", "cepstrum"]).is_err());
    }
}

//! Command-line arguments for the `pixio` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pixio_core::submission::DEFAULT_POSE_URL;

/// pixio: generate images with the Pixio remote workflows
#[derive(Parser, Debug)]
#[command(name = "pixio", version, about = "Generate images with Pixio workflows")]
pub struct Cli {
    /// Directory finished images are saved to
    #[arg(long, global = true, default_value = ".")]
    pub out_dir: PathBuf,

    /// Starting credit balance (overrides STARTING_CREDITS)
    #[arg(long, global = true)]
    pub credits: Option<u64>,

    /// Do not download finished images
    #[arg(long, global = true, default_value_t = false)]
    pub no_download: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Text-to-image: two images per run
    Txt2img {
        /// What the image should show
        #[arg(long, default_value = "")]
        positive: String,

        /// What the image should avoid
        #[arg(long, default_value = "")]
        negative: String,
    },

    /// Image-to-image from a local file
    Img2img {
        /// PNG, JPEG, WebP, GIF or BMP file to upload
        file: PathBuf,
    },

    /// Pose-guided generation from a skeleton image URL
    Pose {
        #[arg(long, default_value = "")]
        prompt: String,

        /// Pose skeleton image URL
        #[arg(long, default_value = DEFAULT_POSE_URL)]
        pose: String,
    },
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn txt2img_prompts_default_to_empty() {
        let cli = Cli::try_parse_from(["pixio", "txt2img", "--positive", "a cat"]).unwrap();
        assert_matches!(
            cli.command,
            Command::Txt2img { positive, negative } if positive == "a cat" && negative.is_empty()
        );
        assert_eq!(cli.out_dir, PathBuf::from("."));
        assert_eq!(cli.credits, None);
    }

    #[test]
    fn pose_uses_default_skeleton() {
        let cli = Cli::try_parse_from(["pixio", "pose", "--prompt", "dancer", "--credits", "100"])
            .unwrap();
        assert_eq!(cli.credits, Some(100));
        assert_matches!(cli.command, Command::Pose { pose, .. } if pose == DEFAULT_POSE_URL);
    }

    #[test]
    fn img2img_requires_file() {
        assert!(Cli::try_parse_from(["pixio", "img2img"]).is_err());
        let cli = Cli::try_parse_from(["pixio", "--out-dir", "/tmp/out", "img2img", "a.png"]).unwrap();
        assert_eq!(cli.out_dir, PathBuf::from("/tmp/out"));
    }
}

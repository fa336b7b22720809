//! Command line parsing.

use std::collections::BTreeSet;

use anyhow::{bail, Context};
use strata_render::{parse_frame_indices, DebugMode, RenderMode};

/// Options for one headless run.
#[derive(Debug, Clone)]
pub struct HeadlessArgs {
    pub width: u32,
    pub height: u32,
    /// Total frames to render.
    pub frames: u64,
    /// Frames written to disk.
    pub capture: BTreeSet<u64>,
    /// Output path pattern; `{}` becomes the frame number.
    pub output: String,
    pub seed: u32,
    /// Camera orbit speed in radians per frame.
    pub orbit: f32,
    pub debug_mode: DebugMode,
    pub render_mode: RenderMode,
    pub help: bool,
}

impl Default for HeadlessArgs {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            frames: 8,
            capture: BTreeSet::new(),
            output: "strata_{}.png".to_string(),
            seed: 42,
            orbit: 0.0,
            debug_mode: DebugMode::None,
            render_mode: RenderMode::Lit,
            help: false,
        }
    }
}

impl HeadlessArgs {
    /// Parse arguments, program name excluded. Without `--capture` the last
    /// frame is written.
    pub fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = || args.next().with_context(|| format!("{arg} needs a value"));
            match arg.as_str() {
                "-W" | "--width" => parsed.width = value()?.parse().context("--width")?,
                "-H" | "--height" => parsed.height = value()?.parse().context("--height")?,
                "-n" | "--frames" => parsed.frames = value()?.parse().context("--frames")?,
                "-f" | "--capture" => parsed.capture = parse_frame_indices(&value()?),
                "-o" | "--output" => parsed.output = value()?,
                "--seed" => parsed.seed = value()?.parse().context("--seed")?,
                "--orbit" => parsed.orbit = value()?.parse().context("--orbit")?,
                "--debug" => parsed.debug_mode = parse_debug_mode(&value()?)?,
                "--mode" => parsed.render_mode = parse_render_mode(&value()?)?,
                "-h" | "--help" => parsed.help = true,
                other => bail!("unknown argument {other}"),
            }
        }
        if parsed.width == 0 || parsed.height == 0 || parsed.frames == 0 {
            bail!("width, height and frames must be positive");
        }
        if parsed.capture.is_empty() {
            parsed.capture.insert(parsed.frames - 1);
        }
        Ok(parsed)
    }
}

fn parse_debug_mode(s: &str) -> anyhow::Result<DebugMode> {
    Ok(match s {
        "none" => DebugMode::None,
        "bvh" => DebugMode::Bvh,
        "instances" => DebugMode::Instances,
        "lights" => DebugMode::Lights,
        other => bail!("unknown debug mode {other}"),
    })
}

fn parse_render_mode(s: &str) -> anyhow::Result<RenderMode> {
    Ok(match s {
        "lit" => RenderMode::Lit,
        "albedo" => RenderMode::Albedo,
        "normals" => RenderMode::Normals,
        "gbuffer" => RenderMode::GBufferTiles,
        other => bail!("unknown render mode {other}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<HeadlessArgs> {
        HeadlessArgs::parse(args.iter().map(ToString::to_string))
    }

    #[test]
    fn defaults_capture_the_last_frame() {
        let args = parse(&[]).unwrap();
        assert_eq!((args.width, args.height), (640, 360));
        assert_eq!(args.capture, BTreeSet::from([7]));
    }

    #[test]
    fn parses_every_option() {
        let args = parse(&[
            "-W", "32", "--height", "16", "-n", "20", "-f", "0,10-11", "-o", "out_{}.png", "--seed", "7",
            "--orbit", "0.05", "--debug", "bvh", "--mode", "normals",
        ])
        .unwrap();
        assert_eq!((args.width, args.height, args.frames), (32, 16, 20));
        assert_eq!(args.capture, BTreeSet::from([0, 10, 11]));
        assert_eq!(args.output, "out_{}.png");
        assert_eq!(args.seed, 7);
        assert_eq!(args.debug_mode, DebugMode::Bvh);
        assert_eq!(args.render_mode, RenderMode::Normals);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["--width"]).is_err());
        assert!(parse(&["--width", "x"]).is_err());
        assert!(parse(&["--frames", "0"]).is_err());
        assert!(parse(&["--debug", "wireframe"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
    }
}

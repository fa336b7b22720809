//! Strata headless renderer
//!
//! Renders the procedural demo scene offscreen and writes selected frames
//! to image files.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p strata-headless -- [OPTIONS]
//! ```
//!
//! ## Examples
//!
//! ```bash
//! # Render eight frames and save the last one
//! cargo run -p strata-headless
//!
//! # Orbit for 120 frames and capture a few of them
//! cargo run -p strata-headless -- -n 120 --orbit 0.05 -f 0,40,80,119 -o orbit_{}.png
//!
//! # BVH overlay on the G-Buffer view
//! cargo run -p strata-headless -- --debug bvh --mode gbuffer
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod args;

use anyhow::Context;
use glam::Vec3;
use strata_gpu::GpuContextBuilder;
use strata_render::{save_rgba8, Camera, Renderer, RendererConfig, ScreenshotConfig};
use strata_world::generation::demo_scene;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::args::HeadlessArgs;

const ORBIT_RADIUS: f32 = 56.0;
const ORBIT_HEIGHT: f32 = 44.0;
const LOOK_AT: Vec3 = Vec3::new(0.0, 16.0, 0.0);

fn main() -> anyhow::Result<()> {
    let args = HeadlessArgs::parse(std::env::args().skip(1))?;
    if args.help {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RendererConfig::default();
    let context = GpuContextBuilder::new()
        .app_name("strata-headless")
        .build(config.atlas_side_voxels())
        .context("failed to create GPU context")?;
    let mut renderer = Renderer::new(
        &context,
        config,
        args.width,
        args.height,
        wgpu::TextureFormat::Rgba8Unorm,
    )?;
    renderer.set_debug_mode(args.debug_mode);
    renderer.set_render_mode(args.render_mode);

    let mut scene = demo_scene(args.seed);
    let screenshots = ScreenshotConfig::new(args.output.clone()).with_frames(args.capture.iter().copied());
    info!(
        frames = args.frames,
        captures = screenshots.frames.len(),
        objects = scene.object_count(),
        "rendering demo scene"
    );

    let aspect = args.width as f32 / args.height as f32;
    for frame in 0..args.frames {
        let angle = frame as f32 * args.orbit;
        let position = Vec3::new(angle.cos() * ORBIT_RADIUS, ORBIT_HEIGHT, angle.sin() * ORBIT_RADIUS);
        let camera = Camera::look_at_target(position, LOOK_AT, std::f32::consts::FRAC_PI_3, aspect);

        let report = renderer.render_frame(&mut scene, &camera)?;
        for error in &report.upload.recoverable {
            tracing::warn!(frame, %error, "recoverable upload error");
        }
        tracing::debug!(
            frame,
            sectors = report.upload.sectors_uploaded,
            bricks = report.upload.bricks_uploaded,
            pending_bricks = report.upload.pending_bricks,
            occluded = report.occluded,
            shadow_layers = report.shadow_layers.len(),
            "frame rendered"
        );
        if let Some(error) = context.take_uncaptured_error() {
            anyhow::bail!("GPU validation error at frame {frame}: {error}");
        }

        if screenshots.should_capture(frame) {
            let pixels = renderer.read_output_rgba8()?;
            save_rgba8(screenshots.output_path(frame), args.width, args.height, pixels)?;
        }
    }

    let hiz = renderer.readback_hiz();
    info!(
        hiz_frame = ?hiz.frame(),
        nearest = hiz.min_depth(),
        bind_group_rebuilds = renderer.bind_group_rebuilds(),
        "done"
    );
    renderer.wait_idle();
    Ok(())
}

fn print_help() {
    eprintln!(
        "Strata headless renderer

USAGE:
    cargo run -p strata-headless -- [OPTIONS]

OPTIONS:
    -W, --width <N>         Output width (default: 640)
    -H, --height <N>        Output height (default: 360)
    -n, --frames <N>        Frames to render (default: 8)
    -f, --capture <FRAMES>  Frame indices to save
                            Examples: \"0\" \"0,10,20\" \"0-5\" \"0,5-10,20\"
                            Default: the last frame
    -o, --output <PATTERN>  Output path pattern (use {{}} for frame number)
                            Default: strata_{{}}.png
    --seed <N>              Terrain seed (default: 42)
    --orbit <RADIANS>       Camera orbit per frame (default: 0)
    --debug <MODE>          none, bvh, instances, lights
    --mode <MODE>           lit, albedo, normals, gbuffer
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}

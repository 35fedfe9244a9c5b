//! Lumina Engine Demo Viewer
//!
//! Renders a small PBR scene (a ground plane and a ring of cubes with
//! varying roughness and metalness) lit by a shadow-casting sun and a
//! point light.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p lumina-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `-c, --config <FILE>`: Load an `AppConfig` TOML file
//! - `--shaders <DIR>`: Compiled shader directory (default: `shaders`)
//! - `--panorama <FILE>`: Image used as the skybox panorama
//! - `-S, --screenshot`, `-o, --output <PATTERN>`, `-f, --frames <FRAMES>`,
//!   `--exit-after`: Screenshot capture
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod geometry;

use lumina_app::{run_app, AppConfig};

use crate::app::Viewer;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let mut config = match flag_value(&args, &["-c", "--config"]) {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::new("Lumina Engine - Viewer").with_size(WIDTH, HEIGHT),
    };
    if let Some(dir) = flag_value(&args, &["--shaders"]) {
        config = config.with_shader_dir(dir);
    }

    run_app::<Viewer>(config)
}

/// Value following the first occurrence of any of `names`.
pub fn flag_value<'a>(args: &'a [String], names: &[&str]) -> Option<&'a str> {
    args.iter()
        .position(|arg| names.contains(&arg.as_str()))
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn print_help() {
    eprintln!(
        "Lumina Engine Demo Viewer

USAGE:
    cargo run -p lumina-viewer -- [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Load application config from a TOML file
    --shaders <DIR>         Compiled shader directory (default: shaders)
    --panorama <FILE>       Image used as the skybox panorama

SCREENSHOT OPTIONS:
    -S, --screenshot        Enable screenshot capture mode
    -o, --output <PATTERN>  Output path pattern (use {{}} for frame number)
                            Default: screenshot_{{}}.png
    -f, --frames <FRAMES>   Frame indices to capture
                            Examples: \"0\" \"0,10,20\" \"0-5\" \"0,5-10,20\"
                            Default: 0
    --exit-after            Exit after capturing all specified frames

CONTROLS:
    Right mouse drag        Orbit the camera
    Mouse wheel             Zoom
    Space                   Pause the animation
    F3                      Cycle debug visualization
    M                       Cycle MSAA (off, 2x, 4x, 8x)
    H                       Toggle HDR output
    V                       Toggle vsync
    R                       Reload shaders
    F12                     Save a screenshot
    Escape                  Quit

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_value_takes_the_following_argument() {
        let args: Vec<String> = ["viewer", "--shaders", "out/spv", "-c"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(flag_value(&args, &["--shaders"]), Some("out/spv"));
        assert_eq!(flag_value(&args, &["-c", "--config"]), None);
        assert_eq!(flag_value(&args, &["--panorama"]), None);
    }
}

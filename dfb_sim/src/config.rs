use std::{ffi::OsString, str::FromStr, time::Duration};

use clap::ArgMatches;
use dfb_lib::{
    config::{CommConfig, ConfigError, FrameBufferConfig},
    ColorBufferFormat, FrameMode,
};
use nalgebra::{vector, Vector2};

/// Parse value of a validated option
fn parse_value<T>(args: &ArgMatches, key: &str) -> Result<T, String>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let s = args
        .value_of(key)
        .ok_or_else(|| format!("missing value of {key}"))?;
    s.parse::<T>().map_err(|e| format!("invalid {key} '{s}': {e}"))
}

/// Transform `Values` into `Vector`
fn values_to_vector2(args: &ArgMatches, key: &str) -> Result<Vector2<usize>, String> {
    let vals = args
        .values_of(key)
        .ok_or_else(|| format!("missing value of {key}"))?
        .map(|v| v.parse::<usize>().map_err(|e| format!("invalid {key}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match vals[..] {
        [x, y] => Ok(vector![x, y]),
        _ => Err(format!("{key} needs two values")),
    }
}

pub fn parse_mode(s: &str) -> Result<FrameMode, String> {
    match s {
        "write-once" => Ok(FrameMode::WriteOnce),
        "z-composite" => Ok(FrameMode::ZComposite),
        "alpha-blend" => Ok(FrameMode::AlphaBlend),
        _ => Err(format!("unknown mode '{s}'")),
    }
}

pub fn parse_format(s: &str) -> Result<ColorBufferFormat, String> {
    match s {
        "rgba8" => Ok(ColorBufferFormat::Rgba8),
        "srgba" => Ok(ColorBufferFormat::Srgba),
        "rgba32f" => Ok(ColorBufferFormat::Rgba32F),
        "none" => Ok(ColorBufferFormat::None),
        _ => Err(format!("unknown format '{s}'")),
    }
}

/// App configuration
/// Config is built from args parsed by `clap`
#[derive(Debug, Clone)]
pub struct Config {
    /// Settings shared by the frame buffers of all ranks
    pub frame_buffer: FrameBufferConfig,
    pub comm: CommConfig,
    /// Number of ranks, including the master
    pub ranks: usize,
    pub frames: usize,
    pub threshold: f32,
    /// Longest wait for one frame
    pub timeout: Duration,
    /// Optional seed for RNG, to replicate results
    pub seed: Option<u64>,
    // Output file name
    pub file_name: OsString,
}

impl Config {
    pub fn from_args(args: ArgMatches) -> Result<Config, String> {
        let size = values_to_vector2(&args, "size")?;
        let frame_mode = parse_mode(args.value_of("mode").unwrap_or("write-once"))?;
        let color_format = parse_format(args.value_of("format").unwrap_or("srgba"))?;

        let frame_buffer = FrameBufferConfig::builder(size.x, size.y)
            .frame_mode(frame_mode)
            .color_format(color_format)
            .accumulation(args.is_present("accumulate"))
            .variance(args.is_present("variance"))
            .build()
            .map_err(|e: ConfigError| e.to_string())?;

        let mut comm = CommConfig::default();
        if args.is_present("first-chunk") {
            let first_chunk = parse_value(&args, "first-chunk")?;
            comm = CommConfig::new(first_chunk, comm.max_bcast, comm.initial_capacity)
                .map_err(|e| e.to_string())?;
        }

        let seed = match args.value_of("seed") {
            Some(_) => Some(parse_value(&args, "seed")?),
            None => None,
        };

        Ok(Config {
            frame_buffer,
            comm,
            ranks: parse_value(&args, "ranks")?,
            frames: parse_value(&args, "frames")?,
            threshold: parse_value(&args, "threshold")?,
            timeout: Duration::from_secs(parse_value(&args, "timeout")?),
            seed,
            file_name: args
                .value_of_os("output-file")
                .map(OsString::from)
                .unwrap_or_else(|| OsString::from("frame.ppm")),
        })
    }
}

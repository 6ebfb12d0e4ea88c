//! Argument parsing and validation
//! Uses library `clap`

use std::ffi::OsStr;

use clap::{Arg, Command, ValueHint};

// up to 32bit value
pub fn is_positive_number(num: &str) -> Result<(), String> {
    let n = num.parse::<u32>();
    match n {
        Ok(n) => {
            if n > 0 {
                Ok(())
            } else {
                Err("Number must be greater than 0".into())
            }
        }
        Err(_) => Err("Number required".into()),
    }
}

pub fn is_non_negative_float(num: &str) -> Result<(), String> {
    let n = num.parse::<f32>();
    match n {
        Ok(n) => {
            if n >= 0.0 {
                Ok(())
            } else {
                Err("Number must not be negative".into())
            }
        }
        Err(_) => Err("Number required".into()),
    }
}

pub const MODE_NAMES: &[&str] = &["write-once", "z-composite", "alpha-blend"];
pub const FORMAT_NAMES: &[&str] = &["rgba8", "srgba", "rgba32f", "none"];

pub fn get_command<'a>() -> Command<'a> {
    Command::new("dfb-sim")
        .version("0.1.0")
        .about("Runs a distributed frame buffer session on threads and saves the image")
        .arg(
            Arg::new("size")
                .help("Size of the frame buffer")
                .long("size")
                .short('s')
                .number_of_values(2)
                .value_names(&["W", "H"])
                .use_value_delimiter(true)
                .require_value_delimiter(true)
                .require_equals(true)
                .default_values(&["512", "512"])
                .validator(is_positive_number),
        )
        .arg(
            Arg::new("ranks")
                .help("Number of ranks, rank 0 is the master")
                .long("ranks")
                .short('r')
                .value_name("N")
                .default_value("5")
                .validator(is_positive_number),
        )
        .arg(
            Arg::new("mode")
                .help("Compositing mode")
                .long("mode")
                .short('m')
                .value_name("MODE")
                .default_value("write-once")
                .possible_values(MODE_NAMES),
        )
        .arg(
            Arg::new("format")
                .help("Pixel format of the color buffer")
                .long("format")
                .short('f')
                .value_name("FORMAT")
                .default_value("srgba")
                .possible_values(FORMAT_NAMES),
        )
        .arg(
            Arg::new("frames")
                .help("Number of frames to render")
                .long("frames")
                .short('n')
                .value_name("N")
                .default_value("1")
                .validator(is_positive_number),
        )
        .arg(
            Arg::new("accumulate")
                .help("Accumulate frames")
                .long("accumulate")
                .short('a'),
        )
        .arg(
            Arg::new("variance")
                .help("Estimate error, converged tiles stop rendering")
                .long("variance")
                .requires("accumulate"),
        )
        .arg(
            Arg::new("threshold")
                .help("Error under which a tile counts as converged")
                .long("threshold")
                .short('t')
                .value_name("ERROR")
                .default_value("0.01")
                .validator(is_non_negative_float),
        )
        .arg(
            Arg::new("timeout")
                .help("Seconds to wait for a frame")
                .long("timeout")
                .value_name("SECONDS")
                .default_value("60")
                .validator(is_positive_number),
        )
        .arg(
            Arg::new("seed")
                .help("Seed for RNG, leave out for random seed")
                .long("seed")
                .value_name("SEED")
                .validator(is_positive_number),
        )
        .arg(
            Arg::new("first-chunk")
                .help("Bytes broadcast by the first call of every batch")
                .long("first-chunk")
                .value_name("BYTES")
                .hide(true) // Hide from help
                .validator(is_positive_number),
        )
        .arg(
            Arg::new("output-file")
                .help("File name to output")
                .long("output-file")
                .short('o')
                .value_name("FILE")
                .allow_invalid_utf8(true)
                .value_hint(ValueHint::FilePath)
                .default_value_os(OsStr::new("frame.ppm")),
        )
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn defaults() {
        let m = get_command().try_get_matches_from(["dfb-sim"]).unwrap();
        assert_eq!(m.value_of("mode"), Some("write-once"));
        assert_eq!(m.values_of("size").unwrap().collect::<Vec<_>>(), ["512", "512"]);
        assert!(!m.is_present("accumulate"));
    }

    #[test]
    fn variance_requires_accumulation() {
        let res = get_command().try_get_matches_from(["dfb-sim", "--variance"]);
        assert!(res.is_err());
        let res = get_command().try_get_matches_from(["dfb-sim", "--variance", "-a"]);
        assert!(res.is_ok());
    }

    #[test]
    fn validators() {
        assert!(is_positive_number("0").is_err());
        assert!(is_positive_number("x").is_err());
        assert!(is_non_negative_float("0").is_ok());
        assert!(is_non_negative_float("-0.5").is_err());
    }
}

use std::process::ExitCode;

use cumulus::{AppConfig, VoxelExtent};

const USAGE: &str = "usage: cumulus [DENSITY.raw TEMPERATURE.raw] [--grid N] [--shaders DIR]";

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<AppConfig, String> {
    let mut config = AppConfig::new();
    let mut data = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--grid" => {
                let size = args
                    .next()
                    .and_then(|n| n.parse::<u32>().ok())
                    .filter(|&n| n > 0)
                    .ok_or("--grid needs a positive voxel count")?;
                config = config.extent(VoxelExtent::cube(size));
            }
            "--shaders" => {
                let dir = args.next().ok_or("--shaders needs a directory")?;
                config = config.shader_dir(dir);
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ => data.push(arg),
        }
    }

    match data.as_slice() {
        [] => {}
        [density, temperature] => config = config.volume_data(density, temperature),
        _ => return Err(format!("expected two raw data files\n{USAGE}")),
    }
    Ok(config)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match parse_args(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    match cumulus::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<AppConfig, String> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn no_arguments_use_procedural_data() {
        let config = parse(&[]).unwrap();
        assert!(config.density_path.is_none());
        assert!(config.shader_dir.is_none());
    }

    #[test]
    fn data_files_and_grid_size() {
        let config = parse(&["d.raw", "t.raw", "--grid", "64"]).unwrap();
        assert!(config.density_path.unwrap().ends_with("d.raw"));
        assert!(config.temperature_path.unwrap().ends_with("t.raw"));
        assert_eq!(config.extent, VoxelExtent::cube(64));
    }

    #[test]
    fn a_single_data_file_is_rejected() {
        assert!(parse(&["d.raw"]).is_err());
        assert!(parse(&["--grid", "0"]).is_err());
    }
}

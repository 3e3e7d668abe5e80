use std::env;
use std::path::PathBuf;

use tools::{Dtype, inspect, synth};

fn main() {
    if let Err(e) = real_main() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<(), String> {
    let mut args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        return Err(usage());
    }

    let cmd = args[1].clone();
    args.drain(0..2);

    match cmd.as_str() {
        "inspect" => cmd_inspect(args),
        "synth" => cmd_synth(args),
        _ => Err(usage()),
    }
}

fn cmd_inspect(args: Vec<String>) -> Result<(), String> {
    // sunrise-tools inspect <file.bin> [--dtype u8|vec2f|vec3f|vec3u|vec4u]
    let mut path: Option<PathBuf> = None;
    let mut dtype: Option<Dtype> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--dtype" => {
                i += 1;
                let raw = args.get(i).ok_or("--dtype requires a value")?;
                dtype = Some(raw.parse()?);
            }
            s if s.starts_with('-') => {
                return Err(format!("unknown arg: {s}\n\n{}", usage()));
            }
            s if path.is_none() => path = Some(PathBuf::from(s)),
            s => return Err(format!("unexpected argument: {s}")),
        }
        i += 1;
    }

    let path = path.ok_or_else(usage)?;
    let dtype = dtype
        .or_else(|| Dtype::infer(&path))
        .unwrap_or_default();
    let inspection = inspect(&path, dtype)?;
    let payload =
        serde_json::to_string_pretty(&inspection).map_err(|e| format!("json: {e}"))?;
    println!("{payload}");
    Ok(())
}

fn cmd_synth(args: Vec<String>) -> Result<(), String> {
    // sunrise-tools synth <out_dir> [--grid N] [--observations id,...]
    let mut out_dir: Option<PathBuf> = None;
    let mut grid: usize = 16;
    let mut observations = vec!["0000000".to_string()];

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--grid" => {
                i += 1;
                let raw = args.get(i).ok_or("--grid requires a value")?;
                grid = raw
                    .parse()
                    .map_err(|_| format!("invalid --grid value: {raw}"))?;
            }
            "--observations" => {
                i += 1;
                let raw = args.get(i).ok_or("--observations requires a value")?;
                observations = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            s if s.starts_with('-') => {
                return Err(format!("unknown arg: {s}\n\n{}", usage()));
            }
            s if out_dir.is_none() => out_dir = Some(PathBuf::from(s)),
            s => return Err(format!("unexpected argument: {s}")),
        }
        i += 1;
    }

    let out_dir = out_dir.ok_or_else(usage)?;
    let config = synth(&out_dir, grid, &observations)?;
    eprintln!(
        "wrote {grid}x{grid} park with {} observation(s); config at {}",
        observations.len(),
        config.display()
    );
    Ok(())
}

fn usage() -> String {
    let exe = env::args()
        .next()
        .unwrap_or_else(|| "sunrise-tools".to_string());
    format!(
        "Usage:\n  {exe} inspect <file.bin> [--dtype u8|vec2f|vec3f|vec3u|vec4u]\n  {exe} synth <out_dir> [--grid N] [--observations id,...]\n\nNotes:\n- Without --dtype the record type is read from the file name suffix, falling back to u8.\n- `synth` writes `config.json` next to the dataset; pass it to tile_server with --config.\n"
    )
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use ninja_pipeline::Pipeline;

const USAGE: &str = "\
ninja-load: load a ninja build file and print what it declares

USAGE:
  ninja-load [-C DIR] [-f FILE] [--list]

OPTIONS:
  -C DIR    Change to DIR before loading (default: current directory)
  -f FILE   Build file to load (default: build.ninja)
  --list    Print every build edge instead of a summary
  -h, --help";

#[derive(Debug)]
struct Args {
    dir: PathBuf,
    build_file: PathBuf,
    list: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        println!("{}", USAGE);
        std::process::exit(0);
    }
    let parsed = Args {
        dir: args
            .opt_value_from_str("-C")?
            .unwrap_or_else(|| PathBuf::from(".")),
        build_file: args
            .opt_value_from_str("-f")?
            .unwrap_or_else(|| PathBuf::from("build.ninja")),
        list: args.contains("--list"),
    };
    let rest = args.free()?;
    if !rest.is_empty() {
        anyhow::bail!("unexpected arguments: {:?} (see --help)", rest);
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = parse_args()?;
    let pipeline = Arc::new(Pipeline::new(&args.dir));
    let (arena, targets) = pipeline
        .load(&args.build_file)
        .await
        .with_context(|| format!("loading {}", args.dir.join(&args.build_file).display()))?;

    if args.list {
        for target in &targets {
            let outputs: Vec<_> = target
                .outputs
                .iter()
                .map(|o| String::from_utf8_lossy(o).into_owned())
                .collect();
            println!(
                "{} <- {}",
                outputs.join(" "),
                String::from_utf8_lossy(&target.rule)
            );
        }
    } else {
        let defaults = arena.defaults(arena.root());
        println!(
            "{} scopes, {} build edges, {} default targets",
            arena.len(),
            targets.len(),
            defaults.len()
        );
    }
    Ok(())
}

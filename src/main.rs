mod cli;

use mediaforge::batch::{prepare_specs, run_batch, Engine};
use mediaforge::report::{format_bitrate, format_duration, format_size, progress_line};
use mf_av::args::build_args;
use mf_av::{ProcessDriver, ToolRegistry};
use mf_core::{Config, MediaDescriptor, OutputFormat, Quality};
use mf_hw::HardwareProfiler;
use mf_queue::derive_output_path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};

/// Settings for one `convert` invocation.
struct ConvertArgs {
    inputs: Vec<PathBuf>,
    format: String,
    quality: String,
    output_dir: Option<PathBuf>,
    jobs: Option<usize>,
    no_gpu: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediaforge=trace,mf_queue=trace,mf_av=trace,mf_hw=debug,mf_core=debug".to_string()
        } else {
            "mediaforge=info,mf_queue=info,mf_av=info,mf_hw=info,mf_core=warn".to_string()
        }
    });

    // stdout carries command output; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Convert {
            inputs,
            format,
            quality,
            output_dir,
            jobs,
            no_gpu,
        } => {
            let args = ConvertArgs {
                inputs,
                format,
                quality,
                output_dir,
                jobs,
                no_gpu,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert(args, config_path))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, config_path))
        }
        Commands::Hardware { json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(show_hardware(json))
        }
        Commands::Plan {
            file,
            format,
            quality,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(plan(&file, &format, &quality, config_path))
        }
        Commands::CheckTools => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(config_path))
        }
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or_else(|| cli.config.clone());
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediaforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// File config (or defaults) with `MEDIAFORGE_*` overrides applied.
fn load_config(path: Option<&Path>) -> Config {
    let mut config = Config::load_or_default(path);
    config.apply_env_overrides();
    config
}

async fn convert(args: ConvertArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path);

    // Command-line flags win over file and environment settings
    if let Some(dir) = args.output_dir {
        config.scheduler.output_dir = Some(dir);
    }
    if let Some(jobs) = args.jobs {
        config.scheduler.max_concurrent_jobs = jobs;
        config.scheduler.auto_detect_hardware = false;
    }
    if args.no_gpu {
        config.scheduler.gpu_acceleration = false;
    }

    for warning in config.validate() {
        tracing::warn!("{warning}");
    }

    if let Some(ref dir) = config.scheduler.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }

    let engine = Engine::new(config);
    engine
        .driver
        .verify()
        .await
        .context("ffmpeg is not usable")?;

    let specs = prepare_specs(&engine.driver, &args.inputs, &args.format, &args.quality).await;
    let total = specs.len();
    let handle = engine.spawn_scheduler();

    let interrupt = {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted; cancelling all conversions...");
                if let Err(e) = handle.cancel_all().await {
                    tracing::warn!("Failed to cancel conversions: {e}");
                }
            }
        })
    };

    let result = run_batch(&handle, specs, |update, input| {
        println!("{}", progress_line(update, input));
    })
    .await;

    interrupt.abort();
    if let Err(e) = handle.shutdown().await {
        tracing::debug!("Scheduler already stopped: {e}");
    }

    let summary = result?;
    for rejection in &summary.rejected {
        println!("✗ {}: {}", rejection.input.display(), rejection.reason);
    }

    println!();
    println!(
        "{} completed, {} failed, {} cancelled, {} rejected",
        summary.completed,
        summary.failed,
        summary.cancelled,
        summary.rejected.len()
    );

    if !summary.all_succeeded() {
        anyhow::bail!(
            "{} of {} conversions did not complete",
            total - summary.completed,
            total
        );
    }

    Ok(())
}

async fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = load_config(config_path);
    let driver = ProcessDriver::new(ToolRegistry::discover(&config.tools));
    let media = driver.probe(file).await?;

    if json {
        let json_str = serde_json::to_string_pretty(&media)?;
        println!("{}", json_str);
    } else {
        print_media(&media);
    }

    Ok(())
}

fn print_media(media: &MediaDescriptor) {
    println!("File: {}", media.path.display());
    println!("Container: {}", media.container);
    println!("Size: {}", format_size(media.size));
    println!("Duration: {}", format_duration(media.duration_secs));
    if media.bitrate > 0 {
        println!("Bitrate: {}", format_bitrate(media.bitrate));
    }

    if media.has_video {
        print!("Video: {}", media.video_codec.as_deref().unwrap_or("unknown"));
        if let Some(resolution) = media.resolution() {
            print!(" {}", resolution);
        }
        let fps = media.frame_rate.fps();
        if fps > 0.0 {
            print!(" {:.3} fps", fps);
        }
        println!();
    }
    if media.has_audio {
        println!("Audio: {}", media.audio_codec.as_deref().unwrap_or("unknown"));
    }
}

async fn show_hardware(json: bool) -> Result<()> {
    let profiler = HardwareProfiler::new();
    let snapshot = profiler.snapshot().await;
    let recommended = profiler.recommended_concurrency().await;
    let load = profiler.current_load();

    if json {
        let value = serde_json::json!({
            "snapshot": &*snapshot,
            "recommended_concurrency": recommended,
            "load": load,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Platform: {}", snapshot.platform);
    println!(
        "CPU: {} ({} cores, {} threads)",
        snapshot.cpu.model, snapshot.cpu.cores, snapshot.cpu.threads
    );
    println!(
        "Memory: {} total, {} available",
        format_size(snapshot.memory.total),
        format_size(snapshot.memory.available)
    );

    for vendor in mf_hw::GpuVendor::PREFERENCE {
        let gpu = snapshot.gpu.get(vendor);
        let status = if gpu.available { "✓" } else { "✗" };
        print!("{} {}", status, vendor);
        if let Some(ref model) = gpu.model {
            print!(" - {}", model);
        }
        println!();
    }

    match snapshot.best_gpu() {
        Some(vendor) => println!("Hardware encoder: {}", vendor.encoder()),
        None => println!("Hardware encoder: none (software encoding)"),
    }
    println!("Recommended concurrency: {}", recommended);
    println!(
        "Current load: {:.0}% CPU, {:.0}% memory",
        load.cpu_percent, load.memory_percent
    );

    Ok(())
}

async fn plan(file: &Path, format: &str, quality: &str, config_path: Option<&Path>) -> Result<()> {
    let format: OutputFormat = format.parse()?;
    let quality: Quality = quality.parse()?;
    let config = load_config(config_path);

    let driver = ProcessDriver::new(ToolRegistry::discover(&config.tools));
    let media = match driver.probe(file).await {
        Ok(media) => media,
        Err(e) => {
            tracing::warn!("Probe failed, estimating from file size only: {e}");
            let size = std::fs::metadata(file)
                .with_context(|| format!("Cannot read {}", file.display()))?
                .len();
            MediaDescriptor {
                path: file.to_path_buf(),
                size,
                ..Default::default()
            }
        }
    };

    let profiler = HardwareProfiler::new();
    let snapshot = profiler.snapshot().await;
    let snapshot = if config.scheduler.gpu_acceleration {
        (*snapshot).clone()
    } else {
        snapshot.cpu_only()
    };

    let estimate = mf_hw::estimate(&snapshot, &media, format, quality);
    let output = derive_output_path(file, format, config.scheduler.output_dir.as_deref());
    let ffmpeg_args = build_args(file, &output, format, quality, &estimate.config);
    let exec = &estimate.config;

    println!("Input: {} ({})", file.display(), format_size(media.size));
    println!("Output: {}", output.display());
    println!("Encoder: {}", exec.encoder);
    println!("Preset: {}", exec.preset);
    println!("Threads: {}", exec.threads);
    println!("GPU: {}", if exec.enable_gpu { "yes" } else { "no" });
    println!("Buffer: {}", format_size(exec.buffer_size));
    println!(
        "Codecs: {} / {}",
        exec.video_codec.as_deref().unwrap_or("none"),
        exec.audio_codec
    );
    println!(
        "Estimated time: {}",
        format_duration(estimate.duration_secs)
    );
    println!("Estimated size: {}", format_size(estimate.output_size));
    println!("Command: ffmpeg {}", ffmpeg_args.join(" "));

    Ok(())
}

async fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = load_config(config_path);
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to enable conversions.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Cannot read config file {}", p.display()))?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let scheduler = &config.scheduler;
    println!(
        "  Max concurrent jobs: {}",
        scheduler.effective_max_concurrent_jobs()
    );
    println!("  Auto-detect hardware: {}", scheduler.auto_detect_hardware);
    println!("  GPU acceleration: {}", scheduler.gpu_acceleration);
    match scheduler.output_dir {
        Some(ref dir) => println!("  Output directory: {}", dir.display()),
        None => println!("  Output directory: next to input"),
    }
    println!("  Event capacity: {}", config.events.capacity);

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &warnings {
            println!("  ! {}", warning);
        }
    }

    Ok(())
}

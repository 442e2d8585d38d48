//! medj2k CLI - JPEG 2000 decoding utility.
//!
//! Thin command-line front end over the decoder core: decode codestreams to
//! raw pixels or PGM/PPM, and inspect codestream metadata.

use clap::{Parser, Subcommand, ValueEnum};
use medj2k::{DecodeOptions, SampleBuffer};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// JPEG 2000 (ISO/IEC 15444-1) decoder for medical imaging pipelines
#[derive(Parser)]
#[command(name = "medj2k")]
#[command(version)]
#[command(about = "Decode JPEG 2000 codestreams to raw pixels", long_about = None)]
#[command(after_help = "EXAMPLES:
    medj2k decode -i image.j2k -o pixels.raw
    medj2k decode -i image.jp2 -o image.pgm -f pgm
    medj2k decode -i truncated.j2k -o pixels.raw --lenient
    medj2k info -i image.j2k

SUPPORTED INPUT:
    Raw J2K codestreams (.j2k/.j2c) and JP2 containers (.jp2)")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a codestream to raw pixels or a PGM/PPM image
    #[command(visible_alias = "d")]
    Decode {
        /// Input file path (J2K codestream or JP2 container)
        #[arg(short, long, help = "Path to the compressed input file")]
        input: PathBuf,

        /// Output file path for decoded pixels
        #[arg(short, long, help = "Path for the output file")]
        output: PathBuf,

        /// Output format: raw (little-endian binary) or pgm/ppm
        #[arg(short, long, default_value = "raw", value_enum)]
        format: OutputFormat,

        /// Zero-fill truncated or corrupt code-blocks instead of failing
        #[arg(long)]
        lenient: bool,
    },

    /// Display codestream metadata without decoding pixel data
    #[command(visible_alias = "i")]
    Info {
        /// Input file path
        #[arg(short, long, help = "Path to the compressed input file")]
        input: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Raw binary samples, little-endian, components interleaved
    Raw,
    /// Portable GrayMap / PixMap (1 or 3 unsigned components)
    Pgm,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Decode {
            input,
            output,
            format,
            lenient,
        } => run_decode(&input, &output, format, lenient),
        Commands::Info { input } => run_info(&input),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run_decode(
    input: &PathBuf,
    output: &PathBuf,
    format: OutputFormat,
    lenient: bool,
) -> Result<(), String> {
    let data = fs::read(input).map_err(|e| format!("reading {}: {e}", input.display()))?;
    let (pixels, summary) =
        medj2k::decode_with_options(&data, data.len(), DecodeOptions { lenient })
            .map_err(|e| e.to_string())?;

    if summary.codeblocks_recovered > 0 || summary.truncated_tiles > 0 {
        eprintln!(
            "warning: recovered {} code-blocks, {} truncated tiles",
            summary.codeblocks_recovered, summary.truncated_tiles
        );
    }

    let bytes = match format {
        OutputFormat::Raw => pixels.samples.to_le_bytes(),
        OutputFormat::Pgm => {
            if pixels.is_signed {
                return Err("PGM/PPM output requires unsigned samples".into());
            }
            let magic = match pixels.components {
                1 => "P5",
                3 => "P6",
                n => return Err(format!("PGM/PPM output supports 1 or 3 components, not {n}")),
            };
            let maxval = (1u32 << pixels.bit_depth) - 1;
            let mut out = format!(
                "{magic}\n{} {}\n{}\n",
                pixels.width, pixels.height, maxval
            )
            .into_bytes();
            match &pixels.samples {
                SampleBuffer::U8(v) => out.extend_from_slice(v),
                // PNM multi-byte samples are big-endian.
                SampleBuffer::U16(v) => out.extend(v.iter().flat_map(|s| s.to_be_bytes())),
                _ => return Err("PGM/PPM output requires unsigned samples".into()),
            }
            out
        }
    };

    fs::write(output, bytes).map_err(|e| format!("writing {}: {e}", output.display()))?;
    Ok(())
}

fn run_info(input: &PathBuf) -> Result<(), String> {
    let data = fs::read(input).map_err(|e| format!("reading {}: {e}", input.display()))?;
    let header = medj2k::probe(&data).map_err(|e| e.to_string())?;

    let info = &header.components[0];
    println!("size:       {}x{}", header.width, header.height);
    println!(
        "tiles:      {}x{} ({} total)",
        header.tiles_across(),
        header.tiles_down(),
        header.tile_count()
    );
    println!("tile size:  {}x{}", header.tile_width, header.tile_height);
    println!("components: {}", header.components.len());
    println!(
        "samples:    {}-bit {}",
        info.depth,
        if info.is_signed { "signed" } else { "unsigned" }
    );
    if info.dx != 1 || info.dy != 1 {
        println!("subsample:  {}x{}", info.dx, info.dy);
    }
    Ok(())
}

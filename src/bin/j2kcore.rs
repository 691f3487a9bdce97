//! j2kcore CLI - exercises the JPEG 2000 core on PGM images.
//!
//! `roundtrip` encodes an image into packets, decodes it again and reports the
//! size of every layer together with the reconstruction error. `tree` prints
//! the subband decomposition of a tile-component.

use clap::{Parser, Subcommand, ValueEnum};
use j2k_core::jpeg2000::bit_plane_coder::CodingOptions;
use j2k_core::jpeg2000::codeblock::CodeBlockSize;
use j2k_core::jpeg2000::dwt::FilterKind;
use j2k_core::jpeg2000::mq_coder::Termination;
use j2k_core::jpeg2000::packet::{MarkerFlags, Packet, ProgressionOrder};
use j2k_core::jpeg2000::quantization::QuantizationType;
use j2k_core::jpeg2000::rate_allocator::LayerSpec;
use j2k_core::jpeg2000::subband::SubbandTree;
use j2k_core::{CodecContext, ComponentInfo, DataBlock, EncoderSpecs, TileGeometry, TileInput};
use std::fs;
use std::path::{Path, PathBuf};

/// JPEG 2000 core codec driver
#[derive(Parser)]
#[command(name = "j2kcore")]
#[command(version)]
#[command(about = "Round trips PGM images through the JPEG 2000 core codec", long_about = None)]
#[command(after_help = "EXAMPLES:
    j2kcore roundtrip -i image.pgm
    j2kcore roundtrip -i image.pgm --lossy --layer-bytes 2000,8000 -o decoded.pgm
    j2kcore tree --width 640 --height 480 --levels 3")]
struct Cli {
    /// Log debug messages to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode and decode a binary PGM (P5) image
    #[command(visible_alias = "r")]
    Roundtrip {
        /// Input PGM file
        #[arg(short, long)]
        input: PathBuf,

        /// Write the decoded image here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Use the 9/7 filter with expounded quantization
        #[arg(long)]
        lossy: bool,

        /// Base quantization step for lossy coding
        #[arg(long, default_value = "0.0078125")]
        base_step: f32,

        /// Decomposition levels
        #[arg(short, long, default_value = "5")]
        levels: u8,

        /// Nominal code-block width and height
        #[arg(short, long, default_value = "64")]
        block: u32,

        /// Tile width and height (the whole image when omitted)
        #[arg(short, long)]
        tile: Option<u32>,

        /// Cumulative byte budgets of the layers below a final unbounded layer
        #[arg(long, value_delimiter = ',')]
        layer_bytes: Vec<usize>,

        /// Estimate layer thresholds instead of searching them
        #[arg(long)]
        estimate: bool,

        /// Decode only this many layers
        #[arg(long)]
        decode_layers: Option<u16>,

        #[arg(long, default_value = "lrcp", value_enum)]
        progression: Progression,

        #[arg(long, default_value = "near-opt", value_enum)]
        termination: TerminationArg,

        /// Raw coding of the lower bit-planes
        #[arg(long)]
        bypass: bool,

        /// Terminate the codeword after every pass
        #[arg(long)]
        terminate_all: bool,

        /// Emit SOP and EPH markers
        #[arg(long)]
        markers: bool,
    },

    /// Print the subband tree of a tile-component
    #[command(visible_alias = "t")]
    Tree {
        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,

        /// Canvas position of the upper-left sample
        #[arg(long, default_value = "0")]
        x0: u32,

        #[arg(long, default_value = "0")]
        y0: u32,

        #[arg(short, long, default_value = "5")]
        levels: u8,

        #[arg(long)]
        irreversible: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Progression {
    Lrcp,
    Rlcp,
    Rpcl,
    Pcrl,
    Cprl,
}

impl From<Progression> for ProgressionOrder {
    fn from(p: Progression) -> Self {
        match p {
            Progression::Lrcp => ProgressionOrder::Lrcp,
            Progression::Rlcp => ProgressionOrder::Rlcp,
            Progression::Rpcl => ProgressionOrder::Rpcl,
            Progression::Pcrl => ProgressionOrder::Pcrl,
            Progression::Cprl => ProgressionOrder::Cprl,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TerminationArg {
    NearOpt,
    Easy,
    Predict,
    Full,
}

impl From<TerminationArg> for Termination {
    fn from(t: TerminationArg) -> Self {
        match t {
            TerminationArg::NearOpt => Termination::NearOptimal,
            TerminationArg::Easy => Termination::Easy,
            TerminationArg::Predict => Termination::Predict,
            TerminationArg::Full => Termination::Full,
        }
    }
}

fn log_level(verbose: bool) -> log::LevelFilter {
    if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    }
}

fn main() {
    let cli = Cli::parse();
    let _ = env_logger::builder().filter_level(log_level(cli.verbose)).try_init();

    let result = match cli.command {
        Commands::Roundtrip {
            input,
            output,
            lossy,
            base_step,
            levels,
            block,
            tile,
            layer_bytes,
            estimate,
            decode_layers,
            progression,
            termination,
            bypass,
            terminate_all,
            markers,
        } => {
            let options = RoundtripOptions {
                lossy,
                base_step,
                levels,
                block,
                tile,
                layer_bytes,
                optimize: !estimate,
                decode_layers,
                progression: progression.into(),
                coding: CodingOptions {
                    bypass,
                    terminate_each_pass: terminate_all,
                    termination: termination.into(),
                    ..Default::default()
                },
                markers: MarkerFlags {
                    sop: markers,
                    eph: markers,
                },
            };
            roundtrip(&input, output.as_deref(), &options)
        }
        Commands::Tree {
            width,
            height,
            x0,
            y0,
            levels,
            irreversible,
        } => {
            let filter = if irreversible {
                FilterKind::Irreversible97
            } else {
                FilterKind::Reversible53
            };
            print_tree(&SubbandTree::new(x0, y0, width, height, levels, filter));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

struct RoundtripOptions {
    lossy: bool,
    base_step: f32,
    levels: u8,
    block: u32,
    tile: Option<u32>,
    layer_bytes: Vec<usize>,
    optimize: bool,
    decode_layers: Option<u16>,
    progression: ProgressionOrder,
    coding: CodingOptions,
    markers: MarkerFlags,
}

struct Pgm {
    width: u32,
    height: u32,
    max_value: u32,
    samples: Vec<i32>,
}

fn read_pgm(path: &Path) -> Result<Pgm, Box<dyn std::error::Error>> {
    let data = fs::read(path)?;
    let mut fields = Vec::with_capacity(4);
    let mut pos = 0;
    while fields.len() < 4 {
        while pos < data.len() && data[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if data.get(pos) == Some(&b'#') {
            while pos < data.len() && data[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }
        let start = pos;
        while pos < data.len() && !data[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if start == pos {
            return Err("truncated PGM header".into());
        }
        fields.push(std::str::from_utf8(&data[start..pos])?.to_string());
    }
    pos += 1;
    if fields[0] != "P5" {
        return Err("only binary PGM (P5) is supported".into());
    }
    let width: u32 = fields[1].parse()?;
    let height: u32 = fields[2].parse()?;
    let max_value: u32 = fields[3].parse()?;
    if max_value == 0 || max_value > 65535 {
        return Err("PGM maximum value must be in 1..=65535".into());
    }
    let count = width as usize * height as usize;
    let bytes = if max_value > 255 { 2 } else { 1 };
    let raster = data
        .get(pos..pos + count * bytes)
        .ok_or("PGM raster is truncated")?;
    let samples = if bytes == 2 {
        raster
            .chunks_exact(2)
            .map(|c| i32::from(u16::from_be_bytes([c[0], c[1]])))
            .collect()
    } else {
        raster.iter().map(|&b| i32::from(b)).collect()
    };
    Ok(Pgm {
        width,
        height,
        max_value,
        samples,
    })
}

fn write_pgm(path: &Path, pgm: &Pgm) -> Result<(), Box<dyn std::error::Error>> {
    use std::io::Write;
    let mut file = fs::File::create(path)?;
    writeln!(file, "P5")?;
    writeln!(file, "{} {}", pgm.width, pgm.height)?;
    writeln!(file, "{}", pgm.max_value)?;
    if pgm.max_value > 255 {
        let bytes: Vec<u8> = pgm
            .samples
            .iter()
            .flat_map(|&s| (s as u16).to_be_bytes())
            .collect();
        file.write_all(&bytes)?;
    } else {
        let bytes: Vec<u8> = pgm.samples.iter().map(|&s| s as u8).collect();
        file.write_all(&bytes)?;
    }
    Ok(())
}

// Tile rectangles in raster order.
fn tiles(width: u32, height: u32, size: u32) -> Vec<(u32, u32, u32, u32)> {
    let mut out = Vec::new();
    for y in (0..height).step_by(size as usize) {
        for x in (0..width).step_by(size as usize) {
            out.push((x, y, size.min(width - x), size.min(height - y)));
        }
    }
    out
}

fn roundtrip(input: &Path, output: Option<&Path>, opts: &RoundtripOptions) -> Result<(), Box<dyn std::error::Error>> {
    let pgm = read_pgm(input)?;
    let bit_depth = (32 - pgm.max_value.leading_zeros()) as u8;
    let size = opts.tile.unwrap_or(pgm.width.max(pgm.height)).max(1);
    let rects = tiles(pgm.width, pgm.height, size);
    let area = f64::from(pgm.width) * f64::from(pgm.height);

    let components = vec![ComponentInfo::new(bit_depth, false)?];
    let mut specs = if opts.lossy {
        EncoderSpecs::lossy(rects.len(), components)?
    } else {
        EncoderSpecs::new(rects.len(), components)?
    };
    specs.base_step.set_default(opts.base_step);
    specs.levels.set_default(opts.levels);
    specs.code_block_size.set_default(CodeBlockSize::new(opts.block, opts.block)?);
    specs.coding_options.set_default(opts.coding);
    specs.progression.set_default(opts.progression);
    specs.markers.set_default(opts.markers);
    if opts.lossy {
        specs.quant_type.set_default(QuantizationType::Expounded);
    }
    for (t, &(_, _, w, h)) in rects.iter().enumerate() {
        // Budgets are shared among tiles by area.
        let share = f64::from(w) * f64::from(h) / area;
        let mut layers: Vec<LayerSpec> = opts
            .layer_bytes
            .iter()
            .map(|&b| LayerSpec::bytes((b as f64 * share) as usize, opts.optimize))
            .collect();
        layers.push(LayerSpec::unbounded());
        specs.layers.set_tile_default(t, layers);
    }

    let inputs: Vec<TileInput> = rects
        .iter()
        .enumerate()
        .map(|(t, &(x0, y0, w, h))| {
            let mut block = DataBlock::new(x0, y0, w, h);
            for y in 0..h {
                let start = ((y0 + y) * pgm.width + x0) as usize;
                block.row_mut(y).copy_from_slice(&pgm.samples[start..start + w as usize]);
            }
            TileInput {
                index: t,
                components: vec![block],
            }
        })
        .collect();

    let ctx = CodecContext::new(input.display().to_string());
    let encoded = j2k_core::encode_tiles(&inputs, &specs, &ctx)?;

    let layer_count = specs.layers.get_tile(0).len();
    for l in 0..layer_count {
        let bytes: usize = encoded.iter().map(|t| t.layers[l].bytes).sum();
        let empty = encoded.iter().all(|t| t.layers[l].empty);
        println!("layer {:>2}: {:>10} bytes{}", l, bytes, if empty { " (empty)" } else { "" });
    }
    let total: usize = encoded.iter().map(|t| t.total_bytes()).sum();
    println!(
        "total   : {:>10} bytes, {:.3} bpp",
        total,
        total as f64 * 8.0 / area.max(1.0)
    );

    let mut dec_specs = specs.decoder_specs()?;
    let keep = opts.decode_layers.unwrap_or(layer_count as u16);
    for t in 0..rects.len() {
        dec_specs.num_layers.set_tile_default(t, keep.min(layer_count as u16));
    }
    let streams: Vec<(TileGeometry, Vec<Packet>)> = encoded
        .iter()
        .map(|tile| {
            let packets = tile
                .packets
                .iter()
                .filter(|p| p.id.is_some_and(|id| id.layer < keep))
                .cloned()
                .collect();
            (tile.geometry.clone(), packets)
        })
        .collect();
    let decoded = j2k_core::decode_tiles(&dec_specs, &streams, &ctx);

    let mut out = Pgm {
        width: pgm.width,
        height: pgm.height,
        max_value: pgm.max_value,
        samples: vec![0; pgm.samples.len()],
    };
    for result in decoded {
        let components = result?;
        let block = &components[0];
        for y in 0..block.h {
            let start = ((block.uly + y) * pgm.width + block.ulx) as usize;
            out.samples[start..start + block.w as usize].copy_from_slice(block.row(y));
        }
    }

    let mut max_error = 0;
    let mut squared = 0f64;
    for (a, b) in pgm.samples.iter().zip(&out.samples) {
        let d = (a - b).abs();
        max_error = max_error.max(d);
        squared += f64::from(d) * f64::from(d);
    }
    let mse = squared / area.max(1.0);
    if mse == 0.0 {
        println!("decoded {} layer(s): lossless", keep);
    } else {
        let peak = f64::from(pgm.max_value);
        println!(
            "decoded {} layer(s): max error {}, PSNR {:.2} dB",
            keep,
            max_error,
            10.0 * (peak * peak / mse).log10()
        );
    }
    if let Some(path) = output {
        write_pgm(path, &out)?;
    }
    Ok(())
}

fn print_tree(tree: &SubbandTree) {
    println!(
        "{} levels, {:?}, {}x{} at ({}, {})",
        tree.num_levels(),
        tree.filter(),
        tree.root().w,
        tree.root().h,
        tree.root().ulcx,
        tree.root().ulcy
    );
    for i in tree.leaves() {
        let b = tree.node(i);
        println!(
            "  r{} {:?}{:<3} {:>5}x{:<5} at ({}, {}) canvas ({}, {}) l2 {:.4}",
            b.resolution,
            b.orientation,
            b.index,
            b.w,
            b.h,
            b.ulx,
            b.uly,
            b.ulcx,
            b.ulcy,
            b.l2_norm
        );
    }
}

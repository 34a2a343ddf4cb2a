mod wav;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::{debug, LevelFilter};

use ape_core::tag::{read_tag, remove_tag, tag_file};
use ape_core::{
    CompressionLevel, DecodeSession, EncodeOptions, EncodeSession, Engine, TagFields, WaveFormat,
};
use ape_engines::{default_engine, select_engine, EngineConfig, EngineKind};

use wav::{looks_like_wav, WavLayout};

/// PCM chunk size used when streaming.
const DEFAULT_CHUNK: usize = 64 * 1024;

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "ape",
    about = "Monkey's Audio tool: inspect, decode, encode, and tag .ape files",
    version
)]
struct Cli {
    /// Engine to use: reference | native (default: $APE_ENGINE or reference)
    #[arg(long, global = true)]
    engine: Option<EngineKind>,
    /// Native library to load (default: $APE_LIBRARY_PATH or MACDll64/MACDll32)
    #[arg(long, global = true)]
    library: Option<PathBuf>,
    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print stream facts of a compressed file
    Info {
        file: PathBuf,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Decode a compressed file to PCM
    Decode {
        /// Source .ape file
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
        /// Wrap the PCM in the WAV header and trailer the file was made from
        #[arg(long)]
        wav: bool,
        /// Bytes requested per read
        #[arg(long, default_value_t = DEFAULT_CHUNK)]
        chunk: usize,
        /// Start this many milliseconds into the stream
        #[arg(long)]
        start_ms: Option<u64>,
    },
    /// Encode PCM or a WAV file
    Encode {
        /// Source WAV or raw PCM file ("-" reads raw PCM from stdin)
        input: PathBuf,
        /// Destination .ape file
        output: PathBuf,
        /// Compression level: fast | normal | high | extra-high | insane, or 1000–5000
        #[arg(short, long, default_value = "normal")]
        level: CompressionLevel,
        /// Write through locked engine buffers instead of copying
        #[arg(long)]
        locked: bool,
        #[command(flatten)]
        raw: RawFormat,
    },
    /// Read or write the ID3v1 tag
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },
}

/// Format of headerless PCM input.
#[derive(Args)]
struct RawFormat {
    /// Sample rate in Hz (raw input only)
    #[arg(long)]
    rate: Option<u32>,
    /// Bits per sample (raw input only)
    #[arg(long)]
    bits: Option<u16>,
    /// Channel count (raw input only)
    #[arg(long)]
    channels: Option<u16>,
}

#[derive(Subcommand)]
enum TagAction {
    /// Write tag fields; fields left out keep their current value
    Set {
        file: PathBuf,
        #[arg(long, default_value = "")]
        artist: String,
        #[arg(long, default_value = "")]
        album: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        comment: String,
        #[arg(long, default_value = "")]
        genre: String,
        #[arg(long, default_value = "")]
        year: String,
        #[arg(long, default_value = "")]
        track: String,
        /// Replace the existing tag instead of merging into it
        #[arg(long)]
        clear: bool,
    },
    /// Print the tag
    Show { file: PathBuf },
    /// Remove the tag
    Remove { file: PathBuf },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    // RUST_LOG still wins when set
    builder.parse_default_env();
    let _ = builder.try_init();
}

fn resolve_engine(
    kind: Option<EngineKind>,
    library: Option<PathBuf>,
) -> anyhow::Result<Arc<dyn Engine>> {
    if kind.is_none() && library.is_none() {
        return default_engine();
    }
    let config = EngineConfig::from_env()?.with_overrides(kind, library);
    select_engine(&config)
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn throughput(bytes: u64, secs: f64) -> String {
    if secs <= 0.0 {
        return "-".to_string();
    }
    format!("{}/s", human_bytes((bytes as f64 / secs) as u64))
}

fn open_output(path: &Path) -> anyhow::Result<Box<dyn Write>> {
    if path.to_str() == Some("-") {
        return Ok(Box::new(io::stdout().lock()));
    }
    let file =
        File::create(path).with_context(|| format!("creating output file {:?}", path))?;
    Ok(Box::new(BufWriter::new(file)))
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_info(engine: Arc<dyn Engine>, file: PathBuf, json: bool) -> anyhow::Result<()> {
    let session = DecodeSession::open(engine.clone(), &file)
        .with_context(|| format!("opening {:?}", file))?;
    let info = session.stream_info()?;
    let tag = read_tag(engine.as_ref(), &file)?;

    if json {
        let doc = serde_json::json!({
            "file": file,
            "engine": engine.name(),
            "stream": info,
            "tag": tag,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("=== {:?} ({} engine) ===", file, engine.name());
    println!();
    println!("  channels          : {}", info.format.channels);
    println!("  sample rate       : {} Hz", info.format.sample_rate);
    println!(
        "  compression level : {}",
        CompressionLevel::from_value(info.compression_level as i32)
            .map(|l| l.to_string())
            .unwrap_or_else(|| info.compression_level.to_string())
    );
    println!("  average bitrate   : {} kbps", info.average_bitrate);
    println!("  bits per sample   : {}", info.format.bits_per_sample);
    println!("  block align       : {}", info.block_align);
    println!("  blocks per frame  : {}", info.blocks_per_frame);
    println!("  total frames      : {}", info.total_frames);
    println!("  total blocks      : {}", info.total_blocks);
    println!(
        "  compressed size   : {}",
        human_bytes(info.ape_total_bytes.max(0) as u64)
    );
    println!("  decoded size      : {}", human_bytes(session.length()));
    println!("  length            : {} ms ({} s)", info.length_ms, info.length_ms / 1000);
    println!("  file version      : {}", info.file_version);

    if let Some(tag) = tag {
        println!();
        println!("  tag:");
        print_tag(&tag);
    }
    Ok(())
}

fn run_decode(
    engine: Arc<dyn Engine>,
    input: PathBuf,
    output: PathBuf,
    wav: bool,
    chunk: usize,
    start_ms: Option<u64>,
) -> anyhow::Result<()> {
    if chunk == 0 {
        anyhow::bail!("--chunk must be at least 1 byte");
    }
    let mut session = DecodeSession::open(engine, &input)
        .with_context(|| format!("opening {:?}", input))?;
    if let Some(ms) = start_ms {
        let pos = session.seek_ms(ms)?;
        debug!("started at byte {} for {} ms", pos, ms);
    }
    let remaining = session.length() - session.position()?;

    let mut dst = open_output(&output)?;
    if wav {
        // A partial decode no longer matches the stored header
        let header = if start_ms.is_some() {
            let data_bytes = u32::try_from(remaining).unwrap_or(u32::MAX);
            session.format().wav_header(data_bytes).to_vec()
        } else {
            session.wav_header_data()?
        };
        dst.write_all(&header)?;
    }

    let t0 = Instant::now();
    let mut buf = vec![0u8; chunk];
    let mut total = 0u64;
    loop {
        let n = session.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])?;
        total += n as u64;
    }
    if wav && start_ms.is_none() {
        dst.write_all(&session.wav_terminating_data()?)?;
    }
    dst.flush()?;
    session.close();

    let elapsed = t0.elapsed().as_secs_f64();
    eprintln!("  format      : {}", session.format());
    eprintln!("  pcm size    : {}", human_bytes(total));
    eprintln!("  throughput  : {}", throughput(total, elapsed));
    eprintln!("  elapsed     : {:.3}s", elapsed);
    Ok(())
}

fn raw_format(raw: &RawFormat) -> anyhow::Result<WaveFormat> {
    match (raw.rate, raw.bits, raw.channels) {
        (Some(rate), Some(bits), Some(channels)) => Ok(WaveFormat::new(rate, bits, channels)),
        _ => anyhow::bail!("raw PCM input needs --rate, --bits and --channels"),
    }
}

fn pump(
    session: &mut EncodeSession,
    src: &mut dyn Read,
    limit: Option<u64>,
    locked: bool,
) -> anyhow::Result<u64> {
    let mut buf = vec![0u8; DEFAULT_CHUNK];
    let mut left = limit.unwrap_or(u64::MAX);
    let mut total = 0u64;
    while left > 0 {
        let want = buf.len().min(usize::try_from(left).unwrap_or(usize::MAX));
        let n = src.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        if locked {
            let accepted = session.write_locked(&buf[..n])?;
            if accepted < n {
                anyhow::bail!("engine accepted only {} of {} bytes", accepted, n);
            }
        } else {
            session.write(&buf[..n])?;
        }
        total += n as u64;
        left -= n as u64;
    }
    Ok(total)
}

fn run_encode(
    engine: Arc<dyn Engine>,
    input: PathBuf,
    output: PathBuf,
    level: CompressionLevel,
    locked: bool,
    raw: RawFormat,
) -> anyhow::Result<()> {
    let t0 = Instant::now();
    let (pcm_bytes, terminating) = if input.to_str() == Some("-") {
        let options = EncodeOptions::new(raw_format(&raw)?).with_level(level);
        let mut session = EncodeSession::create(engine, &output, &options)
            .with_context(|| format!("starting encode of {:?}", output))?;
        let stdin = io::stdin();
        let total = pump(&mut session, &mut stdin.lock(), None, locked)?;
        session.finish(&[], 0)?;
        (total, 0)
    } else {
        let mut file =
            File::open(&input).with_context(|| format!("opening input file {:?}", input))?;
        let mut prefix = [0u8; 12];
        let is_wav = match file.read_exact(&mut prefix) {
            Ok(()) => looks_like_wav(&prefix),
            Err(_) => false,
        };
        file.seek(SeekFrom::Start(0))?;

        if is_wav {
            let layout = WavLayout::read(&mut file)
                .with_context(|| format!("parsing WAV file {:?}", input))?;
            debug!(
                "{:?}: {} payload bytes at {}, {} trailing",
                input, layout.data_len, layout.data_offset, layout.trailer_len
            );
            let options = EncodeOptions::new(layout.format)
                .with_level(level)
                .with_max_audio_bytes(layout.data_len)
                .with_header(layout.header.clone());
            let mut session = EncodeSession::create(engine, &output, &options)
                .with_context(|| format!("starting encode of {:?}", output))?;

            file.seek(SeekFrom::Start(layout.data_offset))?;
            let mut src = BufReader::new(&mut file);
            let total = pump(&mut session, &mut src, Some(layout.data_len), locked)?;
            drop(src);

            let mut trailer = Vec::with_capacity(layout.trailer_len as usize);
            file.seek(SeekFrom::Start(layout.trailer_offset()))?;
            file.read_to_end(&mut trailer)?;
            session.finish(&trailer, trailer.len())?;
            (total, trailer.len())
        } else {
            let format = raw_format(&raw)?;
            let len = file.metadata()?.len();
            let options = EncodeOptions::new(format)
                .with_level(level)
                .with_max_audio_bytes(len);
            let mut session = EncodeSession::create(engine, &output, &options)
                .with_context(|| format!("starting encode of {:?}", output))?;
            let total = pump(&mut session, &mut BufReader::new(file), None, locked)?;
            session.finish(&[], 0)?;
            (total, 0)
        }
    };

    let elapsed = t0.elapsed().as_secs_f64();
    let compressed = std::fs::metadata(&output)?.len();
    eprintln!("  level       : {}", level);
    eprintln!("  pcm size    : {}", human_bytes(pcm_bytes));
    eprintln!("  trailer     : {}", human_bytes(terminating as u64));
    eprintln!("  compressed  : {}", human_bytes(compressed));
    if compressed > 0 {
        eprintln!("  ratio       : {:.2}x", pcm_bytes as f64 / compressed as f64);
    }
    eprintln!("  throughput  : {}", throughput(pcm_bytes, elapsed));
    eprintln!("  elapsed     : {:.3}s", elapsed);
    Ok(())
}

fn print_tag(tag: &TagFields) {
    let rows = [
        ("title", &tag.title),
        ("artist", &tag.artist),
        ("album", &tag.album),
        ("year", &tag.year),
        ("track", &tag.track),
        ("genre", &tag.genre),
        ("comment", &tag.comment),
    ];
    for (name, value) in rows {
        if !value.is_empty() {
            println!("    {:<8}: {}", name, value);
        }
    }
}

fn run_tag(engine: Arc<dyn Engine>, action: TagAction) -> anyhow::Result<()> {
    match action {
        TagAction::Set {
            file,
            artist,
            album,
            title,
            comment,
            genre,
            year,
            track,
            clear,
        } => {
            let fields = TagFields {
                artist,
                album,
                title,
                comment,
                genre,
                year,
                track,
            };
            tag_file(engine.as_ref(), &file, &fields, clear)
                .with_context(|| format!("tagging {:?}", file))?;
            eprintln!("tag written to {:?}", file);
        }
        TagAction::Show { file } => match read_tag(engine.as_ref(), &file)? {
            Some(tag) => print_tag(&tag),
            None => println!("{:?} has no tag", file),
        },
        TagAction::Remove { file } => {
            remove_tag(engine.as_ref(), &file)
                .with_context(|| format!("removing tag from {:?}", file))?;
            eprintln!("tag removed from {:?}", file);
        }
    }
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let engine = resolve_engine(cli.engine, cli.library)?;
    debug!("using {} engine, version {}", engine.name(), engine.version());

    match cli.command {
        Commands::Info { file, json } => run_info(engine, file, json),
        Commands::Decode {
            input,
            output,
            wav,
            chunk,
            start_ms,
        } => run_decode(engine, input, output, wav, chunk, start_ms),
        Commands::Encode {
            input,
            output,
            level,
            locked,
            raw,
        } => run_encode(engine, input, output, level, locked, raw),
        Commands::Tag { action } => run_tag(engine, action),
    }
}

#![doc = include_str!("../README.md")]

use clap::Parser;
use pph::keyfn;
use pph::rng::XorShift1024Star;
use pph::{BuildConf, Table};
use rayon::prelude::*;

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::{SystemTime, UNIX_EPOCH};

/// Order-preserving perfect hash table generator.
///
/// Builds a table from newline-delimited key files and writes it in the
/// textual table format; alternatively verifies an existing table file or
/// prints the primary bucket of every input key.
#[derive(Parser)]
#[command(version, about)]
struct Conf {
    /// Key files, one key per line; a blank line ends a file's input
    #[arg(value_name = "FILE")]
    input: Vec<PathBuf>,

    /// Configuration file with `key = value` lines
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Path of the table output file
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Load the given table file and re-look-up every stored key
    #[arg(long, value_name = "TABLE")]
    verify: Option<PathBuf>,

    /// UUID of the key hash function
    #[arg(short = 'U', long)]
    uuid: Option<String>,

    /// Loading factor; giving it selects the exact header-array sizing
    #[arg(short = 'P', long)]
    p: Option<f64>,

    /// Budget of the per-bucket hash search, in milliseconds
    #[arg(short = 'T', long)]
    timeout: Option<u64>,

    /// Seed of the candidate generator; drawn from the clock when absent
    #[arg(short = 'S', long)]
    seed: Option<u64>,

    /// Multiplier of the key hash function
    #[arg(short = 'M', long)]
    multiplier: Option<u64>,

    /// Adjustment added by the key hash function
    #[arg(short = 'A', long)]
    adjustment: Option<u64>,

    /// Number of leading input rows to skip
    #[arg(long)]
    skip: Option<u64>,

    /// Maximum number of rows to read; 0 reads everything
    #[arg(long)]
    rows: Option<u64>,

    /// Print `key  bucket` for every input key instead of building
    #[arg(long)]
    index: bool,
}

/// Merges `key = value` lines of the file at `path` into options the command
/// line left unset.
fn apply_config(conf: &mut Conf, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    for (nr, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("line {}: expected key = value", nr + 1).into());
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "uuid" => {
                conf.uuid.get_or_insert_with(|| value.to_string());
            }
            "p" => {
                conf.p.get_or_insert(value.parse()?);
            }
            "timeout" => {
                conf.timeout.get_or_insert(value.parse()?);
            }
            "seed" => {
                conf.seed.get_or_insert(value.parse()?);
            }
            "multiplier" => {
                conf.multiplier.get_or_insert(value.parse()?);
            }
            "adjustment" => {
                conf.adjustment.get_or_insert(value.parse()?);
            }
            "skip" => {
                conf.skip.get_or_insert(value.parse()?);
            }
            "rows" => {
                conf.rows.get_or_insert(value.parse()?);
            }
            _ => return Err(format!("line {}: unknown option {key:?}", nr + 1).into()),
        }
    }
    Ok(())
}

/// Reads the keys of all `paths` in order, trimmed, honouring the skip/rows
/// window. A blank line ends a file's input.
fn read_keys(paths: &[PathBuf], skip: u64, rows: u64) -> io::Result<Vec<Box<[u8]>>> {
    let mut keys = Vec::new();
    let mut line_nr = 0u64;
    for path in paths {
        let reader = BufReader::new(File::open(path)?);
        for line in reader.lines() {
            let line = line?;
            let key = line.trim();
            if key.is_empty() {
                break;
            }
            if line_nr < skip {
                line_nr += 1;
                continue;
            }
            line_nr += 1;
            keys.push(key.as_bytes().to_vec().into_boxed_slice());
            if rows > 0 && keys.len() as u64 >= rows {
                return Ok(keys);
            }
        }
    }
    Ok(keys)
}

/// Seed drawn from the clock, for runs that do not pin one.
fn clock_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as u64);
    XorShift1024Star::new(nanos).next()
}

fn verify_table(path: &Path) -> ! {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Cannot open table file {}: {e}", path.display());
            exit(1);
        }
    };
    let table = match Table::read(&mut BufReader::new(file)) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("Error loading table from {}: {e}", path.display());
            exit(-1);
        }
    };
    let missing = table
        .keys()
        .par_iter()
        .filter(|key| Table::not_found(table.find_val(key)))
        .count();
    if missing != 0 {
        eprintln!("{missing} stored keys failed re-lookup in {}", path.display());
        exit(-1);
    }
    println!("Hash function verified; loaded from {}", path.display());
    exit(0);
}

fn main() {
    env_logger::init();
    let mut conf = Conf::parse();

    if let Some(path) = conf.config.clone() {
        if let Err(e) = apply_config(&mut conf, &path) {
            eprintln!("Error in config file {}: {e}", path.display());
            exit(1);
        }
    }

    if let Some(path) = conf.verify.clone() {
        verify_table(&path);
    }

    if conf.input.is_empty() {
        eprintln!("No input files given.");
        exit(1);
    }

    let keys = match read_keys(&conf.input, conf.skip.unwrap_or(0), conf.rows.unwrap_or(0)) {
        Ok(keys) => keys,
        Err(e) => {
            eprintln!("Error reading keys: {e}");
            exit(1);
        }
    };

    let build = BuildConf {
        loading_factor: conf.p.unwrap_or(pph::DEFAULT_LOADING_FACTOR),
        exact_loading: conf.p.is_some(),
        timeout_ms: conf.timeout.unwrap_or(pph::DEFAULT_TIMEOUT_MS),
        seed: conf.seed.unwrap_or_else(clock_seed),
        multiplier: conf.multiplier.unwrap_or(pph::HASH_MULTIPLIER),
        adjustment: conf.adjustment.unwrap_or(0),
        uuid: conf.uuid.clone().unwrap_or_else(|| keyfn::DJB_UUID.to_string()),
    };

    let mut table = Table::new();
    table.setup(keys.len() as u64, &build);

    if conf.index {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        for key in &keys {
            if let Err(e) = writeln!(out, "{} {}", String::from_utf8_lossy(key), table.bucket(key)) {
                eprintln!("Error writing index: {e}");
                exit(1);
            }
        }
        return;
    }

    log::info!("building table for {} keys with seed {}", keys.len(), build.seed);
    let values: Vec<u64> = (0..keys.len() as u64).collect();
    if let Err(e) = table.load(keys, &values) {
        eprintln!("Loading table failed: {e}");
        exit(-1);
    }

    let output = match File::create(&conf.output) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Cannot create output file {}: {e}", conf.output.display());
            exit(1);
        }
    };
    let mut writer = BufWriter::new(output);
    if let Err(e) = table.write(&mut writer).and_then(|()| writer.flush()) {
        eprintln!("Error writing table to {}: {e}", conf.output.display());
        exit(-1);
    }

    println!(
        "Hash function generated and verified; written to {}",
        conf.output.display()
    );
}

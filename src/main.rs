use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    thread::scope,
};

use clap::{AppSettings, Parser};
use crossbeam_channel::bounded;
use crossbeam_utils::atomic::AtomicCell;
use hifitime::Duration;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};
use thiserror::Error;

use vis_frame_convert::{
    convert::{convert_with_global, DEFAULT_CHUNK_LEN},
    open_dataset,
    read::{keys, ReadError},
    ConvertError, ConvertOptions, Converted, DatasetRead, ErfaAstrometry, Partition, PartitionKey,
    SpectralFrame, TargetPolicy, VisInputType,
};

#[derive(Parser)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_long_args = true)]
struct Args {
    /// The measurement set or uvfits file whose channel frequencies are
    /// converted.
    data: PathBuf,

    /// The data descriptions (spectral windows) to convert. All of them are
    /// converted by default.
    #[clap(short, long, multiple_values(true))]
    ddi: Option<Vec<usize>>,

    /// The spectral frame to convert into.
    #[clap(long, default_value = "LSRK")]
    to: SpectralFrame,

    /// The spectral frame of the data. By default this is read from the data,
    /// and assumed to be TOPO if it isn't there.
    #[clap(long)]
    from: Option<SpectralFrame>,

    /// The observatory to assume if the data doesn't say where it was
    /// observed. Without this, the centre of the Earth is used.
    #[clap(long)]
    site: Option<String>,

    /// UT1 - UTC [seconds].
    #[clap(long, default_value = "0.0", allow_hyphen_values = true)]
    dut1: f64,

    /// The number of channels converted by each parallel task.
    #[clap(long, default_value_t = DEFAULT_CHUNK_LEN)]
    chunk_len: usize,

    /// Refuse to convert if the target's direction, frame and velocity don't
    /// all come from the data.
    #[clap(long)]
    require_consistent_target: bool,

    /// Write the converted frequencies to this file. Without this, only a
    /// summary is printed.
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences))]
    verbosity: u8,

    /// Disable progress bars.
    #[clap(long)]
    no_progress_bars: bool,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("Couldn't write {}: {source}", file.display())]
    Write {
        file: PathBuf,
        source: std::io::Error,
    },

    #[error("A worker thread panicked")]
    WorkerPanic,
}

fn main() {
    let args = Args::parse();
    setup_logging(args.verbosity);

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), CliError> {
    info!("Input type: {:?}", VisInputType::from_path(&args.data)?);
    let dataset = open_dataset(&args.data)?;

    let options = ConvertOptions {
        to_frame: args.to,
        from_frame: args.from,
        chunk_len: args.chunk_len,
        default_site: args.site.clone(),
        dut1: Duration::from_seconds(args.dut1),
        target_policy: if args.require_consistent_target {
            TargetPolicy::RequireConsistent
        } else {
            TargetPolicy::IndependentDefaults
        },
        ..Default::default()
    };
    options.validate()?;

    let partition_keys: Vec<PartitionKey> = match &args.ddi {
        Some(ddis) => {
            let mut ddis = ddis.clone();
            ddis.sort_unstable();
            ddis.dedup();
            ddis.into_iter().map(PartitionKey::Ddi).collect()
        }
        None => dataset
            .partition_keys()
            .into_iter()
            .filter(|k| *k != PartitionKey::Global)
            .collect(),
    };
    info!(
        "Converting {} partition(s) to {}",
        partition_keys.len(),
        options.to_frame
    );
    let global = dataset.read(PartitionKey::Global)?;

    let progress_target = if args.no_progress_bars {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stdout()
    };
    let converted = convert_pipelined(
        dataset.as_ref(),
        &partition_keys,
        &global,
        &options,
        progress_target,
    )?;

    for c in &converted {
        report(c);
    }
    if let Some(output) = &args.output {
        write_frequencies(output, &options, &converted).map_err(|source| CliError::Write {
            file: output.clone(),
            source,
        })?;
        info!("Wrote converted frequencies to {}", output.display());
    }
    Ok(())
}

/// Read partitions on one thread and convert them on another, stopping both as
/// soon as either fails.
fn convert_pipelined(
    dataset: &dyn DatasetRead,
    partition_keys: &[PartitionKey],
    global: &Partition,
    options: &ConvertOptions,
    progress_target: ProgressDrawTarget,
) -> Result<Vec<Converted>, CliError> {
    let (tx, rx) = bounded::<Partition>(2);
    let error = AtomicCell::new(false);
    let multi_progress = MultiProgress::with_draw_target(progress_target);
    let style = ProgressStyle::default_bar()
        .template("{msg:17}: [{wide_bar:.blue}] {pos:2}/{len:2} partitions ({elapsed_precise}<{eta_precise})")
        .expect("progress bar template is valid")
        .progress_chars("=> ");
    let read_progress = multi_progress.add(
        ProgressBar::new(partition_keys.len() as _)
            .with_style(style.clone())
            .with_position(0)
            .with_message("Reading"),
    );
    let convert_progress = multi_progress.add(
        ProgressBar::new(partition_keys.len() as _)
            .with_style(style)
            .with_position(0)
            .with_message("Converting"),
    );
    read_progress.tick();
    convert_progress.tick();

    let (read_result, convert_result) = scope(|s| {
        let reader = s.spawn(|| {
            for &key in partition_keys {
                if error.load() {
                    break;
                }
                debug!("Reading {key}");
                match dataset.read(key) {
                    Ok(partition) => {
                        // The converter has hung up; it will report why.
                        if tx.send(partition).is_err() {
                            break;
                        }
                        read_progress.inc(1);
                    }
                    Err(e) => {
                        error.store(true);
                        return Err(CliError::from(e));
                    }
                }
            }
            drop(tx);
            read_progress.abandon_with_message("Finished reading");
            Ok(())
        });

        let converter = s.spawn(|| {
            // Dropping the receiver on return unblocks the reader.
            let rx = rx;
            let mut converted = Vec::with_capacity(partition_keys.len());
            for partition in rx.iter() {
                if error.load() {
                    break;
                }
                match convert_with_global(&partition, global, &ErfaAstrometry, options) {
                    Ok(c) => {
                        converted.push(c);
                        convert_progress.inc(1);
                    }
                    Err(e) => {
                        error.store(true);
                        return Err(CliError::from(e));
                    }
                }
            }
            convert_progress.abandon_with_message("Finished converting");
            Ok(converted)
        });

        (
            reader.join().map_err(|_| CliError::WorkerPanic),
            converter.join().map_err(|_| CliError::WorkerPanic),
        )
    });
    read_result??;
    convert_result?
}

fn report(converted: &Converted) {
    let p = &converted.partition;
    info!(
        "{}: {} -> {}, ratio {:.12} (reference time {})",
        p.key,
        converted.context.from_frame.value(),
        converted.to_frame,
        converted.ratio,
        p.get_str(keys::REFERENCE_TIME).unwrap_or("?"),
    );
    let defaulted = converted.context.defaulted();
    if !defaulted.is_empty() {
        warn!("{}: defaults were used for: {}", p.key, defaulted.join(", "));
    }
}

/// One line per value: the partition, the value's index, and the value.
fn write_frequencies(
    output: &std::path::Path,
    options: &ConvertOptions,
    converted: &[Converted],
) -> Result<(), std::io::Error> {
    let mut f = BufWriter::new(File::create(output)?);
    writeln!(f, "# {} in {}", options.variable, options.to_frame)?;
    for c in converted {
        let p = &c.partition;
        writeln!(
            f,
            "# {}: from {} with ratio {}",
            p.key,
            p.get_str(keys::FRAME_CONVERSION_FROM).unwrap_or("?"),
            c.ratio
        )?;
        if let Some(values) = p.get_floats(&options.variable) {
            for (i, v) in values.iter().enumerate() {
                writeln!(f, "{}\t{i}\t{v}", p.key)?;
            }
        }
    }
    f.flush()
}

fn setup_logging(verbosity: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        2 => builder.filter_level(log::LevelFilter::Trace),
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
            builder.format(|buf, record| {
                let timestamp = buf.timestamp();
                let level = record.level();
                let target = record.target();
                let line = record.line().unwrap_or(0);
                let message = record.args();

                writeln!(buf, "[{timestamp} {level} {target}:{line}] {message}")
            })
        }
    };
    builder.init();
}

#[cfg(test)]
mod tests {
    use hifitime::Epoch;
    use ndarray::prelude::*;
    use tempfile::tempdir;

    use vis_frame_convert::{convert_all, InMemoryDataset};

    use super::*;

    #[test]
    fn test_write_frequencies() {
        let global = Partition::new(PartitionKey::Global)
            .with_attr(keys::TELESCOPE_NAME, "MWA")
            .with_attr(keys::PHASE_DIR, vec![0.0, -0.5])
            .with_attr(keys::SRC_SYSVEL, 0.0);
        let ddi = Partition::new(PartitionKey::Ddi(0))
            .with_var(
                keys::CHAN_FREQ,
                &[keys::CHAN_DIM],
                Array::linspace(150e6, 151e6, 5).into_dyn(),
            )
            .unwrap();
        let data = InMemoryDataset::new()
            .with_partition(global)
            .with_partition(ddi);
        let options = ConvertOptions {
            now: Some(Epoch::from_gregorian_utc_at_midnight(2024, 1, 1)),
            ..Default::default()
        };
        let converted = convert_all(&data, &ErfaAstrometry, &options).unwrap();

        let dir = tempdir().unwrap();
        let output = dir.path().join("freqs.tsv");
        write_frequencies(&output, &options, &converted).unwrap();

        let contents = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2 + 5);
        assert_eq!(lines[0], "# chan_freq in LSRK");
        assert!(lines[1].starts_with("# ddi_0: from TOPO"));
        let fields: Vec<&str> = lines[2].split('\t').collect();
        assert_eq!(fields[..2], ["ddi_0", "0"]);
        let value: f64 = fields[2].parse().unwrap();
        assert!((value / 150e6 - converted[0].ratio).abs() < 1e-12);
    }

    fn pipeline_dataset(num_ddis: usize) -> InMemoryDataset {
        let mut data = InMemoryDataset::new().with_partition(
            Partition::new(PartitionKey::Global)
                .with_attr(keys::TELESCOPE_NAME, "MWA")
                .with_attr(keys::TIME, 5.0e9)
                .with_attr(keys::PHASE_DIR, vec![0.0, -0.5])
                .with_attr(keys::SRC_SYSVEL, 0.0),
        );
        for ddi in 0..num_ddis {
            data.insert(
                Partition::new(PartitionKey::Ddi(ddi))
                    .with_attr(keys::MEAS_FREQ_REF, "TOPO")
                    .with_var(
                        keys::CHAN_FREQ,
                        &[keys::CHAN_DIM],
                        Array::linspace(150e6, 151e6, 16).into_dyn(),
                    )
                    .unwrap(),
            );
        }
        data
    }

    #[test]
    fn test_pipeline_converts_in_order() {
        let data = pipeline_dataset(5);
        let keys: Vec<PartitionKey> = (0..5).map(PartitionKey::Ddi).collect();
        let global = data.read(PartitionKey::Global).unwrap();
        let converted = convert_pipelined(
            &data,
            &keys,
            &global,
            &ConvertOptions::default(),
            ProgressDrawTarget::hidden(),
        )
        .unwrap();
        let got: Vec<PartitionKey> = converted.iter().map(|c| c.partition.key).collect();
        assert_eq!(got, keys);
    }

    #[test]
    fn test_pipeline_stops_when_conversion_fails() {
        // The first partition can't be converted, and there are more
        // partitions waiting than the channel holds.
        let mut data = pipeline_dataset(8);
        data.insert(Partition::new(PartitionKey::Ddi(0)));
        let keys: Vec<PartitionKey> = (0..8).map(PartitionKey::Ddi).collect();
        let global = data.read(PartitionKey::Global).unwrap();
        let result = convert_pipelined(
            &data,
            &keys,
            &global,
            &ConvertOptions::default(),
            ProgressDrawTarget::hidden(),
        );
        assert!(matches!(
            result,
            Err(CliError::Convert(ConvertError::MissingVariable { .. }))
        ));
    }
}

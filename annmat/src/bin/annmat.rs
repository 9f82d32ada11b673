use annmat::{
    concat_with_report, io, parse_positions, parse_range, Axis, BatchKey, ConcatOptions, Join, MergeStrategy,
    Selector, Uniqueness,
};
use clap::{Parser, Subcommand, ValueEnum};
use flexi_logger::Logger;
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, long_about = None)]
#[command(about = "annmat CLI - select, concatenate and inspect annotated matrix files")]
struct Cli {
    /// Log level for stderr output (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a selection of a file to a new file
    Select {
        input: PathBuf,
        output: PathBuf,

        /// Rows as `start:end`, `2,0,1` or comma separated labels.
        /// All-digit lists are positions; prefix with `@` to force labels (`@1,2`)
        #[arg(long)]
        rows: Option<String>,

        /// Columns, parsed like `--rows`
        #[arg(long)]
        cols: Option<String>,

        /// Rows per chunk read from disk
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Concatenate files along one axis
    Concat {
        output: PathBuf,

        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,

        #[arg(long, value_enum, default_value_t = AxisArg::Rows)]
        axis: AxisArg,

        #[arg(long, value_enum, default_value_t = JoinArg::Inner)]
        join: JoinArg,

        /// Merge strategy for metadata not stacked along the axis
        #[arg(long, value_enum, default_value_t = MergeArg::Same)]
        merge: MergeArg,

        #[arg(long, value_enum, default_value_t = UniqueArg::Keep)]
        unique: UniqueArg,

        /// Record each input's file stem in this categorical column
        #[arg(long)]
        batch_key: Option<String>,
    },
    /// Show the layout of a file
    Info { input: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum AxisArg {
    Rows,
    Cols,
}

#[derive(Clone, Copy, ValueEnum)]
enum JoinArg {
    Inner,
    Outer,
}

#[derive(Clone, Copy, ValueEnum)]
enum MergeArg {
    Same,
    Unique,
    First,
    Drop,
}

#[derive(Clone, Copy, ValueEnum)]
enum UniqueArg {
    Keep,
    PerInput,
    Global,
}

/// `@labels`, `start:end`, a position list, or labels, in that order
fn selector(spec: Option<&str>) -> Selector {
    let Some(spec) = spec else {
        return Selector::All;
    };
    if let Some(labels) = spec.strip_prefix('@') {
        return Selector::labels(labels.split(',').map(str::trim));
    }
    if spec.contains(':') {
        if let Ok(range) = parse_range(spec) {
            return Selector::Range(range);
        }
    }
    match parse_positions(spec) {
        Ok(positions) => Selector::Positions(positions),
        Err(_) => Selector::labels(spec.split(',').map(str::trim)),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let _logger = Logger::try_with_str(&cli.log_level)?.log_to_stderr().start()?;
    let start_time = std::time::Instant::now();

    match &cli.command {
        Commands::Select {
            input,
            output,
            rows,
            cols,
            chunk_size,
        } => {
            let mut data = io::open(input)?;
            if let Some(chunk_size) = chunk_size {
                let options = data.read_options().clone().with_chunk_size(*chunk_size);
                data.set_read_options(options);
            }
            let view = data.select(selector(rows.as_deref()), selector(cols.as_deref()))?;
            view.write(output)?;
            println!(
                "Wrote {}x{} selection to {}",
                view.n_obs(),
                view.n_vars(),
                output.display()
            );
        }
        Commands::Concat {
            output,
            inputs,
            axis,
            join,
            merge,
            unique,
            batch_key,
        } => {
            let opened = inputs.iter().map(io::open).collect::<Result<Vec<_>, _>>()?;
            let refs: Vec<_> = opened.iter().collect();

            let axis = match axis {
                AxisArg::Rows => Axis::Rows,
                AxisArg::Cols => Axis::Cols,
            };
            let join = match join {
                JoinArg::Inner => Join::Inner,
                JoinArg::Outer => Join::Outer,
            };
            let merge = match merge {
                MergeArg::Same => MergeStrategy::Same,
                MergeArg::Unique => MergeStrategy::Unique,
                MergeArg::First => MergeStrategy::First,
                MergeArg::Drop => MergeStrategy::Drop,
            };
            let uniqueness = match unique {
                UniqueArg::Keep => Uniqueness::Keep,
                UniqueArg::PerInput => Uniqueness::PerInput,
                UniqueArg::Global => Uniqueness::Global,
            };
            let mut options = ConcatOptions::new(axis, join)
                .with_merge(merge)
                .with_uniqueness(uniqueness);
            if let Some(column) = batch_key {
                let keys = inputs.iter().map(|path| {
                    path.file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                        .unwrap_or_default()
                });
                options = options.with_batch(BatchKey::new(column.clone(), keys));
            }

            let (merged, report) = concat_with_report(&refs, &options)?;
            merged.write(output)?;
            println!(
                "Wrote {}x{} from {} inputs to {}",
                merged.n_obs(),
                merged.n_vars(),
                inputs.len(),
                output.display()
            );
            if !report.dropped_layers.is_empty() {
                println!("  dropped layers: {}", report.dropped_layers.join(", "));
            }
            if !report.dropped_annotations.is_empty() {
                println!("  dropped annotations: {}", report.dropped_annotations.join(", "));
            }
            if !report.duplicate_labels.is_empty() {
                println!("  duplicate labels: {}", report.duplicate_labels.len());
            }
        }
        Commands::Info { input } => {
            let data = io::open(input)?;
            println!("File: {}", input.display());
            println!("  Shape: {} obs x {} vars", data.n_obs(), data.n_vars());
            if let Some((format, dtype)) = data.x_format() {
                println!("  X: {format} {dtype}");
            }
            println!("  Layers: {}", data.layer_names().join(", "));
            println!("  obs columns: {}", data.obs().column_names().join(", "));
            println!("  var columns: {}", data.var().column_names().join(", "));
            println!("  obsm: {}", data.obsm_names().join(", "));
            println!("  varm: {}", data.varm_names().join(", "));
            let uns: Vec<&str> = data.uns().keys().map(String::as_str).collect();
            println!("  uns: {}", uns.join(", "));
            let duplicates = data.duplicate_obs_names().len() + data.duplicate_var_names().len();
            if duplicates > 0 {
                println!("  duplicate labels: {duplicates}");
            }
        }
    }

    info!("completed in {:.2?}", start_time.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_precedence() {
        assert!(matches!(selector(None), Selector::All));
        assert!(matches!(selector(Some("2:5")), Selector::Range(r) if r == (2..5)));
        assert!(matches!(selector(Some("1,2")), Selector::Positions(p) if p == vec![1, 2]));
        assert!(matches!(selector(Some("@1,2")), Selector::Labels(l) if l == vec!["1", "2"]));
        assert!(matches!(selector(Some("a, b")), Selector::Labels(l) if l == vec!["a", "b"]));
    }
}

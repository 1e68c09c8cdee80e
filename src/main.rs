use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uccprofile::{
    Correspondence, DuplicateDetector, InclusionProfiler, Measure, ProfilerConfig, ReadOptions,
    Relation, SchemaMatcher, SimilarityMatrix, UccProfiler,
};

/// Discover minimal unique column combinations in delimited text files.
#[derive(Parser, Debug)]
#[command(name = "uccprofile", version)]
struct Args {
    /// Files to profile. `.tsv` files are read as tab-separated, everything else as CSV.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Field delimiter for every input, e.g. `;` or `tab`
    #[arg(short, long, value_parser = parse_delimiter)]
    delimiter: Option<u8>,

    /// The first record holds data, not attribute names
    #[arg(long)]
    no_header: bool,

    /// Worker threads per lattice level (default: one per CPU)
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Largest column combination to check
    #[arg(long)]
    max_level: Option<usize>,

    /// Don't start another lattice level after this many seconds
    #[arg(long, value_name = "SECONDS")]
    time_limit: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Also report unary inclusion dependencies between all input columns
    #[arg(long)]
    inclusion: bool,

    /// Also report near-duplicate rows of each input, closed under transitivity
    #[arg(long)]
    duplicates: bool,

    /// Also match the attributes of every pair of inputs
    #[arg(long)]
    schema_match: bool,

    /// String similarity for duplicate detection and attribute name matching
    #[arg(long, value_enum, default_value_t = MeasureArg::Levenshtein)]
    measure: MeasureArg,

    /// Mean cell similarity at which two rows count as duplicates
    #[arg(long, default_value_t = 0.9)]
    threshold: f64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MeasureArg {
    /// Edit distance
    Levenshtein,
    /// Edit distance counting adjacent swaps as one edit
    Damerau,
    /// Jaccard over character bigrams
    Jaccard,
    /// Jaccard over character bigrams, counting repeats
    BagJaccard,
    /// MinHash estimate of bigram Jaccard
    MinHash,
}

impl From<MeasureArg> for Measure {
    fn from(arg: MeasureArg) -> Self {
        match arg {
            MeasureArg::Levenshtein => Measure::Levenshtein,
            MeasureArg::Damerau => Measure::Damerau,
            MeasureArg::Jaccard => Measure::Jaccard,
            MeasureArg::BagJaccard => Measure::BagJaccard,
            MeasureArg::MinHash => Measure::MinHash,
        }
    }
}

#[derive(Serialize)]
struct DuplicateLine<'r> {
    relation: &'r str,
    first: usize,
    second: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// One line per result
    Text,
    /// One JSON object per line
    Json,
}

fn parse_delimiter(s: &str) -> Result<u8, String> {
    match s {
        "tab" | "\\t" => Ok(b'\t'),
        _ => match s.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(format!("expected a single-byte delimiter, got {:?}", s)),
        },
    }
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();

    let mut options = ReadOptions::default().has_header(!args.no_header);
    if let Some(delimiter) = args.delimiter {
        options = options.delimiter(delimiter);
    }

    let relations = args
        .inputs
        .iter()
        .map(|path| {
            let relation = Relation::open(path, &options)
                .with_context(|| format!("reading {}", path.display()))?;
            info!(
                relation = relation.name(),
                rows = relation.row_count(),
                columns = relation.column_count(),
                "loaded"
            );
            Ok(relation)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut config = ProfilerConfig::default()
        .max_level(args.max_level)
        .time_limit(args.time_limit.map(Duration::from_secs));
    if let Some(threads) = args.threads {
        config = config.threads(threads);
    }
    let profiler = UccProfiler::new(config);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    for relation in relations.iter() {
        let profile = profiler
            .profile::<u16>(relation)
            .with_context(|| format!("profiling {}", relation.name()))?;

        match args.format {
            Format::Text => {
                writeln!(
                    out,
                    "{}: {} rows, {} columns, {} minimal unique column combinations",
                    relation.name(),
                    relation.row_count(),
                    relation.column_count(),
                    profile.uccs().len()
                )?;
                for ucc in profile.uccs() {
                    writeln!(out, "  {}", ucc)?;
                }
                if !profile.is_complete() {
                    writeln!(out, "  (incomplete: {})", profile.stop())?;
                }
            }
            Format::Json => {
                for ucc in profile.uccs() {
                    write_json(&mut out, &ucc.to_record())?;
                }
            }
        }
    }

    if args.inclusion {
        let relations: Vec<&Relation> = relations.iter().collect();
        let dependencies = InclusionProfiler::default().profile(&relations);
        match args.format {
            Format::Text => {
                writeln!(out, "{} inclusion dependencies", dependencies.len())?;
                for dependency in dependencies.iter() {
                    writeln!(out, "  {}", dependency)?;
                }
            }
            Format::Json => {
                for dependency in dependencies.iter() {
                    write_json(&mut out, &dependency.to_record())?;
                }
            }
        }
    }

    let measure = Measure::from(args.measure).build();

    if args.duplicates {
        let detector = DuplicateDetector::new(measure.as_ref(), args.threshold);
        for relation in relations.iter() {
            let duplicates = detector.resolve(relation);
            match args.format {
                Format::Text => {
                    writeln!(
                        out,
                        "{}: {} duplicate row pairs",
                        relation.name(),
                        duplicates.len()
                    )?;
                    for duplicate in duplicates.iter() {
                        writeln!(out, "  rows {} and {}", duplicate.first, duplicate.second)?;
                    }
                }
                Format::Json => {
                    for duplicate in duplicates.iter() {
                        let line = DuplicateLine {
                            relation: relation.name(),
                            first: duplicate.first,
                            second: duplicate.second,
                        };
                        write_json(&mut out, &line)?;
                    }
                }
            }
        }
    }

    if args.schema_match {
        let matcher = SchemaMatcher::default();
        for (i, source) in relations.iter().enumerate() {
            for target in relations[i + 1..].iter() {
                let names = SimilarityMatrix::of_names(source, target, measure.as_ref());
                let values = SimilarityMatrix::of_values(source, target);
                let similarities = names.average(&values)?;
                let matching = matcher.match_attributes(&similarities);
                let correspondences =
                    Correspondence::resolve(source, target, &similarities, &matching);
                match args.format {
                    Format::Text => {
                        writeln!(
                            out,
                            "{} ~ {}: {} attribute correspondences",
                            source.name(),
                            target.name(),
                            correspondences.len()
                        )?;
                        for correspondence in correspondences.iter() {
                            writeln!(out, "  {}", correspondence)?;
                        }
                    }
                    Format::Json => {
                        for correspondence in correspondences.iter() {
                            write_json(&mut out, &correspondence.to_record())?;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

//! Mako CLI: microbial association network catalogue.
//!
//! Usage:
//!   mako import <files>... [--name NAME] [--db path]
//!   mako import-table --counts otus.tsv [--taxonomy tax.tsv] [--samples meta.tsv]
//!   mako attach --sequences seqs/ --rank otu
//!   mako associate soil --property pH
//!   mako networks
//!   mako intersection net1 net2 [--output shared.graphml]

use clap::{Parser, Subcommand};
use mako::export::{self, ExportView};
use mako::{
    AggregateOptions, AssociationOptions, AttachReport, Catalogue, DuplicatePolicy, ImportOutcome, ImportResult,
    IntersectionOptions, MakoConfig, MakoError, Rank, TabTablePaths, WeightMerge,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mako", version, about = "Microbial association network catalogue")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Path to a YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import network files as one network
    Import {
        /// Edge lists (.tsv, .txt, .csv) and BIOM tables (.biom, .json)
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Network name; defaults to the first file's stem
        #[arg(long)]
        name: Option<String>,
        /// What to do when the same source was imported before: skip, version or error
        #[arg(long)]
        on_duplicate: Option<DuplicatePolicy>,
        /// Rows written per flush
        #[arg(long)]
        batch_size: Option<usize>,
        /// Rank for taxa without one
        #[arg(long)]
        rank_default: Option<Rank>,
        /// Extra provenance parameters as key=value
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
    /// Import a tab-delimited count table with optional sidecar tables
    ImportTable {
        /// Taxa by samples count table, optionally with a trailing taxonomy column
        #[arg(long)]
        counts: PathBuf,
        /// Taxonomy per taxon, as one lineage column or one column per rank
        #[arg(long)]
        taxonomy: Option<PathBuf>,
        /// Metadata per sample
        #[arg(long)]
        samples: Option<PathBuf>,
        /// Properties per taxon
        #[arg(long)]
        taxon_meta: Option<PathBuf>,
        /// Network name; defaults to the count table's stem
        #[arg(long)]
        name: Option<String>,
    },
    /// Attach properties to stored taxa
    Attach {
        /// FASTA file, or a directory of them, stored under the "16S" property
        #[arg(long, conflicts_with = "table", required_unless_present = "table")]
        sequences: Option<PathBuf>,
        /// Tab-delimited table keyed by taxon name, one property per column
        #[arg(long)]
        table: Option<PathBuf>,
        #[arg(long, default_value = "otu")]
        rank: Rank,
    },
    /// Test a network's taxa against a sample metadata property
    Associate {
        network: String,
        #[arg(long)]
        property: String,
        /// Report associations with p below this
        #[arg(long, default_value_t = 0.05)]
        alpha: f64,
        /// Metadata value meaning "missing"
        #[arg(long, default_value = "NA")]
        null: String,
    },
    /// List stored networks
    Networks,
    /// Show one network with its provenance
    Show {
        /// Network id, name, or name@version
        network: String,
    },
    /// Delete a network; shared taxa and samples stay
    Delete {
        network: String,
    },
    /// Edges present in any of the networks
    Union {
        #[arg(required = true)]
        networks: Vec<String>,
        /// Write the result to a .json or .graphml file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Edges shared by the networks
    Intersection {
        #[arg(required = true)]
        networks: Vec<String>,
        /// Fraction of the networks an edge must appear in
        #[arg(long, default_value_t = 1.0)]
        min_fraction: f64,
        /// Only match edges with the same association sign
        #[arg(long)]
        match_sign: bool,
        /// Collapse weights: keep, mean, sum, max or min
        #[arg(long, default_value = "keep")]
        merge: WeightMerge,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Edges of the first network missing from the second
    Difference {
        a: String,
        b: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Edges found in exactly one of the networks
    Unique {
        #[arg(required = true)]
        networks: Vec<String>,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Collapse a network's taxa onto a taxonomic rank
    Aggregate {
        network: String,
        #[arg(long, default_value = "genus")]
        rank: Rank,
        /// Keep positive and negative weight sums apart
        #[arg(long)]
        split_by_sign: bool,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Export a stored network
    Export {
        network: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Audit the stored graph for consistency problems
    Check,
}

fn open_catalogue(db: Option<PathBuf>, config: Option<PathBuf>) -> Result<Catalogue, MakoError> {
    let mut config = match config {
        Some(path) => MakoConfig::load_from(&path)?,
        None => MakoConfig::load()?,
    };
    if db.is_some() {
        config.store.path = db;
    }
    Catalogue::open(config)
}

fn parse_param(param: &str) -> Option<(String, String)> {
    let (key, value) = param.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
}

struct ImportArgs {
    files: Vec<PathBuf>,
    name: Option<String>,
    on_duplicate: Option<DuplicatePolicy>,
    batch_size: Option<usize>,
    rank_default: Option<Rank>,
    params: Vec<String>,
}

fn cmd_import(catalogue: &Catalogue, args: ImportArgs) -> i32 {
    let (input, source) = match mako::import::read_files(&args.files) {
        Ok(read) => read,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let name = args.name.unwrap_or_else(|| {
        args.files[0]
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "network".to_string())
    });
    let mut options = catalogue.import_options(name);
    if let Some(policy) = args.on_duplicate {
        options = options.with_on_duplicate(policy);
    }
    if let Some(batch_size) = args.batch_size {
        options = options.with_batch_size(batch_size.max(1));
    }
    if let Some(rank) = args.rank_default {
        options = options.with_default_rank(rank);
    }
    for param in &args.params {
        match parse_param(param) {
            Some((key, value)) => options = options.with_parameter(key, value),
            None => {
                eprintln!("Error: parameter '{}' is not KEY=VALUE", param);
                return 1;
            }
        }
    }

    report_import(&options.network_name, catalogue.import(&input, &source, &options))
}

fn report_import(network_name: &str, result: Result<ImportResult, MakoError>) -> i32 {
    match result {
        Ok(result) => {
            let verb = match result.outcome {
                ImportOutcome::Created => "Imported",
                ImportOutcome::Versioned => "Imported new version of",
                ImportOutcome::Skipped => "Already imported",
            };
            println!(
                "{} '{}' version {} ({})",
                verb, network_name, result.version, result.network_id
            );
            if result.outcome != ImportOutcome::Skipped {
                let stats = &result.stats;
                println!(
                    "  {} associations, {} observations, {} new taxa, {} new samples",
                    stats.associations, stats.observations, stats.taxa_created, stats.samples_created
                );
            }
            0
        }
        Err(MakoError::Import(mako::ImportError::SchemaViolation(violations))) => {
            eprintln!("Error: {} schema violation(s)", violations.len());
            for violation in violations.iter().take(20) {
                eprintln!("  {}", violation);
            }
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_import_table(catalogue: &Catalogue, paths: &TabTablePaths<'_>, name: Option<&str>) -> i32 {
    let network_name = name.map(str::to_string).unwrap_or_else(|| {
        paths
            .counts
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "network".to_string())
    });
    report_import(&network_name, catalogue.import_tables(paths, Some(network_name.as_str())))
}

fn cmd_attach(result: Result<AttachReport, MakoError>) -> i32 {
    match result {
        Ok(report) => {
            println!("Attached properties to {} taxa ({} values changed)", report.attached, report.updated);
            if !report.missing.is_empty() {
                println!("  {} name(s) matched no stored taxon:", report.missing.len());
                for name in report.missing.iter().take(20) {
                    println!("    {}", name);
                }
            }
            if report.attached == 0 {
                1
            } else {
                0
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_associate(catalogue: &Catalogue, network: &str, options: &AssociationOptions) -> i32 {
    let table = match catalogue.associate(network, options) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match serde_json::to_string_pretty(&table) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_networks(catalogue: &Catalogue) -> i32 {
    let summaries = match catalogue.network_summaries() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if summaries.is_empty() {
        println!("No networks imported.");
        return 0;
    }
    println!(
        "{:<36}  {:<24}  {:>7}  {:>12}  {:>6}  {:>7}",
        "ID", "NAME", "VERSION", "ASSOCIATIONS", "TAXA", "SAMPLES"
    );
    println!("{}", "-".repeat(102));
    for summary in summaries {
        println!(
            "{:<36}  {:<24}  {:>7}  {:>12}  {:>6}  {:>7}",
            summary.info.id,
            summary.info.name,
            summary.info.version,
            summary.associations,
            summary.taxa,
            summary.samples
        );
    }
    0
}

fn cmd_show(catalogue: &Catalogue, network: &str) -> i32 {
    let summary = match catalogue.network(network) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    println!("Network:      {} ({})", summary.info.label(), summary.info.id);
    println!("Imported:     {}", summary.info.created_at.to_rfc3339());
    println!("Source:       {}", summary.info.source_path);
    println!("Associations: {}", summary.associations);
    println!("Taxa:         {}", summary.taxa);
    println!("Samples:      {}", summary.samples);

    match catalogue.provenance(network) {
        Ok(record) => {
            println!("Checksum:     {}", record.source_checksum);
            println!("Parameters:   {}", record.parameters);
            println!("Entities:     {}", record.entities.len());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_delete(catalogue: &Catalogue, network: &str) -> i32 {
    match catalogue.delete_network(network) {
        Ok(info) => {
            println!("Deleted network '{}' ({})", info.label(), info.id);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

/// Print a view as JSON, or write it to `output`
fn emit(view: &dyn ExportView, output: Option<&Path>) -> i32 {
    let doc = export::export(view);
    match output {
        Some(path) => match export::write_document(&doc, path) {
            Ok(_) => {
                println!(
                    "Wrote '{}' ({} nodes, {} edges) to {}",
                    doc.data.name,
                    doc.elements.nodes.len(),
                    doc.elements.edges.len(),
                    path.display()
                );
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        None => match export::to_json(&doc) {
            Ok(json) => {
                println!("{}", json);
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
    }
}

fn cmd_view<V: ExportView>(result: Result<V, MakoError>, output: Option<&Path>) -> i32 {
    match result {
        Ok(view) => emit(&view, output),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_check(catalogue: &Catalogue) -> i32 {
    match catalogue.check_schema() {
        Ok(issues) if issues.is_empty() => {
            println!("No schema issues found.");
            0
        }
        Ok(issues) => {
            println!("{} schema issue(s):", issues.len());
            for issue in issues {
                println!("  {}", issue);
            }
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MAKO_LOG").unwrap_or_else(|_| EnvFilter::from_default_env()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let catalogue = match open_catalogue(cli.db, cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Import {
            files,
            name,
            on_duplicate,
            batch_size,
            rank_default,
            params,
        } => cmd_import(
            &catalogue,
            ImportArgs {
                files,
                name,
                on_duplicate,
                batch_size,
                rank_default,
                params,
            },
        ),
        Commands::ImportTable {
            counts,
            taxonomy,
            samples,
            taxon_meta,
            name,
        } => {
            let paths = TabTablePaths {
                counts: &counts,
                taxonomy: taxonomy.as_deref(),
                sample_metadata: samples.as_deref(),
                taxon_metadata: taxon_meta.as_deref(),
            };
            cmd_import_table(&catalogue, &paths, name.as_deref())
        }
        Commands::Attach { sequences, table, rank } => match (sequences, table) {
            (Some(path), _) => cmd_attach(catalogue.attach_sequences(&path, rank)),
            (None, Some(path)) => cmd_attach(catalogue.attach_property_table(&path, rank)),
            (None, None) => {
                eprintln!("Error: give --sequences or --table");
                1
            }
        },
        Commands::Associate {
            network,
            property,
            alpha,
            null,
        } => {
            let options = AssociationOptions::new(property)
                .with_alpha(alpha)
                .with_null_value(null);
            cmd_associate(&catalogue, &network, &options)
        }
        Commands::Networks => cmd_networks(&catalogue),
        Commands::Show { network } => cmd_show(&catalogue, &network),
        Commands::Delete { network } => cmd_delete(&catalogue, &network),
        Commands::Union { networks, output } => cmd_view(catalogue.union(&networks), output.as_deref()),
        Commands::Intersection {
            networks,
            min_fraction,
            match_sign,
            merge,
            output,
        } => {
            let options = IntersectionOptions::new()
                .with_min_fraction(min_fraction)
                .with_match_sign(match_sign)
                .with_merge(merge);
            cmd_view(catalogue.intersection(&networks, &options), output.as_deref())
        }
        Commands::Difference { a, b, output } => cmd_view(catalogue.difference(&a, &b), output.as_deref()),
        Commands::Unique { networks, output } => cmd_view(catalogue.unique(&networks), output.as_deref()),
        Commands::Aggregate {
            network,
            rank,
            split_by_sign,
            output,
        } => {
            let options = AggregateOptions::new().with_split_by_sign(split_by_sign);
            cmd_view(catalogue.aggregate(&network, rank, options), output.as_deref())
        }
        Commands::Export { network, output } => cmd_view(catalogue.network_edges(&network), output.as_deref()),
        Commands::Check => cmd_check(&catalogue),
    };
    std::process::exit(code);
}

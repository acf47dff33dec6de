//! Chunkload CLI - chunked CSV import
//!
//! # Main Commands
//!
//! ```bash
//! chunkload serve                              # Start HTTP server (port 3000)
//! chunkload import products.csv                # Import, auto-matching columns
//! chunkload import products.csv -m 0=sku -m 2=name,title -m 3=price
//! ```
//!
//! # Inspection Commands
//!
//! ```bash
//! chunkload headers products.csv               # Column labels
//! chunkload sample products.csv --column 2     # Sample values of a column
//! chunkload encodings                          # Supported source encodings
//! ```

use clap::{Args, Parser, Subcommand};
use chunkload::{
    telemetry, AppConfig, ChunkReader, ColumnMapping, ColumnMatcher, DecodeStrategy, Encoding,
    ImportOptions, ImportTarget, Importer, MemoryLogStore, MemoryProductStore, Product,
    ProductsImport, SessionStore,
};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "chunkload")]
#[command(about = "Import large CSV files into the catalogue, one chunk at a time", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// How to read the source file
#[derive(Args, Clone)]
struct DialectArgs {
    /// Field delimiter (auto-detect if not specified)
    #[arg(short, long)]
    delimiter: Option<char>,

    /// Quote character
    #[arg(long)]
    enclosure: Option<char>,

    /// Escape character
    #[arg(long)]
    escape: Option<char>,

    /// Source encoding (sniffed if not specified)
    #[arg(short, long)]
    encoding: Option<Encoding>,

    /// The first row holds data, not column titles
    #[arg(long)]
    no_titles: bool,
}

impl DialectArgs {
    fn options(&self, input: &Path) -> Result<ImportOptions, Box<dyn std::error::Error>> {
        let delimiter = match self.delimiter {
            Some(d) => d,
            None => {
                let bytes = fs::read(input)?;
                chunkload::parser::detect_delimiter(&chunkload::parser::decode_content(&bytes, self.encoding))
            }
        };

        Ok(ImportOptions {
            first_row_titles: !self.no_titles,
            delimiter: Some(delimiter),
            enclosure: self.enclosure,
            escape: self.escape,
            encoding: self.encoding,
            ..Default::default()
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server
    Serve {
        /// Port to listen on (default: CHUNKLOAD_PORT or 3000)
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory for uploaded files
        #[arg(long)]
        upload_dir: Option<PathBuf>,

        /// Persist sessions in this directory
        #[arg(long)]
        session_dir: Option<PathBuf>,
    },

    /// Import a CSV file into the product catalogue
    Import {
        /// Input CSV file
        input: PathBuf,

        #[command(flatten)]
        dialect: DialectArgs,

        /// Column binding `<index>=<field>[,<field>...]` (repeatable).
        /// Columns are auto-matched by title when omitted.
        #[arg(short, long = "map")]
        map: Vec<String>,

        /// Decode a field as a list, `<field>[=<delimiter>]` (repeatable)
        #[arg(long = "list")]
        list: Vec<String>,

        /// Rows per chunk (default: CHUNKLOAD_CHUNK_SIZE or 50)
        #[arg(short, long)]
        chunk_size: Option<usize>,

        /// Operator recorded in the import log
        #[arg(short, long)]
        author: Option<String>,

        /// Existing products (JSON array) to reconcile against
        #[arg(long)]
        products: Option<PathBuf>,

        /// Write the report and resulting products as JSON (default: no output)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the column labels of a CSV file
    Headers {
        /// Input CSV file
        input: PathBuf,

        #[command(flatten)]
        dialect: DialectArgs,
    },

    /// Show sample values of one column
    Sample {
        /// Input CSV file
        input: PathBuf,

        /// Zero-based column index
        #[arg(long)]
        column: usize,

        /// Number of values
        #[arg(short, long, default_value = "10")]
        limit: usize,

        #[command(flatten)]
        dialect: DialectArgs,
    },

    /// List supported source encodings
    Encodings,
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_filter = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    if let Err(e) = telemetry::init_tracing(default_filter) {
        eprintln!("⚠️  Logging disabled: {}", e);
    }

    let result = match cli.command {
        Commands::Serve {
            port,
            upload_dir,
            session_dir,
        } => cmd_serve(port, upload_dir, session_dir).await,

        Commands::Import {
            input,
            dialect,
            map,
            list,
            chunk_size,
            author,
            products,
            output,
        } => {
            cmd_import(ImportArgs {
                input,
                dialect,
                map,
                list,
                chunk_size,
                author,
                products,
                output,
            })
            .await
        }

        Commands::Headers { input, dialect } => cmd_headers(&input, &dialect),

        Commands::Sample {
            input,
            column,
            limit,
            dialect,
        } => cmd_sample(&input, column, limit, &dialect),

        Commands::Encodings => cmd_encodings(),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn cmd_serve(
    port: Option<u16>,
    upload_dir: Option<PathBuf>,
    session_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::from_env()?;
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(dir) = upload_dir {
        config.upload_dir = dir;
    }
    if session_dir.is_some() {
        config.session_dir = session_dir;
    }

    chunkload::server::start_server(config).await
}

struct ImportArgs {
    input: PathBuf,
    dialect: DialectArgs,
    map: Vec<String>,
    list: Vec<String>,
    chunk_size: Option<usize>,
    author: Option<String>,
    products: Option<PathBuf>,
    output: Option<PathBuf>,
}

async fn cmd_import(args: ImportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    eprintln!("📄 Importing: {}", args.input.display());

    let mut options = args.dialect.options(&args.input)?;
    options.chunk_size = args.chunk_size.unwrap_or(config.chunk_size);
    options.author = args.author;

    let seed: Vec<Product> = match &args.products {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => Vec::new(),
    };
    let target = Arc::new(ProductsImport::new(
        MemoryProductStore::with_products(seed),
        MemoryLogStore::new(),
    ));

    let mut mapping = if args.map.is_empty() {
        let headers = ChunkReader::open(&args.input, &options)?.read_headers()?;
        let mut matcher = ColumnMatcher::new(headers, target.fields());
        let matched = matcher.auto_match();
        eprintln!("   Auto-matched {} column(s)", matched);
        for field in matcher.unmatched_fields() {
            eprintln!("   ⚠️  No column for '{}'", field);
        }
        matcher.into_mapping()
    } else {
        let mut mapping = ColumnMapping::new();
        for binding in &args.map {
            let (index, fields) = parse_binding(binding)?;
            for field in fields {
                mapping.bind(index, field);
            }
        }
        mapping
    };
    for arg in &args.list {
        let (field, delimiter) = parse_list_field(arg)?;
        mapping.set_strategy(field, DecodeStrategy::List { delimiter });
    }

    let sessions = Arc::new(SessionStore::in_memory());
    options.session_key = sessions.open(&args.input, None, false).await?;
    let importer = Importer::new(sessions, target.clone());

    let result = importer
        .drive(&mapping, &options, |offset, snapshot| {
            eprintln!(
                "   chunk {:>4}: {:>6.2}%  ({}/{} rows)",
                offset, snapshot.progress, snapshot.processed, snapshot.total_rows
            );
        })
        .await?;

    eprintln!();
    eprintln!("{}", "=".repeat(60));
    eprintln!("📊 SUMMARY");
    eprintln!("{}", "=".repeat(60));
    eprintln!("   Rows:      {}", result.total_rows);
    eprintln!("   Created:   {}", result.created);
    eprintln!("   Updated:   {}", result.updated);
    eprintln!("   Errors:    {}", result.error_count);
    eprintln!("   Warnings:  {}", result.warning_count);
    eprintln!("   Skipped:   {}", result.skipped_count);
    eprintln!("{}", "=".repeat(60));

    let report = importer.report(&options.session_key).await?;
    if let Some(report) = &report {
        for (row, messages) in &report.errors {
            for message in messages {
                eprintln!("   ❌ row {}: {}", row + 1, message);
            }
        }
        for (row, messages) in &report.skipped {
            for message in messages {
                eprintln!("   ⏭  row {}: {}", row + 1, message);
            }
        }
    }

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&json!({
            "report": report,
            "products": target.store().all().await,
        }))?;
        fs::write(path, json)?;
        eprintln!("💾 Output written to: {}", path.display());
    }

    if result.error_count == 0 {
        eprintln!("✅ Import complete");
    }
    Ok(())
}

fn cmd_headers(input: &Path, dialect: &DialectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let options = dialect.options(input)?;
    let reader = ChunkReader::open(input, &options)?;

    for (i, label) in reader.read_headers()?.iter().enumerate() {
        println!("{:>3}  {}", i, label);
    }
    eprintln!("   {} data row(s)", reader.count_rows()?);
    Ok(())
}

fn cmd_sample(
    input: &Path,
    column: usize,
    limit: usize,
    dialect: &DialectArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = dialect.options(input)?;
    for value in ChunkReader::open(input, &options)?.column_sample(column, limit)? {
        println!("{}", value);
    }
    Ok(())
}

fn cmd_encodings() -> Result<(), Box<dyn std::error::Error>> {
    for encoding in Encoding::ALL {
        println!("{}", encoding);
    }
    Ok(())
}

/// Parse `<index>=<field>[,<field>...]`.
fn parse_binding(binding: &str) -> Result<(usize, Vec<String>), String> {
    let (index, fields) = binding
        .split_once('=')
        .ok_or_else(|| format!("Invalid binding '{}', expected <index>=<field>", binding))?;

    let index = index
        .trim()
        .parse()
        .map_err(|_| format!("Invalid column index in '{}'", binding))?;
    let fields: Vec<String> = fields
        .split(',')
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect();

    if fields.is_empty() {
        return Err(format!("No field in binding '{}'", binding));
    }
    Ok((index, fields))
}

/// Parse `<field>[=<delimiter>]`.
fn parse_list_field(arg: &str) -> Result<(String, char), String> {
    match arg.split_once('=') {
        None => Ok((arg.trim().to_string(), chunkload::models::DEFAULT_LIST_DELIMITER)),
        Some((field, delimiter)) => {
            let mut chars = delimiter.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok((field.trim().to_string(), c)),
                _ => Err(format!("List delimiter in '{}' must be one character", arg)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binding() {
        assert_eq!(parse_binding("1=name").unwrap(), (1, vec!["name".to_string()]));
        assert_eq!(
            parse_binding(" 3 = name, title ").unwrap(),
            (3, vec!["name".to_string(), "title".to_string()])
        );
        assert!(parse_binding("name").is_err());
        assert!(parse_binding("x=name").is_err());
        assert!(parse_binding("2=").is_err());
    }

    #[test]
    fn test_parse_list_field() {
        assert_eq!(parse_list_field("tags").unwrap(), ("tags".to_string(), '|'));
        assert_eq!(parse_list_field("tags=;").unwrap(), ("tags".to_string(), ';'));
        assert!(parse_list_field("tags=;;").is_err());
    }
}

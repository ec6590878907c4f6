//! Command-line interface for mongo-cursor
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and overrides
//! - Running one cursor operation against a live server
//!
//! Every subcommand takes a `database.collection` namespace. Filters and
//! projections are JSON (extended JSON is accepted) and results are printed
//! as one relaxed extended JSON document per line.

use std::path::PathBuf;
use std::sync::Arc;

use bson::{Bson, Document};
use clap::{Args, Parser, Subcommand};

use crate::collection::Collection;
use crate::config::{Config, LogLevel};
use crate::cursor::{Cursor, Direction, FindOptions, IndexKeys, Projection};
use crate::driver::MongoTransport;
use crate::error::{CursorError, Result};
use crate::protocol::split_namespace;

/// Iterate MongoDB query results with a non-blocking cursor
#[derive(Parser, Debug)]
#[command(
    name = "mongo-cursor",
    version,
    about = "Run cursor queries against MongoDB",
    long_about = "Run find, count, distinct and explain through a batched, non-blocking
cursor and print the results as JSON lines."
)]
pub struct CliArgs {
    /// MongoDB connection URI
    ///
    /// Format: mongodb://[username:password@]host[:port][/database][?options]
    #[arg(long, global = true, value_name = "URI")]
    pub uri: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Allow queries to be answered by secondaries
    #[arg(long, global = true)]
    pub slave_okay: bool,

    /// Verbose mode (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv", global = true)]
    pub very_verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Cursor operations
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print every document matching a query
    Find {
        /// Namespace as database.collection
        #[arg(value_name = "NAMESPACE")]
        namespace: String,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Print the first document matching a filter
    FindOne {
        #[arg(value_name = "NAMESPACE")]
        namespace: String,

        /// Query filter as JSON
        #[arg(long, value_name = "JSON")]
        filter: Option<String>,

        /// Fields to return as JSON
        #[arg(long, value_name = "JSON")]
        projection: Option<String>,
    },

    /// Count documents matching a filter
    Count {
        #[arg(value_name = "NAMESPACE")]
        namespace: String,

        /// Query filter as JSON
        #[arg(long, value_name = "JSON")]
        filter: Option<String>,

        /// Apply --limit and --skip to the count
        #[arg(long)]
        with_limit_and_skip: bool,

        #[arg(long, allow_hyphen_values = true)]
        limit: Option<i32>,

        #[arg(long)]
        skip: Option<i32>,
    },

    /// Print the distinct values of a key
    Distinct {
        #[arg(value_name = "NAMESPACE")]
        namespace: String,

        /// Key to collect values for
        #[arg(value_name = "KEY")]
        key: String,

        /// Query filter as JSON
        #[arg(long, value_name = "JSON")]
        filter: Option<String>,
    },

    /// Print the server's query plan
    Explain {
        #[arg(value_name = "NAMESPACE")]
        namespace: String,

        #[command(flatten)]
        query: QueryArgs,
    },
}

/// Options shared by `find` and `explain`
#[derive(Args, Debug, Default)]
pub struct QueryArgs {
    /// Query filter as JSON
    #[arg(long, value_name = "JSON")]
    pub filter: Option<String>,

    /// Fields to return as JSON
    #[arg(long, value_name = "JSON")]
    pub projection: Option<String>,

    /// Sort key, optionally with a direction: field, field:-1, field:2d
    #[arg(long, value_name = "KEY")]
    pub sort: Vec<String>,

    /// Index hint in the same format as --sort
    #[arg(long, value_name = "KEY")]
    pub hint: Vec<String>,

    /// Maximum documents to return; negative for a single batch
    #[arg(long, allow_hyphen_values = true)]
    pub limit: Option<i32>,

    #[arg(long)]
    pub skip: Option<i32>,

    /// Documents per get-more
    #[arg(long)]
    pub batch_size: Option<i32>,

    /// Limit the number of documents scanned
    #[arg(long)]
    pub max_scan: Option<i32>,

    /// Server-side JavaScript predicate
    #[arg(long = "where", value_name = "CODE")]
    pub where_clause: Option<String>,

    /// Keep the cursor open at the end of a capped collection
    #[arg(long)]
    pub tailable: bool,

    /// Disable the server's idle cursor timeout
    #[arg(long)]
    pub no_timeout: bool,

    /// Print documents as batches arrive instead of collecting them
    #[arg(long)]
    pub stream: bool,
}

impl Commands {
    /// Namespace the command operates on
    pub fn namespace(&self) -> &str {
        match self {
            Commands::Find { namespace, .. }
            | Commands::FindOne { namespace, .. }
            | Commands::Count { namespace, .. }
            | Commands::Distinct { namespace, .. }
            | Commands::Explain { namespace, .. } => namespace,
        }
    }
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration
    config: Config,
}

impl CliInterface {
    /// Create a new CLI interface from the process arguments
    ///
    /// # Returns
    /// * `Result<Self>` - New CLI interface or error
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Create a CLI interface from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Self::load_config(&args)?;
        Ok(Self { args, config })
    }

    /// Load configuration and apply argument overrides
    fn load_config(args: &CliArgs) -> Result<Config> {
        let mut config = Config::load(args.config_file.as_deref())?;
        Self::apply_args_to_config(&mut config, args);
        config.validate()?;
        Ok(config)
    }

    fn apply_args_to_config(config: &mut Config, args: &CliArgs) {
        if let Some(uri) = &args.uri {
            config.connection.uri = uri.clone();
        }
        if args.slave_okay {
            config.connection.slave_okay = true;
        }

        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else if args.quiet {
            LogLevel::Error
        } else {
            config.logging.level
        };
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Connect and run the selected command
    pub async fn run(&self) -> Result<()> {
        let (database, name) = split_namespace(self.args.command.namespace())?;
        let transport = Arc::new(MongoTransport::connect(&self.config.connection).await?);
        let collection = transport
            .collection(database, name)
            .with_defaults(self.config.cursor.clone());

        match &self.args.command {
            Commands::Find { query, .. } => {
                let mut cursor = build_cursor(&collection, query)?;
                print_documents(cursor.execute().await?);
            }
            Commands::FindOne {
                filter, projection, ..
            } => {
                let mut cursor: Cursor = collection.find_with(FindOptions {
                    filter: parse_optional_document("filter", filter.as_deref())?,
                    projection: parse_optional_document("projection", projection.as_deref())?
                        .map(Projection::from),
                    limit: -1,
                    ..FindOptions::default()
                })?;
                print_documents(cursor.execute().await?);
            }
            Commands::Count {
                filter,
                with_limit_and_skip,
                limit,
                skip,
                ..
            } => {
                let filter = parse_optional_document("filter", filter.as_deref())?;
                let mut cursor = collection.find(filter.unwrap_or_default());
                if let Some(limit) = limit {
                    cursor.limit(*limit)?;
                }
                if let Some(skip) = skip {
                    cursor.skip(*skip)?;
                }
                println!("{}", cursor.count(*with_limit_and_skip).await?);
            }
            Commands::Distinct { key, filter, .. } => {
                let filter = parse_optional_document("filter", filter.as_deref())?;
                for value in collection.distinct(key, filter.unwrap_or_default()).await? {
                    println!("{}", value.into_relaxed_extjson());
                }
            }
            Commands::Explain { query, .. } => {
                let mut cursor = build_cursor(&collection, query)?;
                print_documents(cursor.explain().await?);
            }
        }
        Ok(())
    }
}

/// Configure a cursor from query arguments
fn build_cursor(collection: &Collection, args: &QueryArgs) -> Result<Cursor> {
    let mut cursor: Cursor = collection.find_with(FindOptions {
        filter: parse_optional_document("filter", args.filter.as_deref())?,
        projection: parse_optional_document("projection", args.projection.as_deref())?
            .map(Projection::from),
        tailable: args.tailable,
        timeout: args.no_timeout.then_some(false),
        store: Some(!args.stream),
        ..FindOptions::default()
    })?;

    if !args.sort.is_empty() {
        cursor.sort(parse_index_keys(&args.sort)?)?;
    }
    if !args.hint.is_empty() {
        cursor.hint(parse_index_keys(&args.hint)?)?;
    }
    if let Some(limit) = args.limit {
        cursor.limit(limit)?;
    }
    if let Some(skip) = args.skip {
        cursor.skip(skip)?;
    }
    if let Some(batch_size) = args.batch_size {
        cursor.batch_size(batch_size)?;
    }
    if let Some(max_scan) = args.max_scan {
        cursor.max_scan(max_scan)?;
    }
    if let Some(code) = &args.where_clause {
        cursor.where_clause(code.clone())?;
    }

    if args.stream {
        cursor = cursor.with_transform(|document, _| {
            print_document(document);
            None
        });
    }
    Ok(cursor)
}

/// Parse a JSON (or extended JSON) object into a document
fn parse_document(field: &str, json: &str) -> Result<Document> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| CursorError::invalid_value(field, format!("invalid JSON: {e}")))?;
    match Bson::try_from(value) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(_) => Err(CursorError::invalid_type(field, "a JSON object")),
        Err(e) => Err(CursorError::invalid_value(field, e.to_string())),
    }
}

fn parse_optional_document(field: &str, json: Option<&str>) -> Result<Option<Document>> {
    json.map(|json| parse_document(field, json)).transpose()
}

/// Parse `field[:direction]` arguments into ordered index keys
fn parse_index_keys(specs: &[String]) -> Result<IndexKeys> {
    let keys = specs
        .iter()
        .map(|spec| {
            let (key, direction) = match spec.rsplit_once(':') {
                Some((key, "1")) => (key, Direction::Ascending),
                Some((key, "-1")) => (key, Direction::Descending),
                Some((key, "2d")) => (key, Direction::Geo2d),
                Some((_, other)) => {
                    return Err(CursorError::invalid_value(
                        "sort",
                        format!("unknown direction '{other}' in '{spec}'"),
                    ));
                }
                None => (spec.as_str(), Direction::Ascending),
            };
            Ok((key.to_string(), direction))
        })
        .collect::<Result<Vec<_>>>()?;
    IndexKeys::new(keys)
}

fn print_document(document: Document) {
    println!("{}", Bson::Document(document).into_relaxed_extjson());
}

fn print_documents(documents: Vec<Document>) {
    for document in documents {
        print_document(document);
    }
}

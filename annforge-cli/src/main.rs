// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Annforge CLI
//!
//! Command-line interface for training, building and inspecting ANN indexes.

mod input;

use annforge_core::{BuildConfig, Element, SpaceKind, SpaceType};
use annforge_index::from_bytes;
use annforge_service::{
    BuildIndexRequest, BuildSummary, HostVectors, KnnEngine, QueryVector, TemplateBuildRequest,
    TrainRequest,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use input::{load_vectors, parse_params, parse_vector, LoadedVectors};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "annforge")]
#[command(about = "Annforge - approximate nearest neighbor index builder", long_about = None)]
struct Cli {
    /// Build configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train an index on sample vectors and write a template
    Train {
        /// Index description, e.g. "IVF64_HNSW16,Flat"
        #[arg(long)]
        description: String,

        /// Vector dimension (inferred from the input when omitted)
        #[arg(long)]
        dimension: Option<usize>,

        /// l2, innerproduct or hamming
        #[arg(long, default_value = "l2")]
        space_type: SpaceType,

        /// JSON file with sample vectors
        #[arg(long)]
        input: PathBuf,

        /// Template output path
        #[arg(long)]
        output: PathBuf,

        /// Tuning parameters as JSON, or @file
        #[arg(long)]
        params: Option<String>,

        /// Worker threads (0 = configured default)
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Build an index from vectors and ids
    Build {
        /// Index description, e.g. "HNSW32" or "BFlat"
        #[arg(long)]
        description: String,

        /// Vector dimension (inferred from the input when omitted)
        #[arg(long)]
        dimension: Option<usize>,

        /// l2, innerproduct or hamming
        #[arg(long, default_value = "l2")]
        space_type: SpaceType,

        /// JSON file with ids and vectors
        #[arg(long)]
        input: PathBuf,

        /// Index output path
        #[arg(long)]
        output: PathBuf,

        /// Tuning parameters as JSON, or @file
        #[arg(long)]
        params: Option<String>,

        /// Worker threads (0 = configured default)
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Fill a trained template with vectors and ids
    BuildFromTemplate {
        /// Template written by `train`
        #[arg(long)]
        template: PathBuf,

        /// JSON file with ids and vectors
        #[arg(long)]
        input: PathBuf,

        /// Index output path
        #[arg(long)]
        output: PathBuf,

        /// Worker threads (0 = configured default)
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Query a persisted index
    Search {
        /// Index file
        #[arg(long)]
        index: PathBuf,

        /// Query vector as a JSON array
        #[arg(long)]
        vector: String,

        /// Number of neighbors
        #[arg(short, long, default_value = "10")]
        k: usize,

        /// Only return these ids (comma separated)
        #[arg(long, value_delimiter = ',')]
        filter: Option<Vec<i64>>,

        /// Return every neighbor within this distance instead of the top k
        #[arg(long)]
        radius: Option<f32>,

        /// Cap on range search results
        #[arg(long, default_value = "100")]
        max_results: usize,
    },

    /// Describe a persisted index or template
    Info {
        /// Index or template file
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = BuildConfig::load(cli.config.clone()).context("Failed to load configuration")?;
    let memory_limit = config.transfer_memory_limit_bytes;
    let engine = KnnEngine::new(config).context("Failed to start engine")?;

    match cli.command {
        Commands::Train {
            description,
            dimension,
            space_type,
            input,
            output,
            params,
            threads,
        } => {
            let params = parse_params(params.as_deref())?;
            let bytes = match space_type.space_kind() {
                SpaceKind::Float => {
                    let loaded = load_vectors::<f32>(&input, memory_limit)?;
                    let dimension = resolve_dimension(dimension, &loaded, &input)?;
                    engine.train_index(TrainRequest {
                        description: &description,
                        dimension,
                        space_type,
                        sample: HostVectors::Float(loaded.buffer),
                        params: &params,
                        thread_hint: threads,
                    })
                }
                SpaceKind::Binary => {
                    let loaded = load_vectors::<u8>(&input, memory_limit)?;
                    let dimension = resolve_dimension(dimension, &loaded, &input)?;
                    engine.train_index(TrainRequest {
                        description: &description,
                        dimension,
                        space_type,
                        sample: HostVectors::Binary(loaded.buffer),
                        params: &params,
                        thread_hint: threads,
                    })
                }
            }
            .with_context(|| format!("Failed to train '{}'", description))?;

            std::fs::write(&output, &bytes)
                .with_context(|| format!("Failed to write template to {:?}", output))?;
            info!("Wrote template to {:?}", output);
            println!("✓ Trained '{}' ({} bytes) -> {:?}", description, bytes.len(), output);
        }

        Commands::Build {
            description,
            dimension,
            space_type,
            input,
            output,
            params,
            threads,
        } => {
            let params = parse_params(params.as_deref())?;
            let summary = match space_type.space_kind() {
                SpaceKind::Float => {
                    let loaded = load_vectors::<f32>(&input, memory_limit)?;
                    let dimension = resolve_dimension(dimension, &loaded, &input)?;
                    engine.build_index(BuildIndexRequest {
                        ids: &loaded.ids,
                        vectors: HostVectors::Float(loaded.buffer),
                        description: &description,
                        dimension,
                        thread_hint: threads,
                        path: &output,
                        space_type,
                        params: &params,
                    })
                }
                SpaceKind::Binary => {
                    let loaded = load_vectors::<u8>(&input, memory_limit)?;
                    let dimension = resolve_dimension(dimension, &loaded, &input)?;
                    engine.build_index(BuildIndexRequest {
                        ids: &loaded.ids,
                        vectors: HostVectors::Binary(loaded.buffer),
                        description: &description,
                        dimension,
                        thread_hint: threads,
                        path: &output,
                        space_type,
                        params: &params,
                    })
                }
            }
            .with_context(|| format!("Failed to build '{}'", description))?;
            print_summary(&summary);
        }

        Commands::BuildFromTemplate {
            template,
            input,
            output,
            threads,
        } => {
            let bytes = std::fs::read(&template)
                .with_context(|| format!("Failed to read template {:?}", template))?;
            let space = from_bytes(&bytes)
                .with_context(|| format!("Invalid template {:?}", template))?
                .space_kind();

            let summary = match space {
                SpaceKind::Float => {
                    let loaded = load_vectors::<f32>(&input, memory_limit)?;
                    engine.build_index_from_template(TemplateBuildRequest {
                        ids: &loaded.ids,
                        vectors: HostVectors::Float(loaded.buffer),
                        template: &bytes,
                        path: &output,
                        thread_hint: threads,
                    })
                }
                SpaceKind::Binary => {
                    let loaded = load_vectors::<u8>(&input, memory_limit)?;
                    engine.build_index_from_template(TemplateBuildRequest {
                        ids: &loaded.ids,
                        vectors: HostVectors::Binary(loaded.buffer),
                        template: &bytes,
                        path: &output,
                        thread_hint: threads,
                    })
                }
            }
            .with_context(|| format!("Failed to build from template {:?}", template))?;
            print_summary(&summary);
        }

        Commands::Search {
            index,
            vector,
            k,
            filter,
            radius,
            max_results,
        } => {
            let handle = engine
                .load_index(&index)
                .with_context(|| format!("Failed to load {:?}", index))?;
            let space = engine.registry().get(handle)?.space_kind();

            let float_query;
            let binary_query;
            let query = match space {
                SpaceKind::Float => {
                    float_query = parse_vector::<f32>(&vector)?;
                    QueryVector::Float(&float_query)
                }
                SpaceKind::Binary => {
                    binary_query = parse_vector::<u8>(&vector)?;
                    QueryVector::Binary(&binary_query)
                }
            };

            let results = match radius {
                Some(radius) => {
                    engine.range_search(handle, query, radius, max_results, filter.as_deref())?
                }
                None => engine.query_index(handle, query, k, filter.as_deref())?,
            };
            println!("{}", serde_json::to_string_pretty(&results)?);
            engine.free(handle)?;
        }

        Commands::Info { path } => {
            let bytes =
                std::fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;
            let artifact =
                from_bytes(&bytes).with_context(|| format!("Invalid index file {:?}", path))?;
            let report = serde_json::json!({
                "space": artifact.space_kind(),
                "space_type": artifact.space_type().as_str(),
                "dimension": artifact.dimension(),
                "ntotal": artifact.ntotal(),
                "trained": artifact.is_trained(),
                "id_mapped": artifact.ids().is_some(),
                "settings": artifact.settings(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn resolve_dimension<E: Element>(
    dimension: Option<usize>,
    loaded: &LoadedVectors<E>,
    input: &Path,
) -> Result<usize> {
    dimension
        .or(loaded.dimension)
        .with_context(|| format!("No vectors in {:?} and no --dimension given", input))
}

fn print_summary(summary: &BuildSummary) {
    info!(
        "Built {} {} index with {} vectors",
        summary.space, summary.topology, summary.ntotal
    );
    println!(
        "✓ {} vectors (dimension {}, {} {}) -> {:?}",
        summary.ntotal, summary.dimension, summary.space, summary.topology, summary.path
    );
}

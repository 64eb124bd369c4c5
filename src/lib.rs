//! cvscreen - rank candidate resumes against a job description and explain
//! every decision.
//!
//! Resume text is split into overlapping fragments, embedded into a
//! content-addressed vector store, and scored per candidate by the mean of
//! its best-matching fragment distances. Each ranked candidate then gets a
//! narrative from a local generative model, grounded in the job description
//! and that candidate's full text.
//!
//! # Quick start
//!
//! ```no_run
//! use cvscreen::{DataDir, embedding::HashingEmbedder, pipeline::Workspace};
//!
//! let workspace = Workspace::open(DataDir::resolve(None).unwrap()).unwrap();
//! workspace.ingest(HashingEmbedder::default(), |_| {}).unwrap();
//!
//! let run = workspace
//!     .rank("job.txt".as_ref(), HashingEmbedder::default())
//!     .unwrap();
//! for r in &run.ranked {
//!     println!("{:>3}. [{:.4}] {}", r.rank, r.score, r.candidate);
//! }
//! ```

pub mod chunking;
pub mod cli;
pub mod config_db;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod explain;
pub mod fragment_id;
pub mod fragment_store;
pub mod ingestion;
pub mod llm;
pub mod manifest;
pub mod model_manager;
pub mod pipeline;
pub mod ranking;
pub mod report;
pub mod settings;
pub mod text_util;
pub mod vector_db;
pub mod walker;

pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use fragment_id::FragmentId;
pub use fragment_store::FragmentStore;
pub use model_manager::ModelManager;
pub use settings::Settings;
pub use vector_db::VectorDb;

pub mod batcher;
pub mod cli;
pub mod collection;
pub mod config;
pub mod error;
pub mod extract;
pub mod fold;
pub mod labeled;
pub mod loss;
pub mod metrics;
pub mod preview;
pub mod sampler;
pub mod trainer;
pub mod utils;

pub use collection::{PetCollection, PetRecord};
pub use config::{Opts, TrainConfig};
pub use error::DatasetError;
pub use sampler::{PairSampler, PairSamplerBuilder, Split};

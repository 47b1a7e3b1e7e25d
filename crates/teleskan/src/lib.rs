pub mod config;
pub mod normalize;
mod parser;
pub mod pipeline;
pub mod providers;
pub mod runner;
pub mod scraper;
pub mod store;
pub mod types;
pub mod utils;

pub use config::{ConfigError, RunConfig};
pub use parser::ParseError;
pub use pipeline::{PipelineError, RunReport, execute, run};
pub use scraper::{OfflineSource, PageSource, WebScraper};

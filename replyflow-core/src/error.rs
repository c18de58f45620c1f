use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplyflowError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid knowledge pattern in entry '{entry}': {source}")]
    KnowledgePattern {
        entry: String,
        #[source]
        source: regex::Error,
    },
}

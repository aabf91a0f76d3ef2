use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to load session `{participant_id}`")]
    LoadSession {
        participant_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to save session `{participant_id}`")]
    SaveSession {
        participant_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to access uploads of `{participant_id}`")]
    Uploads {
        participant_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to access scoring records of `{participant_id}`")]
    Predictions {
        participant_id: String,
        #[source]
        source: MongoError,
    },
}

pub mod config;
pub mod connection;
pub mod error;
pub mod framing;
pub mod publisher;
mod source;
pub mod validate;

pub use config::{AckMode, FramingConfig, PipelineConfig, PublisherConfig};
pub use connection::{
    CloseReason, ConnectionPipeline, ConnectionReport, ConnectionState, ConnectionStats, run_connection,
};
pub use error::{FramingError, PipelineError};
pub use framing::LineFramer;
pub use publisher::{Delivery, LogPublisher};
pub use source::{Acceptor, Connection, TcpAcceptor, spawn_source};
pub use validate::Validator;

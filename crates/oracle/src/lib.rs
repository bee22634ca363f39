//! Off-chain oracle responder for the Zap Dispatch contract.
//!
//! - **QuerySubscription**: live `Incoming` logs addressed to this provider (WebSocket).
//! - **Dispatcher**: parses each log into a [QueryRecord], looks up the endpoint in the
//!   [ResolverRegistry], resolves the query against an external data source, encodes the answer
//!   as `bytes32[]` words and submits `respondBytes32Array`.
//! - **Registration**: one-time provider and curve setup on the Zap Registry contract.

pub mod abi;
pub mod config;
pub mod dispatcher;
pub mod encoder;
pub mod query;
pub mod registration;
pub mod registry;
pub mod resolver;
pub mod rpc;
pub mod submitter;
pub mod subscription;

pub use config::OracleConfig;
pub use dispatcher::{
    DispatchConfig, DispatchError, DispatchOutcome, Dispatcher, ResolverErrorPolicy, RunSummary,
};
pub use encoder::{decode, encode, EncodedResponse};
pub use query::QueryRecord;
pub use registration::{ensure_registered, ProviderInfo, RegistrationOutcome};
pub use registry::{Curve, RegistryBuilder, RegistryError, ResolverEntry, ResolverRegistry};
pub use resolver::{Resolver, ResolverError, StaticResolver, WolframResolver};
pub use rpc::{RpcClient, RpcError};
pub use submitter::{
    DispatchSubmitter, LocalSigner, Response, SubmissionError, SubmissionResult, Submitter,
    Transactor,
};
pub use subscription::{QuerySubscription, SubscriptionConfig};

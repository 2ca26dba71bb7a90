//! Schema-driven SOAP RPC client
//!
//! Calls remote SOAP operations by name, validating and packing native
//! values against a service's type graph and restoring schema cardinality on
//! the way back.
//!
//! # Features
//!
//! - Dynamic method registry with an `Invoke(name, args)` interface
//! - Schema validation with declared-subtype support
//! - Sparse, cardinality-aware marshaling into SOAP 1.1 envelopes
//! - Response decoding and cardinality restoration
//! - Per-call transcripts with masking, header extraction and fault normalization
//! - Classified remote faults
//! - Credential refresh with challenge support, or pre-signed header schemes
//!
//! # Example
//!
//! ```ignore
//! use soap_rpc_client::{ClientConfig, Invoke, ServiceSchema, SoapClient, TypeDirectory, Value};
//! use std::sync::Arc;
//!
//! let directory = Arc::new(TypeDirectory::new(ServiceSchema::from_file("campaign.yaml")?));
//! let client = SoapClient::new(ClientConfig::from_file("client.yaml")?);
//! let service = client.service("CampaignService", url, directory);
//!
//! let selector = Value::record([("fields", Value::list(["Id", "Name"]))]);
//! let page = service.invoke("get", &[selector])?;
//! ```

pub mod client;
pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod error;
pub mod marshal;
pub mod parser;
pub mod restore;
pub mod schema;
pub mod service;
pub mod transcript;
pub mod transport;
pub mod validator;
pub mod value;

pub use client::{SoapClient, SoapClientBuilder, UsageCounters};
pub use config::ClientConfig;
pub use error::{ApiFault, FaultCategory, Result, SoapError};
pub use schema::{ServiceSchema, TypeDirectory};
pub use service::{Invoke, RemoteMethod, SoapService};
pub use transcript::Transcript;
pub use value::Value;

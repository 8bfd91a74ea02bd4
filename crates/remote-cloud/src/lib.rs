mod context;
mod daytona;
mod e2b;
mod error;
mod http;
mod lease;
mod provider;
mod provisioned;
mod resolve;
mod snapshot;
mod template;
#[cfg(test)]
mod testing;
mod transport;

pub use context::BuildContext;
pub use daytona::DaytonaProvider;
pub use e2b::E2bProvider;
pub use error::{ProviderError, ProviderResult};
pub use lease::InstanceLease;
pub use provider::{CommandOutput, ImageRequest, Instance, LogSink, Provider, Resources};
pub use resolve::{Resolver, build_source, project_version};
pub use snapshot::SnapshotBackend;
pub use template::TemplateBackend;
pub use transport::encode_for_sh;

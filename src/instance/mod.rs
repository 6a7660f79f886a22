//! Managed Neo4j instances.
//!
//! Layout on disk:
//! - `<base_path>/<id>/` - home directory mirrored from the distribution
//! - `<base_path>/<id>/conf/` - server configuration files
//! - data directory as configured by the family's keys, below the home

mod factory;
mod family;
mod pool;
mod provider;
mod types;

pub use factory::InstanceFactory;
pub use family::ServerFamily;
pub use pool::InstancePool;
pub use types::{
    Endpoints, InstanceEvent, InstanceEventKind, InstanceInfo, InstanceStatus, Setting,
};

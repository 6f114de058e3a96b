pub mod config;
pub mod driver_pool;
pub mod host_health;
pub mod proxy_pool;
pub mod refresher;

pub use config::{BrowserKind, FetchConfig, FetchConfigBuilder, SessionTimeouts};
pub use driver_pool::{DriverInstance, DriverPool, DriverSession};
pub use host_health::{
    FetchMode, FetchStats, HostHealthTracker, PageCategory, PageInfo, TaskStore,
};
pub use proxy_pool::{LivenessProbe, ProbeOutcome, ProxyEntry, ProxyPool, TcpProbe};
pub use refresher::PoolRefresher;

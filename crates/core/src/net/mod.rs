//! Network reachability.

pub mod connectivity;

pub use connectivity::{
    spawn_probe_loop, ConnectivityMonitor, ConnectivityProbe, ConnectivityStatus, TcpProbe,
};

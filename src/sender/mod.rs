pub mod stats;
pub mod transport;

pub use stats::{PipelineStats, StatsSnapshot};
pub use transport::{
    Connection, TcpTransport, Transport, TransportError, TransportKind, UdpTransport,
    transport_for,
};

pub mod correlate;
pub mod socket;
pub mod transport;
pub mod udp;

pub use correlate::*;
pub use socket::*;
pub use transport::*;
pub use udp::*;

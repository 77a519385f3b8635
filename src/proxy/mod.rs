// signing reverse proxy: director, transport, listeners

pub mod forward;
pub mod server;
pub mod signer;
pub mod upstream;

pub use forward::{ForwardTarget, ProxyState};
pub use server::Server;
pub use signer::RequestSigner;
pub use upstream::{TransportSettings, UpstreamTransport};

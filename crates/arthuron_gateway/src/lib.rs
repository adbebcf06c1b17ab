pub mod server;
pub mod session;
pub mod types;

pub use server::{GatewayServer, TtsService, ROUTES};
pub use session::{SessionError, SessionNegotiator};
pub use types::{Ack, ApiError, ChunkRequest, HealthResponse, RelayHealth};

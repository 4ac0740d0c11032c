pub mod breaker;
pub mod gateway;
pub mod keys;
pub mod limiter;
pub mod mock;
pub mod retry;

pub use breaker::CircuitBreaker;
pub use gateway::{GatewayConfig, ReliableGateway};
pub use keys::{CredentialRegistry, KeyRotator};
pub use limiter::RateLimiter;
pub use mock::{MockProvider, MockResponse, MockSession};
pub use retry::RetryPolicy;

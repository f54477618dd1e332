pub mod auth;
pub mod gateway;
pub mod state;
pub mod subscriptions;

pub use gateway::{
    ApiError, ApiResult, AuthResponse, CreateMarketRequest, ErrorCode, Gateway, GrantRequest,
    GrantResponse, ListMarketsRequest, LoginRequest, PlaceMarketOrderRequest, PlaceOrderRequest,
    PortfolioResponse, PositionView, RegisterRequest, Request, ScopedBalance, UserView,
};
pub use state::{App, AppConfig, AppError};
pub use subscriptions::{ChannelSink, ClientSink, SubscriptionId, SubscriptionManager};

// Re-export the engine and store for embedders
pub use longshot_engine as engine;
pub use longshot_store as store;

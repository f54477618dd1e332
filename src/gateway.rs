//! The request boundary: payload validation, authentication, dispatch to
//! the per-market workers, and JSON translation. This is the only layer
//! that sees bearer tokens or admin flags; engine commands carry an
//! already-authenticated principal.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use longshot_engine::{
    Balance, BalanceScope, Cents, Clock, Command, EngineError, ErrorKind, Market, MarketId,
    MarketRegistry, Order, OrderId, OrderKind, OrderStatus, OrderbookSnapshot, Position, Report,
    Side, SideDepth, Trade, UserId,
};
use longshot_store::{MarketFilter, OrderFilter, SharedStore, StoreError, UserInfo};

use crate::auth::{Session, SessionManager, hash_password, verify_password};
use crate::state::AppConfig;
use crate::subscriptions::{ClientSink, SubscriptionId, SubscriptionManager};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidOrder,
    InsufficientBalance,
    InsufficientShares,
    MarketClosed,
    NotAuthorized,
    NotFound,
    Timeout,
    Conflict,
    ServiceUnavailable,
}

/// Client-facing failure: a stable code plus a human-readable message.
/// Stack traces and internals never leave the process.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    fn not_authorized() -> Self {
        Self::new(ErrorCode::NotAuthorized, "not authorized")
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let code = match &err {
            EngineError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            EngineError::InsufficientShares { .. } => ErrorCode::InsufficientShares,
            EngineError::MarketClosed(_) => ErrorCode::MarketClosed,
            EngineError::MarketNotFound(_) | EngineError::OrderNotFound(_) => ErrorCode::NotFound,
            EngineError::NotOrderOwner(_) => ErrorCode::NotAuthorized,
            EngineError::Timeout => ErrorCode::Timeout,
            _ => match err.kind() {
                ErrorKind::Validation => ErrorCode::InvalidOrder,
                ErrorKind::Transient | ErrorKind::Fatal => ErrorCode::ServiceUnavailable,
                ErrorKind::Precondition => ErrorCode::InvalidOrder,
            },
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => ApiError::new(ErrorCode::Conflict, msg),
            other => ApiError::new(ErrorCode::ServiceUnavailable, other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMarketsRequest {
    #[serde(default)]
    pub status: Option<longshot_engine::MarketStatus>,
    #[serde(default)]
    pub org_id: Option<u64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderRequest {
    pub market_id: MarketId,
    pub side: Side,
    pub kind: OrderKind,
    pub price_cents: Cents,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceMarketOrderRequest {
    pub market_id: MarketId,
    pub side: Side,
    pub kind: OrderKind,
    #[serde(default)]
    pub token_budget: Option<Cents>,
    #[serde(default)]
    pub quantity: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMarketRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub org_id: Option<u64>,
    #[serde(default)]
    pub resolve_at: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrantRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub org_id: Option<u64>,
    pub amount_cents: Cents,
}

/// The full command surface as one tagged enum, so a transport can feed
/// decoded JSON straight into [`Gateway::handle`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    Register(RegisterRequest),
    Login(LoginRequest),
    ListMarkets(ListMarketsRequest),
    GetMarket { market_id: MarketId },
    GetOrderbook { market_id: MarketId, #[serde(default)] depth: Option<usize> },
    ListTrades { market_id: MarketId, #[serde(default)] limit: Option<i64> },
    PlaceOrder(PlaceOrderRequest),
    PlaceMarketOrder(PlaceMarketOrderRequest),
    CancelOrder { order_id: OrderId },
    MyOrders { #[serde(default)] status: Option<OrderStatus> },
    Portfolio,
    CreateMarket(CreateMarketRequest),
    ResolveMarket { market_id: MarketId, outcome: Side },
    DeleteMarket { market_id: MarketId },
    Grant(GrantRequest),
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub is_admin: bool,
}

impl From<UserInfo> for UserView {
    fn from(info: UserInfo) -> Self {
        UserView {
            id: info.id,
            email: info.email,
            display_name: info.display_name,
            is_admin: info.is_admin,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserView,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopedBalance {
    pub scope: BalanceScope,
    pub available: Cents,
    pub escrow: Cents,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    pub market_id: MarketId,
    pub yes_shares: i64,
    pub no_shares: i64,
    pub yes_reserved: i64,
    pub no_reserved: i64,
    pub yes_avg_price: Option<f64>,
    pub no_avg_price: Option<f64>,
}

impl PositionView {
    fn new(market_id: MarketId, position: &Position) -> Self {
        PositionView {
            market_id,
            yes_shares: position.yes_shares,
            no_shares: position.no_shares,
            yes_reserved: position.yes_reserved,
            no_reserved: position.no_reserved,
            yes_avg_price: position.avg_price(Side::Yes),
            no_avg_price: position.avg_price(Side::No),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioResponse {
    pub balances: Vec<ScopedBalance>,
    pub positions: Vec<PositionView>,
    pub open_orders: Vec<Order>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrantResponse {
    pub user_id: UserId,
    pub scope: BalanceScope,
    pub balance: Balance,
}

// ============================================================================
// Validation
// ============================================================================

fn validate_register(request: &RegisterRequest) -> ApiResult<()> {
    let email = request.email.trim();
    if !email.contains('@') || email.len() < 3 || email.len() > 120 {
        return Err(ApiError::new(ErrorCode::InvalidOrder, "invalid email address"));
    }
    if request.password.len() < 8 {
        return Err(ApiError::new(ErrorCode::InvalidOrder, "password must be at least 8 characters"));
    }
    if let Some(name) = &request.name {
        if name.trim().is_empty() || name.len() > 60 {
            return Err(ApiError::new(ErrorCode::InvalidOrder, "name must be 1-60 characters"));
        }
    }
    Ok(())
}

fn validate_market_request(request: &CreateMarketRequest) -> ApiResult<()> {
    if request.title.trim().is_empty() || request.title.len() > 140 {
        return Err(ApiError::new(ErrorCode::InvalidOrder, "title must be 1-140 characters"));
    }
    if request.description.len() > 1000 {
        return Err(ApiError::new(ErrorCode::InvalidOrder, "description must be at most 1000 characters"));
    }
    Ok(())
}

fn validate_order_request(price_cents: Cents, quantity: i64) -> ApiResult<()> {
    if !(1..=99).contains(&price_cents) {
        return Err(ApiError::new(ErrorCode::InvalidOrder, "price_cents must be 1-99"));
    }
    if quantity <= 0 {
        return Err(ApiError::new(ErrorCode::InvalidOrder, "quantity must be a positive integer"));
    }
    Ok(())
}

fn scope_for(org_id: Option<u64>) -> BalanceScope {
    match org_id {
        Some(id) => BalanceScope::Org(id),
        None => BalanceScope::Global,
    }
}

// ============================================================================
// Gateway
// ============================================================================

pub struct Gateway {
    registry: Arc<MarketRegistry>,
    store: Arc<SharedStore>,
    clock: Arc<dyn Clock>,
    sessions: SessionManager,
    subscriptions: SubscriptionManager,
    config: AppConfig,
}

impl Gateway {
    pub fn new(
        registry: Arc<MarketRegistry>,
        store: Arc<SharedStore>,
        clock: Arc<dyn Clock>,
        config: AppConfig,
    ) -> Self {
        let sessions = SessionManager::new(config.session_ttl_secs * 1_000);
        Self {
            registry,
            store,
            clock,
            sessions,
            subscriptions: SubscriptionManager::new(),
            config,
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.config.command_timeout_ms)
    }

    fn principal(&self, token: Option<&str>) -> ApiResult<Session> {
        let token = token.ok_or_else(ApiError::not_authorized)?;
        self.sessions
            .resolve(token, self.clock.now_millis())
            .ok_or_else(ApiError::not_authorized)
    }

    fn admin(&self, token: Option<&str>) -> ApiResult<Session> {
        let session = self.principal(token)?;
        if !session.is_admin {
            return Err(ApiError::not_authorized());
        }
        Ok(session)
    }

    // ── Auth ─────────────────────────────────────────────────────────────

    pub fn register(&self, request: RegisterRequest) -> ApiResult<AuthResponse> {
        validate_register(&request)?;
        let email = request.email.trim().to_lowercase();
        let display_name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or("trader"))
            .to_string();
        let is_admin = self.config.admin_emails.iter().any(|e| e.eq_ignore_ascii_case(&email));

        let password_hash = hash_password(&request.password)
            .map_err(|e| ApiError::new(ErrorCode::ServiceUnavailable, e))?;
        let user = self
            .store
            .with(|store| store.create_user(&email, &password_hash, &display_name, is_admin))?;

        self.grant_balance(user.id, BalanceScope::Global, self.config.starting_balance_cents)?;
        log::info!("registered user {} ({email})", user.id);

        let token = self.sessions.issue(user.id, user.is_admin, self.clock.now_millis());
        Ok(AuthResponse { token, user: user.into() })
    }

    pub fn login(&self, request: LoginRequest) -> ApiResult<AuthResponse> {
        let email = request.email.trim().to_lowercase();
        let user = self
            .store
            .with(|store| store.user_by_email(&email))?
            .filter(|user| verify_password(&request.password, &user.password_hash))
            .ok_or_else(|| ApiError::new(ErrorCode::NotAuthorized, "invalid email or password"))?;

        let token = self.sessions.issue(user.id, user.is_admin, self.clock.now_millis());
        Ok(AuthResponse { token, user: user.into() })
    }

    pub fn logout(&self, token: &str) {
        self.sessions.revoke(token);
    }

    // ── Public reads ─────────────────────────────────────────────────────

    pub fn list_markets(&self, request: ListMarketsRequest) -> ApiResult<Vec<Market>> {
        let filter = MarketFilter {
            status: request.status,
            scope: request.org_id.map(BalanceScope::Org),
            limit: request.limit,
        };
        Ok(self.store.with(|store| store.list_markets(&filter))?)
    }

    pub async fn get_market(&self, market_id: MarketId) -> ApiResult<Market> {
        // Prefer the worker's live record; fall back to the store for
        // terminal markets whose worker is no longer running.
        match self.registry.market(market_id, self.deadline()).await {
            Ok(market) => Ok(market),
            Err(EngineError::MarketNotFound(_)) => self
                .store
                .with(|store| store.get_market(market_id))?
                .ok_or_else(|| ApiError::new(ErrorCode::NotFound, format!("market {market_id} not found"))),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_orderbook(
        &self,
        market_id: MarketId,
        depth: Option<usize>,
    ) -> ApiResult<OrderbookSnapshot> {
        match self.registry.snapshot(market_id, depth, self.deadline()).await {
            Ok(snapshot) => Ok(snapshot),
            Err(EngineError::MarketNotFound(_)) => {
                // A known-but-inactive market has an empty book.
                let market = self
                    .store
                    .with(|store| store.get_market(market_id))?
                    .ok_or_else(|| ApiError::new(ErrorCode::NotFound, format!("market {market_id} not found")))?;
                let empty = || SideDepth { bids: Vec::new(), asks: Vec::new(), midpoint: 50.0 };
                Ok(OrderbookSnapshot { market_id: market.id, yes: empty(), no: empty() })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn list_trades(&self, market_id: MarketId, limit: Option<i64>) -> ApiResult<Vec<Trade>> {
        let limit = limit.unwrap_or(100).clamp(1, 500);
        Ok(self.store.with(|store| store.list_trades(market_id, limit))?)
    }

    // ── Trading ──────────────────────────────────────────────────────────

    pub async fn place_order(&self, token: Option<&str>, request: PlaceOrderRequest) -> ApiResult<Report> {
        let session = self.principal(token)?;
        validate_order_request(request.price_cents, request.quantity)?;
        let cmd = Command::PlaceLimit {
            user: session.user_id,
            side: request.side,
            kind: request.kind,
            price: request.price_cents,
            quantity: request.quantity,
        };
        Ok(self.registry.execute(request.market_id, cmd, self.deadline()).await?)
    }

    pub async fn place_market_order(
        &self,
        token: Option<&str>,
        request: PlaceMarketOrderRequest,
    ) -> ApiResult<Report> {
        let session = self.principal(token)?;
        match (request.kind, request.token_budget, request.quantity) {
            (OrderKind::Buy, Some(budget), _) if budget > 0 => {}
            (OrderKind::Sell, _, Some(quantity)) if quantity > 0 => {}
            _ => {
                return Err(ApiError::new(
                    ErrorCode::InvalidOrder,
                    "market buys need a positive token_budget, market sells a positive quantity",
                ));
            }
        }
        let cmd = Command::PlaceMarket {
            user: session.user_id,
            side: request.side,
            kind: request.kind,
            budget: request.token_budget,
            quantity: request.quantity,
        };
        Ok(self.registry.execute(request.market_id, cmd, self.deadline()).await?)
    }

    pub async fn cancel_order(&self, token: Option<&str>, order_id: OrderId) -> ApiResult<Report> {
        let session = self.principal(token)?;
        let order = self
            .store
            .with(|store| store.get_order(order_id))?
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound, format!("order {order_id} not found")))?;
        let cmd = Command::Cancel { user: session.user_id, order_id };
        Ok(self.registry.execute(order.market_id, cmd, self.deadline()).await?)
    }

    pub fn my_orders(&self, token: Option<&str>, status: Option<OrderStatus>) -> ApiResult<Vec<Order>> {
        let session = self.principal(token)?;
        let filter = OrderFilter { user_id: Some(session.user_id), status, ..Default::default() };
        Ok(self.store.with(|store| store.list_orders(&filter))?)
    }

    pub fn portfolio(&self, token: Option<&str>) -> ApiResult<PortfolioResponse> {
        let session = self.principal(token)?;
        let ledger = self.registry.ledger();

        let balances = ledger
            .balances_for_user(session.user_id)
            .into_iter()
            .map(|(scope, b)| ScopedBalance { scope, available: b.available, escrow: b.escrow })
            .collect();
        let positions = ledger
            .positions_for_user(session.user_id)
            .into_iter()
            .map(|(market_id, position)| PositionView::new(market_id, &position))
            .collect();
        let filter = OrderFilter { user_id: Some(session.user_id), ..Default::default() };
        let open_orders = self
            .store
            .with(|store| store.list_orders(&filter))?
            .into_iter()
            .filter(|order| order.status.is_resting())
            .collect();

        Ok(PortfolioResponse { balances, positions, open_orders })
    }

    // ── Admin ────────────────────────────────────────────────────────────

    pub fn create_market(&self, token: Option<&str>, request: CreateMarketRequest) -> ApiResult<Market> {
        self.admin(token)?;
        validate_market_request(&request)?;
        let market = self.registry.create_market(
            request.title.trim().to_string(),
            request.description,
            scope_for(request.org_id),
            request.resolve_at,
        )?;
        log::info!("created market {} ({:?})", market.id, market.scope);
        Ok(market)
    }

    pub async fn resolve_market(&self, token: Option<&str>, market_id: MarketId, outcome: Side) -> ApiResult<Report> {
        self.admin(token)?;
        let report = self
            .registry
            .execute(market_id, Command::Resolve { outcome }, self.deadline())
            .await?;
        log::info!("resolved market {market_id} as {outcome:?}");
        Ok(report)
    }

    pub async fn delete_market(&self, token: Option<&str>, market_id: MarketId) -> ApiResult<Report> {
        self.admin(token)?;
        let report = self
            .registry
            .execute(market_id, Command::Delete, self.deadline())
            .await?;
        log::info!("deleted market {market_id} with refunds");
        Ok(report)
    }

    /// Play-money faucet: credit a user's balance in some scope. This is
    /// also how organisation balances get funded.
    pub fn grant(&self, token: Option<&str>, request: GrantRequest) -> ApiResult<GrantResponse> {
        self.admin(token)?;
        if request.amount_cents <= 0 {
            return Err(ApiError::new(ErrorCode::InvalidOrder, "amount_cents must be positive"));
        }
        let scope = scope_for(request.org_id);
        let balance = self.grant_balance(request.user_id, scope, request.amount_cents)?;
        Ok(GrantResponse { user_id: request.user_id, scope, balance })
    }

    fn grant_balance(&self, user_id: UserId, scope: BalanceScope, amount: Cents) -> ApiResult<Balance> {
        let ledger = self.registry.ledger();
        let mut txn = ledger.begin();
        txn.credit(user_id, scope, amount);
        ledger.commit(txn)?;
        let balance = ledger.balance(user_id, scope);
        self.store
            .with(|store| store.upsert_balance(user_id, scope, &balance))?;
        Ok(balance)
    }

    // ── Realtime ─────────────────────────────────────────────────────────

    /// Attach a client sink to a market's event stream. Authenticated
    /// subscribers also receive their own portfolio updates.
    pub fn subscribe_market(
        &self,
        token: Option<&str>,
        market_id: MarketId,
        sink: Box<dyn ClientSink>,
    ) -> ApiResult<SubscriptionId> {
        let user = match token {
            Some(token) => Some(self.principal(Some(token))?.user_id),
            None => None,
        };
        Ok(self.subscriptions.subscribe(&self.registry, market_id, user, sink)?)
    }

    pub fn unsubscribe_market(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }

    // ── JSON dispatch ────────────────────────────────────────────────────

    /// Run one decoded request and serialise the response, for transports
    /// that speak JSON end to end.
    pub async fn handle(&self, token: Option<&str>, request: Request) -> ApiResult<serde_json::Value> {
        fn json<T: Serialize>(value: T) -> ApiResult<serde_json::Value> {
            serde_json::to_value(value)
                .map_err(|e| ApiError::new(ErrorCode::ServiceUnavailable, e.to_string()))
        }

        match request {
            Request::Register(req) => json(self.register(req)?),
            Request::Login(req) => json(self.login(req)?),
            Request::ListMarkets(req) => json(self.list_markets(req)?),
            Request::GetMarket { market_id } => json(self.get_market(market_id).await?),
            Request::GetOrderbook { market_id, depth } => {
                json(self.get_orderbook(market_id, depth).await?)
            }
            Request::ListTrades { market_id, limit } => json(self.list_trades(market_id, limit)?),
            Request::PlaceOrder(req) => json(self.place_order(token, req).await?),
            Request::PlaceMarketOrder(req) => json(self.place_market_order(token, req).await?),
            Request::CancelOrder { order_id } => json(self.cancel_order(token, order_id).await?),
            Request::MyOrders { status } => json(self.my_orders(token, status)?),
            Request::Portfolio => json(self.portfolio(token)?),
            Request::CreateMarket(req) => json(self.create_market(token, req)?),
            Request::ResolveMarket { market_id, outcome } => {
                json(self.resolve_market(token, market_id, outcome).await?)
            }
            Request::DeleteMarket { market_id } => json(self.delete_market(token, market_id).await?),
            Request::Grant(req) => json(self.grant(token, req)?),
        }
    }
}

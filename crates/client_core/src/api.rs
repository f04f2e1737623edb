//! REST collaborator. The engine only depends on [`BurgerApi`];
//! [`HttpBurgerApi`] is the stock implementation over `reqwest`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Component, ComponentId, Order, OrderNumber, User},
    error::ApiErrorBody,
    protocol::{
        AuthResponse, CreateOrderRequest, CreateOrderResponse, FeedFrame, IngredientsResponse,
        LoginRequest, LogoutRequest, OrdersResponse, RegisterRequest, UpdateUserRequest,
        UserResponse,
    },
};

use crate::{credentials::strip_bearer, error::ApiError};

/// Tokens and profile handed back by a successful login or registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

impl From<AuthResponse> for AuthGrant {
    fn from(value: AuthResponse) -> Self {
        Self {
            user: value.user,
            access_token: value.access_token,
            refresh_token: value.refresh_token,
        }
    }
}

#[async_trait]
pub trait BurgerApi: Send + Sync {
    async fn fetch_ingredients(&self) -> Result<Vec<Component>, ApiError>;
    async fn fetch_feed(&self) -> Result<FeedFrame, ApiError>;
    async fn submit_order(
        &self,
        ingredients: &[ComponentId],
        access_token: Option<&str>,
    ) -> Result<Order, ApiError>;
    async fn fetch_user_orders(&self, access_token: Option<&str>) -> Result<Vec<Order>, ApiError>;
    async fn order_by_number(&self, number: OrderNumber) -> Result<Option<Order>, ApiError>;
    async fn login(&self, request: LoginRequest) -> Result<AuthGrant, ApiError>;
    async fn register(&self, request: RegisterRequest) -> Result<AuthGrant, ApiError>;
    async fn fetch_user(&self, access_token: &str) -> Result<User, ApiError>;
    async fn update_user(
        &self,
        access_token: &str,
        request: UpdateUserRequest,
    ) -> Result<User, ApiError>;
    async fn logout(&self, refresh_token: &str) -> Result<(), ApiError>;
}

pub struct HttpBurgerApi {
    http: Client,
    base_url: String,
}

impl HttpBurgerApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

fn authorized(builder: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
    match access_token {
        Some(token) => builder.bearer_auth(strip_bearer(token)),
        None => builder,
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.json::<ApiErrorBody>().await.unwrap_or_default();
        return Err(ApiError::Rejected {
            status: status.as_u16(),
            message: body.message().map(str::to_string),
        });
    }

    let bytes = response.bytes().await?;
    // The API reports some failures as 200 with `success: false`.
    if let Ok(body) = serde_json::from_slice::<ApiErrorBody>(&bytes) {
        if body.success == Some(false) {
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: body.message().map(str::to_string),
            });
        }
    }
    serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
}

#[async_trait]
impl BurgerApi for HttpBurgerApi {
    async fn fetch_ingredients(&self) -> Result<Vec<Component>, ApiError> {
        let response = self.http.get(self.url("ingredients")).send().await?;
        let body: IngredientsResponse = read_json(response).await?;
        Ok(body.data)
    }

    async fn fetch_feed(&self) -> Result<FeedFrame, ApiError> {
        let response = self.http.get(self.url("orders/all")).send().await?;
        read_json(response).await
    }

    async fn submit_order(
        &self,
        ingredients: &[ComponentId],
        access_token: Option<&str>,
    ) -> Result<Order, ApiError> {
        let request = authorized(self.http.post(self.url("orders")), access_token).json(
            &CreateOrderRequest {
                ingredients: ingredients.to_vec(),
            },
        );
        let body: CreateOrderResponse = read_json(request.send().await?).await?;
        Ok(body.order)
    }

    async fn fetch_user_orders(&self, access_token: Option<&str>) -> Result<Vec<Order>, ApiError> {
        let request = authorized(self.http.get(self.url("orders")), access_token);
        let body: OrdersResponse = read_json(request.send().await?).await?;
        Ok(body.orders)
    }

    async fn order_by_number(&self, number: OrderNumber) -> Result<Option<Order>, ApiError> {
        let response = self
            .http
            .get(self.url(&format!("orders/{}", number.0)))
            .send()
            .await?;
        let body: OrdersResponse = read_json(response).await?;
        Ok(body.orders.into_iter().next())
    }

    async fn login(&self, request: LoginRequest) -> Result<AuthGrant, ApiError> {
        let response = self
            .http
            .post(self.url("auth/login"))
            .json(&request)
            .send()
            .await?;
        let body: AuthResponse = read_json(response).await?;
        Ok(body.into())
    }

    async fn register(&self, request: RegisterRequest) -> Result<AuthGrant, ApiError> {
        let response = self
            .http
            .post(self.url("auth/register"))
            .json(&request)
            .send()
            .await?;
        let body: AuthResponse = read_json(response).await?;
        Ok(body.into())
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, ApiError> {
        let request = authorized(self.http.get(self.url("auth/user")), Some(access_token));
        let body: UserResponse = read_json(request.send().await?).await?;
        Ok(body.user)
    }

    async fn update_user(
        &self,
        access_token: &str,
        request: UpdateUserRequest,
    ) -> Result<User, ApiError> {
        let builder =
            authorized(self.http.patch(self.url("auth/user")), Some(access_token)).json(&request);
        let body: UserResponse = read_json(builder.send().await?).await?;
        Ok(body.user)
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.url("auth/logout"))
            .json(&LogoutRequest {
                token: refresh_token.to_string(),
            })
            .send()
            .await?;
        let _: ApiErrorBody = read_json(response).await?;
        Ok(())
    }
}

//! Authenticated broker REST client.

use super::traits::BrokerApi;
use super::types::*;
use crate::config::BrokerConfig;
use crate::error::{Result, TradingError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, instrument};

const API_KEY_HEADER: &str = "X-IG-API-KEY";
const SECURITY_TOKEN_HEADER: &str = "X-SECURITY-TOKEN";
const CST_HEADER: &str = "CST";
const JSON_CONTENT: &str = "application/json; charset=UTF-8";

/// Endpoint families and the API contract version each one expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Login,
    SearchMarkets,
    MarketDetails,
    Accounts,
    Positions,
    ManagePosition,
    ClosePosition,
}

impl Endpoint {
    /// Value of the `Version` header.
    pub fn version(self) -> &'static str {
        match self {
            Endpoint::SearchMarkets | Endpoint::Accounts | Endpoint::ClosePosition => "1",
            Endpoint::Login | Endpoint::Positions | Endpoint::ManagePosition => "2",
            Endpoint::MarketDetails => "3",
        }
    }

    /// Closing is a POST tunnelled as DELETE, since DELETE bodies are not portable.
    fn method_override(self) -> Option<&'static str> {
        match self {
            Endpoint::ClosePosition => Some("DELETE"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionTokens {
    cst: String,
    security_token: String,
}

/// Broker session: logs in once, then signs every call with both tokens.
#[derive(Debug, Clone)]
pub struct SessionClient {
    http: Client,
    root_endpoint: String,
    api_key: String,
    account_id: String,
    tokens: SessionTokens,
}

impl SessionClient {
    /// Authenticate with the broker and hold the resulting session.
    #[instrument(skip(config), fields(root = %config.root_endpoint))]
    pub async fn login(config: &BrokerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let root_endpoint = config.root_endpoint.trim_end_matches('/').to_string();
        let url = format!("{}/session", root_endpoint);

        let response = http
            .post(&url)
            .header("Content-Type", JSON_CONTENT)
            .header("Accept", JSON_CONTENT)
            .header(API_KEY_HEADER, &config.api_key)
            .header("Version", Endpoint::Login.version())
            .json(&LoginRequest {
                identifier: &config.identifier,
                password: &config.password,
            })
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(TradingError::request(status.as_u16(), body));
        }

        let header = |name: &str| -> Result<String> {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| TradingError::Authentication(format!("login response missing {name}")))
        };
        let tokens = SessionTokens {
            cst: header(CST_HEADER)?,
            security_token: header(SECURITY_TOKEN_HEADER)?,
        };

        info!(account_id = %config.account_id, "Broker session established");

        Ok(Self {
            http,
            root_endpoint,
            api_key: config.api_key.clone(),
            account_id: config.account_id.clone(),
            tokens,
        })
    }

    /// Account this session trades on.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.root_endpoint, path.trim_start_matches('/'))
    }

    /// Common session headers plus the endpoint's version.
    fn authorize(&self, builder: RequestBuilder, endpoint: Endpoint) -> RequestBuilder {
        let builder = builder
            .header("Content-Type", JSON_CONTENT)
            .header("Accept", JSON_CONTENT)
            .header(API_KEY_HEADER, &self.api_key)
            .header(SECURITY_TOKEN_HEADER, &self.tokens.security_token)
            .header(CST_HEADER, &self.tokens.cst)
            .header("Version", endpoint.version());

        match endpoint.method_override() {
            Some(method) => builder.header("_method", method),
            None => builder,
        }
    }

    /// Authenticated GET.
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = self.url(path);
        debug!(%url, version = endpoint.version(), "GET");

        let response = self
            .authorize(self.http.get(&url), endpoint)
            .query(query)
            .send()
            .await?;

        Self::handle_response(response, StatusCode::OK).await
    }

    /// Authenticated POST with a JSON body.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: Endpoint,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        debug!(%url, version = endpoint.version(), "POST");

        let response = self
            .authorize(self.http.post(&url), endpoint)
            .json(body)
            .send()
            .await?;

        Self::handle_response(response, StatusCode::OK).await
    }

    /// Authenticated PUT with a JSON body.
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: Endpoint,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        debug!(%url, version = endpoint.version(), "PUT");

        let response = self
            .authorize(self.http.put(&url), endpoint)
            .json(body)
            .send()
            .await?;

        Self::handle_response(response, StatusCode::OK).await
    }

    /// Authenticated DELETE with a JSON body.
    pub async fn delete<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: Endpoint,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        debug!(%url, version = endpoint.version(), "DELETE");

        let response = self
            .authorize(self.http.delete(&url), endpoint)
            .json(body)
            .send()
            .await?;

        Self::handle_response(response, StatusCode::OK).await
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
        expected: StatusCode,
    ) -> Result<T> {
        let status = response.status();
        if status != expected {
            let body = response.text().await.unwrap_or_default();
            return Err(TradingError::request(status.as_u16(), body));
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl BrokerApi for SessionClient {
    #[instrument(skip(self))]
    async fn search_markets(&self, term: &str) -> Result<Vec<MarketSummary>> {
        let response: MarketSearchResponse = self
            .get(Endpoint::SearchMarkets, "markets", &[("searchTerm", term)])
            .await?;
        Ok(response.markets)
    }

    #[instrument(skip(self))]
    async fn market_details(&self, epic: &str) -> Result<Market> {
        let path = format!("markets/{}", urlencoding::encode(epic));
        self.get(Endpoint::MarketDetails, &path, &[]).await
    }

    #[instrument(skip(self))]
    async fn accounts(&self) -> Result<Vec<Account>> {
        let response: AccountsResponse = self.get(Endpoint::Accounts, "accounts", &[]).await?;
        Ok(response.accounts)
    }

    #[instrument(skip(self))]
    async fn open_positions(&self) -> Result<Vec<OpenPositionEntry>> {
        let response: PositionsResponse = self.get(Endpoint::Positions, "positions", &[]).await?;
        Ok(response.positions)
    }

    #[instrument(skip(self, order), fields(epic = %order.epic, size = %order.size))]
    async fn create_position(&self, order: &OpenPositionRequest) -> Result<DealReference> {
        self.post(Endpoint::ManagePosition, "positions/otc", order)
            .await
    }

    #[instrument(skip(self, request))]
    async fn update_position(
        &self,
        deal_id: &str,
        request: &TrailingStopRequest,
    ) -> Result<DealReference> {
        let path = format!("positions/otc/{}", urlencoding::encode(deal_id));
        self.put(Endpoint::ManagePosition, &path, request).await
    }

    #[instrument(skip(self, request), fields(deal_id = %request.deal_id))]
    async fn close_position(&self, request: &ClosePositionRequest) -> Result<DealReference> {
        self.post(Endpoint::ClosePosition, "positions/otc", request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn broker_config(root: &str) -> BrokerConfig {
        BrokerConfig {
            api_key: "api-key".to_string(),
            identifier: "trader".to_string(),
            password: "secret".to_string(),
            account_id: "ABC123".to_string(),
            root_endpoint: format!("{}/gateway/deal/", root),
            timeout_secs: 5,
        }
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/gateway/deal/session"))
            .and(header("X-IG-API-KEY", "api-key"))
            .and(header("Version", "2"))
            .and(body_partial_json(json!({ "identifier": "trader", "password": "secret" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("CST", "cst-token")
                    .insert_header("X-SECURITY-TOKEN", "security-token")
                    .set_body_json(json!({ "currentAccountId": "ABC123" })),
            )
            .mount(server)
            .await;
    }

    #[test]
    fn test_endpoint_versions() {
        assert_eq!(Endpoint::Login.version(), "2");
        assert_eq!(Endpoint::SearchMarkets.version(), "1");
        assert_eq!(Endpoint::MarketDetails.version(), "3");
        assert_eq!(Endpoint::Accounts.version(), "1");
        assert_eq!(Endpoint::Positions.version(), "2");
        assert_eq!(Endpoint::ManagePosition.version(), "2");
        assert_eq!(Endpoint::ClosePosition.version(), "1");
    }

    #[tokio::test]
    async fn test_login_captures_tokens() {
        let server = MockServer::start().await;
        mount_login(&server).await;

        Mock::given(method("GET"))
            .and(path("/gateway/deal/positions"))
            .and(header("CST", "cst-token"))
            .and(header("X-SECURITY-TOKEN", "security-token"))
            .and(header("Version", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "positions": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SessionClient::login(&broker_config(&server.uri())).await.unwrap();
        assert_eq!(client.account_id(), "ABC123");

        let positions = client.open_positions().await.unwrap();
        assert!(positions.is_empty());
    }

    #[tokio::test]
    async fn test_login_without_tokens_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gateway/deal/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let err = SessionClient::login(&broker_config(&server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_rejected_login_is_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gateway/deal/session"))
            .respond_with(ResponseTemplate::new(401).set_body_string("error.security.invalid-details"))
            .mount(&server)
            .await;

        let err = SessionClient::login(&broker_config(&server.uri()))
            .await
            .unwrap_err();
        match err {
            TradingError::Request { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "error.security.invalid-details");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_search_sends_term_and_version() {
        let server = MockServer::start().await;
        mount_login(&server).await;

        Mock::given(method("GET"))
            .and(path("/gateway/deal/markets"))
            .and(query_param("searchTerm", "BTC"))
            .and(header("Version", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "markets": [{ "epic": "CS.D.BITCOIN.CFD.IP", "instrumentName": "Bitcoin" }]
            })))
            .mount(&server)
            .await;

        let client = SessionClient::login(&broker_config(&server.uri())).await.unwrap();
        let markets = client.search_markets("BTC").await.unwrap();

        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].epic, "CS.D.BITCOIN.CFD.IP");
    }

    #[tokio::test]
    async fn test_non_success_status_is_surfaced() {
        let server = MockServer::start().await;
        mount_login(&server).await;

        Mock::given(method("GET"))
            .and(path("/gateway/deal/accounts"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let client = SessionClient::login(&broker_config(&server.uri())).await.unwrap();
        let err = client.accounts().await.unwrap_err();

        assert!(matches!(err, TradingError::Request { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_close_is_tunnelled_delete() {
        let server = MockServer::start().await;
        mount_login(&server).await;

        Mock::given(method("POST"))
            .and(path("/gateway/deal/positions/otc"))
            .and(header("_method", "DELETE"))
            .and(header("Version", "1"))
            .and(body_partial_json(json!({
                "dealId": "DIAAAA", "size": 2.0, "direction": "BUY", "orderType": "MARKET"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "dealReference": "CLOSE1" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SessionClient::login(&broker_config(&server.uri())).await.unwrap();
        let reference = client
            .close_position(&ClosePositionRequest {
                deal_id: "DIAAAA".to_string(),
                size: dec!(2),
                direction: Direction::Buy,
                order_type: OrderType::Market,
            })
            .await
            .unwrap();

        assert_eq!(reference.deal_reference, "CLOSE1");
    }

    #[tokio::test]
    async fn test_update_targets_deal_id() {
        let server = MockServer::start().await;
        mount_login(&server).await;

        Mock::given(method("PUT"))
            .and(path("/gateway/deal/positions/otc/DIAAAA"))
            .and(header("Version", "2"))
            .and(body_partial_json(json!({ "trailingStop": true, "stopLevel": 52500.0 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "dealReference": "UPD1" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SessionClient::login(&broker_config(&server.uri())).await.unwrap();
        let request = TrailingStopRequest {
            trailing_stop: true,
            trailing_stop_distance: dec!(1150),
            trailing_stop_increment: dec!(500),
            stop_level: dec!(52500),
            limit_level: None,
        };
        let reference = client.update_position("DIAAAA", &request).await.unwrap();

        assert_eq!(reference.deal_reference, "UPD1");
    }
}

//! Reddit OAuth client implementing [`CommunityGateway`].

use std::time::Duration;

use ada_common::{AppError, AppResult, RedditConfig};
use ada_core::{
    Account, AccountActivity, AccountStanding, ActivityItem, Checkpoint, CommunityGateway,
    CommunityName, ModLogEntry,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::api::{
    self, JsonEnvelope, Listing, Me, ModLogItem, Subreddit, TokenResponse, UserAbout, UserItem,
    UserList, WikiPage,
};
use crate::rate_limit::{RateLimitConfig, RateLimiter};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com/";

/// Page size Reddit allows on listings.
const PAGE_LIMIT: usize = 100;
/// Mod-log entries read for a community without a checkpoint.
const LOG_BACKFILL: usize = 500;
/// Reddit stops paginating listings around this depth.
const LOG_SCAN_LIMIT: usize = 1000;
const SUBMISSION_LIMIT: usize = 100;
const COMMENT_LIMIT: usize = 250;

/// Renew tokens this long before Reddit expires them.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Classify a non-success HTTP status.
fn status_error(status: StatusCode, what: &str, body: &str) -> AppError {
    let message = format!("{what}: HTTP {} {}", status.as_u16(), body.trim());
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        AppError::TransientGateway(message)
    } else if status == StatusCode::NOT_FOUND {
        AppError::NotFound(message)
    } else {
        AppError::PermanentAction(message)
    }
}

fn network_error(what: &str, err: &reqwest::Error) -> AppError {
    AppError::TransientGateway(format!("{what}: {err}"))
}

fn header_f64(response: &Response, name: &str) -> Option<f64> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Reddit client for a script-type OAuth app.
pub struct RedditGateway {
    client: Client,
    config: RedditConfig,
    base: Url,
    limiter: RateLimiter,
    token: Mutex<Option<AccessToken>>,
}

impl RedditGateway {
    /// Create a client from credentials.
    pub fn new(config: &RedditConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| AppError::Config(format!("HTTP client: {e}")))?;
        let base = Url::parse(API_BASE).map_err(|e| AppError::Config(e.to_string()))?;
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: config.requests_per_window,
            window: Duration::from_secs(config.window_secs),
        });

        Ok(Self {
            client,
            config: config.clone(),
            base,
            limiter,
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> AppResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| AppError::Internal(format!("bad endpoint {path}: {e}")))
    }

    /// Current bearer token, fetched with the password grant when missing or
    /// about to expire.
    async fn access_token(&self) -> AppResult<String> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref()
            && current.expires_at > Instant::now() + TOKEN_SLACK
        {
            return Ok(current.value.clone());
        }

        tracing::debug!(username = %self.config.username, "Requesting access token");
        self.limiter.acquire().await?;
        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| network_error("token", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status_error(status, "token", &body) {
                AppError::PermanentAction(m) | AppError::NotFound(m) => AppError::Config(m),
                other => other,
            });
        }
        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| network_error("token", &e))?;
        let Some(value) = parsed.access_token else {
            let reason = parsed.error.unwrap_or_else(|| "no token".to_string());
            return Err(AppError::Config(format!("Reddit login failed: {reason}")));
        };

        tracing::info!(username = %self.config.username, "Authenticated with Reddit");
        *token = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(parsed.expires_in),
        });
        Ok(value)
    }

    /// Send an authorized request after spending one unit of budget.
    async fn send(&self, what: &str, request: RequestBuilder) -> AppResult<Response> {
        let token = self.access_token().await?;
        self.limiter.acquire().await?;

        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| network_error(what, &e))?;

        if let (Some(remaining), Some(reset)) = (
            header_f64(&response, "x-ratelimit-remaining"),
            header_f64(&response, "x-ratelimit-reset"),
        ) {
            self.limiter
                .observe(remaining, Duration::from_secs_f64(reset.max(0.0)))
                .await;
        }
        if response.status() == StatusCode::UNAUTHORIZED {
            self.token.lock().await.take();
            return Err(AppError::TransientGateway(format!(
                "{what}: access token rejected"
            )));
        }
        Ok(response)
    }

    /// Send a request and decode a successful JSON body.
    async fn json<T: DeserializeOwned>(
        &self,
        what: &str,
        request: RequestBuilder,
    ) -> AppResult<T> {
        let response = self.send(what, request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, what, &body));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::TransientGateway(format!("{what}: bad response: {e}")))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        what: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        let url = self.endpoint(path)?;
        self.json(what, self.client.get(url).query(&[("raw_json", "1")]).query(query))
            .await
    }

    /// POST an `api_type=json` form and surface its embedded errors.
    async fn post_form(&self, what: &str, path: &str, form: &[(&str, &str)]) -> AppResult<()> {
        let url = self.endpoint(path)?;
        let mut fields: Vec<(&str, &str)> = vec![("api_type", "json")];
        fields.extend_from_slice(form);
        let envelope: JsonEnvelope = self
            .json(what, self.client.post(url).form(&fields))
            .await?;
        match envelope.first_error() {
            Some(error) if error.starts_with("RATELIMIT") => {
                Err(AppError::TransientGateway(format!("{what}: {error}")))
            }
            Some(error) => Err(AppError::PermanentAction(format!("{what}: {error}"))),
            None => Ok(()),
        }
    }

    /// Walk a listing until `limit` items are read or `keep_going` rejects
    /// an item.
    async fn paginate<T, F>(
        &self,
        what: &str,
        path: &str,
        query: &[(&str, String)],
        limit: usize,
        mut keep_going: F,
    ) -> AppResult<Vec<T>>
    where
        T: DeserializeOwned,
        F: FnMut(&T) -> bool,
    {
        let mut items = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut params = query.to_vec();
            params.push(("limit", PAGE_LIMIT.min(limit - items.len()).to_string()));
            if let Some(cursor) = &after {
                params.push(("after", cursor.clone()));
            }
            let listing: Listing<T> = self.get(what, path, &params).await?;
            let page_len = listing.data.children.len();
            for thing in listing.data.children {
                if !keep_going(&thing.data) {
                    return Ok(items);
                }
                items.push(thing.data);
                if items.len() >= limit {
                    return Ok(items);
                }
            }
            match listing.data.after {
                Some(next) if page_len > 0 => after = Some(next),
                _ => return Ok(items),
            }
        }
    }

    async fn user_items(
        &self,
        account: &Account,
        kind: &str,
        limit: usize,
    ) -> AppResult<Vec<ActivityItem>> {
        let path = format!("user/{}/{kind}", account.display_name());
        let items: Vec<UserItem> = self
            .paginate(kind, &path, &[("sort", "new".to_string())], limit, |_| true)
            .await?;
        Ok(items.into_iter().map(UserItem::into_activity).collect())
    }
}

/// Whether a scan from a checkpoint stopped at `limit` without reaching the
/// checkpoint. Backfills of new communities are capped on purpose.
fn scan_truncated(read: usize, limit: usize, since: Option<Checkpoint>) -> bool {
    since.is_some() && read >= limit
}

fn is_page_too_large(error: &AppError) -> bool {
    match error {
        AppError::PermanentAction(message) => {
            message.contains("HTTP 413")
                || message.contains("HTTP 403")
                || message.contains("TOO_LONG")
                || message.contains("TOO_LARGE")
        }
        _ => false,
    }
}

#[async_trait]
impl CommunityGateway for RedditGateway {
    async fn bot_account(&self) -> AppResult<Account> {
        let me: Me = self.get("me", "api/v1/me", &[]).await?;
        Account::parse(&me.name)
    }

    async fn list_moderated_communities(&self) -> AppResult<Vec<CommunityName>> {
        let subreddits: Vec<Subreddit> = self
            .paginate("moderated", "subreddits/mine/moderator", &[], usize::MAX, |_| true)
            .await?;
        Ok(api::communities(subreddits))
    }

    async fn list_moderators(&self, community: &CommunityName) -> AppResult<Vec<Account>> {
        let path = format!("r/{}/about/moderators", community.display_name());
        let list: UserList = self.get("moderators", &path, &[]).await?;
        Ok(list
            .data
            .children
            .into_iter()
            .filter_map(|entry| Account::parse(&entry.name).ok())
            .collect())
    }

    async fn list_moderation_log(
        &self,
        community: &CommunityName,
        since: Option<Checkpoint>,
    ) -> AppResult<Vec<ModLogEntry>> {
        let path = format!("r/{}/about/log", community.display_name());
        let query = [("type", "banuser".to_string())];
        let limit = if since.is_some() { LOG_SCAN_LIMIT } else { LOG_BACKFILL };
        // The log is newest first, so stop at the first entry at or before
        // the checkpoint.
        let items: Vec<ModLogItem> = self
            .paginate("moderation log", &path, &query, limit, |item: &ModLogItem| {
                since.is_none_or(|checkpoint| {
                    api::timestamp(item.created_utc).is_ok_and(|at| checkpoint.precedes(at))
                })
            })
            .await?;

        if scan_truncated(items.len(), limit, since) {
            tracing::warn!(
                community = %community,
                read = items.len(),
                oldest = ?items.last().map(|i| i.created_utc),
                checkpoint = ?since.map(|c| c.0),
                "Moderation log scan hit its limit before the checkpoint, older bans are not propagated"
            );
        }

        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let id = item.id.clone();
            match item.into_entry() {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    community = %community,
                    id = %id,
                    error = %e,
                    "Skipping unreadable log entry"
                ),
            }
        }
        Ok(entries)
    }

    async fn is_banned(&self, community: &CommunityName, account: &Account) -> AppResult<bool> {
        let path = format!("r/{}/about/banned", community.display_name());
        let list: UserList = self
            .get("banned", &path, &[("user", account.display_name().to_string())])
            .await?;
        Ok(list
            .data
            .children
            .iter()
            .any(|entry| entry.name.eq_ignore_ascii_case(account.as_str())))
    }

    async fn apply_ban(
        &self,
        community: &CommunityName,
        account: &Account,
        note: &str,
    ) -> AppResult<()> {
        let path = format!("r/{}/api/friend", community.display_name());
        self.post_form(
            "ban",
            &path,
            &[
                ("type", "banned"),
                ("name", account.display_name()),
                ("note", note),
            ],
        )
        .await
        .map_err(|e| match e {
            AppError::NotFound(m) => AppError::PermanentAction(m),
            other => other,
        })
    }

    async fn read_page(
        &self,
        community: &CommunityName,
        page_id: &str,
    ) -> AppResult<Option<String>> {
        let path = format!("r/{}/wiki/{page_id}", community.display_name());
        match self.get::<WikiPage>("read page", &path, &[]).await {
            Ok(page) => Ok(Some(page.data.content_md)),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_page(
        &self,
        community: &CommunityName,
        page_id: &str,
        text: &str,
        reason: &str,
    ) -> AppResult<()> {
        let path = format!("r/{}/api/wiki/edit", community.display_name());
        let url = self.endpoint(&path)?;
        let request = self
            .client
            .post(url)
            .form(&[("page", page_id), ("content", text), ("reason", reason)]);
        let response = self.send("write page", request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let error = status_error(status, "write page", &body);
        if is_page_too_large(&error) {
            tracing::warn!(
                community = %community,
                page = %page_id,
                "Page write rejected as too large"
            );
            return Err(AppError::PageTooLarge(format!("r/{community}/wiki/{page_id}")));
        }
        Err(error)
    }

    async fn send_message(&self, recipient: &Account, subject: &str, body: &str) -> AppResult<()> {
        self.post_form(
            "message",
            "api/compose",
            &[
                ("to", recipient.display_name()),
                ("subject", subject),
                ("text", body),
            ],
        )
        .await
    }

    async fn message_community(
        &self,
        community: &CommunityName,
        subject: &str,
        body: &str,
    ) -> AppResult<()> {
        let to = format!("/r/{}", community.display_name());
        self.post_form(
            "modmail",
            "api/compose",
            &[("to", to.as_str()), ("subject", subject), ("text", body)],
        )
        .await
    }

    async fn account_activity(&self, account: &Account) -> AppResult<AccountStanding> {
        let path = format!("user/{}/about", account.display_name());
        let about = match self.get::<UserAbout>("profile", &path, &[]).await {
            Ok(about) => about.data,
            Err(AppError::NotFound(_)) => return Ok(AccountStanding::ShadowBanned),
            Err(AppError::PermanentAction(m)) if m.contains("HTTP 403") => {
                return Ok(AccountStanding::Suspended);
            }
            Err(e) => return Err(e),
        };
        if about.is_suspended {
            return Ok(AccountStanding::Suspended);
        }

        let submissions = self.user_items(account, "submitted", SUBMISSION_LIMIT).await?;
        let comments = self.user_items(account, "comments", COMMENT_LIMIT).await?;
        Ok(AccountStanding::Visible(AccountActivity {
            created_at: api::timestamp(about.created_utc)?,
            link_karma: about.link_karma,
            comment_karma: about.comment_karma,
            verified_email: about.has_verified_email.unwrap_or(false),
            submissions,
            comments,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> RedditConfig {
        RedditConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            username: "ada_bot".to_string(),
            password: "hunter2".to_string(),
            user_agent: "ada-rs/test".to_string(),
            requests_per_window: 60,
            window_secs: 60,
        }
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, "ban", ""),
            AppError::TransientGateway(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "ban", ""),
            AppError::TransientGateway(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "page", ""),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "ban", "USER_DOESNT_EXIST"),
            AppError::PermanentAction(_)
        ));
    }

    #[test]
    fn test_page_too_large_detection() {
        let too_large = status_error(StatusCode::PAYLOAD_TOO_LARGE, "write page", "");
        assert!(is_page_too_large(&too_large));
        let too_long = status_error(StatusCode::BAD_REQUEST, "write page", "WIKI_TOO_LONG");
        assert!(is_page_too_large(&too_long));
        let outage = status_error(StatusCode::BAD_GATEWAY, "write page", "");
        assert!(!is_page_too_large(&outage));
    }

    #[test]
    fn test_scan_truncation() {
        let checkpoint = Some(Checkpoint(chrono::Utc::now()));
        assert!(scan_truncated(LOG_SCAN_LIMIT, LOG_SCAN_LIMIT, checkpoint));
        assert!(!scan_truncated(LOG_SCAN_LIMIT - 1, LOG_SCAN_LIMIT, checkpoint));
        assert!(!scan_truncated(LOG_BACKFILL, LOG_BACKFILL, None));
    }

    #[test]
    fn test_endpoints_resolve_against_oauth_host() {
        let gateway = RedditGateway::new(&config()).unwrap();
        let url = gateway.endpoint("/r/AdaList/wiki/ada_config").unwrap();
        assert_eq!(url.as_str(), "https://oauth.reddit.com/r/AdaList/wiki/ada_config");
        let url = gateway.endpoint("api/compose").unwrap();
        assert_eq!(url.as_str(), "https://oauth.reddit.com/api/compose");
    }
}

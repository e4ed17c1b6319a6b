use std::future::Future;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::config::RedditCredentials;
use crate::error::{EtlError, Result};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_URL: &str = "https://oauth.reddit.com";

// Reddit refuses larger listing pages
const MAX_PAGE_SIZE: u32 = 100;

const TIME_FILTERS: [&str; 6] = ["hour", "day", "week", "month", "year", "all"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sort {
    Hot,
    New,
    Rising,
    Top(String),
    Controversial(String),
}

impl Sort {
    pub fn parse(sort: &str, time_filter: Option<&str>) -> Result<Self> {
        let filter = time_filter.unwrap_or("week").to_ascii_lowercase();
        if !TIME_FILTERS.contains(&filter.as_str()) {
            return Err(EtlError::Config(format!("unknown time filter '{filter}'")));
        }

        match sort.to_ascii_lowercase().as_str() {
            "hot" => Ok(Sort::Hot),
            "new" => Ok(Sort::New),
            "rising" => Ok(Sort::Rising),
            "top" => Ok(Sort::Top(filter)),
            "controversial" => Ok(Sort::Controversial(filter)),
            other => Err(EtlError::Config(format!("unknown sort order '{other}'"))),
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Sort::Hot => "hot",
            Sort::New => "new",
            Sort::Rising => "rising",
            Sort::Top(_) => "top",
            Sort::Controversial(_) => "controversial",
        }
    }

    fn time_filter(&self) -> Option<&str> {
        match self {
            Sort::Top(t) | Sort::Controversial(t) => Some(t.as_str()),
            _ => None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub subreddit: String,
    pub author: String,
    pub score: i64,
    pub num_comments: i64,
    pub url: String,
    pub created_utc: i64,
}

#[derive(Deserialize, Debug)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize, Debug)]
struct ListingData {
    children: Vec<ListingChild>,
    after: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ListingChild {
    data: RawPost,
}

#[derive(Deserialize, Debug)]
struct RawPost {
    id: String,
    title: String,
    subreddit: String,
    #[serde(default)]
    author: String,
    score: i64,
    num_comments: i64,
    #[serde(default)]
    url: String,
    created_utc: f64,
}

impl From<RawPost> for Post {
    fn from(raw: RawPost) -> Self {
        Self {
            id: raw.id,
            title: raw.title,
            subreddit: raw.subreddit,
            author: raw.author,
            score: raw.score,
            num_comments: raw.num_comments,
            url: raw.url,
            created_utc: raw.created_utc as i64,
        }
    }
}

/// One listing page and the cursor of the page after it, if any.
#[derive(Debug)]
struct Page {
    posts: Vec<Post>,
    after: Option<String>,
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

#[async_trait]
pub trait PostSource: Send + Sync {
    async fn fetch_posts(&self, subreddit: &str, limit: u32, sort: &Sort) -> Result<Vec<Post>>;
}

pub struct RedditClient {
    http: Client,
    credentials: RedditCredentials,
    token: OnceCell<String>,
}

impl RedditClient {
    pub fn new(http: Client, credentials: RedditCredentials) -> Self {
        Self {
            http,
            credentials,
            token: OnceCell::new(),
        }
    }

    async fn token(&self) -> Result<&str> {
        let token = self
            .token
            .get_or_try_init(|| self.request_token())
            .await?;
        Ok(token.as_str())
    }

    async fn request_token(&self) -> Result<String> {
        if !self.credentials.is_complete() {
            return Err(EtlError::Authentication(
                "reddit client id, secret and user agent must all be set".to_owned(),
            ));
        }

        let resp = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .header("user-agent", &self.credentials.user_agent)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        check_status(resp.status())?;

        let token: AccessToken = resp.json().await?;
        tracing::info!("connected to reddit");
        Ok(token.access_token)
    }

    async fn fetch_page(
        &self,
        url: &str,
        size: u32,
        sort: &Sort,
        after: Option<&str>,
    ) -> Result<Page> {
        let token = self.token().await?;

        let mut query = vec![("limit", size.to_string())];
        if let Some(t) = sort.time_filter() {
            query.push(("t", t.to_owned()));
        }
        if let Some(after) = after {
            query.push(("after", after.to_owned()));
        }

        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .header("accept", "application/json")
            .header("user-agent", &self.credentials.user_agent)
            .query(&query)
            .send()
            .await?;
        check_status(resp.status())?;

        let body = resp.bytes().await?;
        parse_listing(&body)
    }
}

#[async_trait]
impl PostSource for RedditClient {
    async fn fetch_posts(&self, subreddit: &str, limit: u32, sort: &Sort) -> Result<Vec<Post>> {
        let url = format!("{API_URL}/r/{subreddit}/{}", sort.path());
        let posts = collect_pages(limit, |size, after| {
            let url = url.as_str();
            async move { self.fetch_page(url, size, sort, after.as_deref()).await }
        })
        .await?;

        tracing::info!("fetched {} posts from r/{subreddit}", posts.len());
        Ok(posts)
    }
}

/// Follows `after` cursors until `limit` posts are collected or the listing runs out.
async fn collect_pages<F, Fut>(limit: u32, mut fetch: F) -> Result<Vec<Post>>
where
    F: FnMut(u32, Option<String>) -> Fut,
    Fut: Future<Output = Result<Page>>,
{
    let limit = limit as usize;
    let mut posts = Vec::new();
    let mut after = None;

    while posts.len() < limit {
        let size = (limit - posts.len()).min(MAX_PAGE_SIZE as usize) as u32;
        let page = fetch(size, after.take()).await?;
        let exhausted = page.posts.is_empty();
        posts.extend(page.posts);

        after = page.after;
        if exhausted || after.is_none() {
            break;
        }
    }
    posts.truncate(limit);

    Ok(posts)
}

fn check_status(status: StatusCode) -> Result<()> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(EtlError::Authentication(
            format!("reddit rejected the credentials ({status})"),
        )),
        s => Err(EtlError::Network(format!("reddit responded with {s}"))),
    }
}

fn parse_listing(body: &[u8]) -> Result<Page> {
    let listing: Listing = serde_json::from_slice(body)
        .map_err(|e| EtlError::Network(format!("unexpected reddit listing: {e}")))?;

    Ok(Page {
        posts: listing
            .data
            .children
            .into_iter()
            .map(|c| Post::from(c.data))
            .collect(),
        after: listing.data.after,
    })
}

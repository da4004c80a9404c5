//! Page context supplied by the rendering page.
//!
//! Everything a page used to inject as globals (`BEGIN_EXPE`, `expeName`,
//! `expes`, ...) is collected into one [`PageContext`] built at page
//! initialization and handed to each component.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AppError, AppResult};

/// Query parameters the experiment pages react to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    /// Experiment named in the URL.
    pub expe: Option<String>,
    /// Current trial number.
    pub iteration: Option<u32>,
    /// `begin=true` is present.
    pub begin: bool,
}

impl PageQuery {
    /// Extract `expe`, `iteration` and `begin` from an absolute or
    /// root-relative URL.
    pub fn parse(url: &str) -> Self {
        let parsed = Url::parse(url).or_else(|_| {
            Url::parse("http://localhost/").and_then(|base| base.join(url))
        });

        let Ok(parsed) = parsed else {
            warn!(url = %url, "Unparsable page URL, ignoring query");
            return Self::default();
        };

        let mut query = Self::default();
        for (key, value) in parsed.query_pairs() {
            match &*key {
                "expe" => query.expe = Some(value.into_owned()),
                "iteration" => match value.trim().parse() {
                    Ok(n) => query.iteration = Some(n),
                    Err(_) => warn!(iteration = %value, "Ignoring non-numeric iteration"),
                },
                "begin" => query.begin = value == "true",
                _ => {}
            }
        }
        query
    }

    /// Iteration the next page should carry: current + 1, or 0 when absent.
    pub fn next_iteration(&self) -> u32 {
        self.iteration.map(|i| i.saturating_add(1)).unwrap_or(0)
    }
}

/// Values the host page provides to the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContext {
    /// The experiment has begun (`BEGIN_EXPE`).
    pub begin_expe: bool,
    /// The experiment has ended (`END_EXPE`).
    pub end_expe: bool,
    /// Quit destination (`baseUrl`).
    pub base_url: String,
    /// Destination for the next trial (`expeUrl`).
    pub expe_url: String,
    /// Current experiment (`expeName`).
    pub expe_name: Option<String>,
    /// Server-rendered user identifier (`currentId`).
    pub current_id: Option<String>,
    /// Slug for the statistics route (`EXPE_SLUG`).
    pub expe_slug: Option<String>,
    /// Known experiments (`expes`).
    pub expes: Vec<String>,
    /// Address of the current page.
    pub current_url: String,
    /// Query parameters of `current_url`.
    pub query: PageQuery,
}

impl PageContext {
    /// Create a context for the page at `current_url`.
    pub fn new(current_url: impl Into<String>) -> Self {
        let current_url = current_url.into();
        let query = PageQuery::parse(&current_url);
        Self {
            current_url,
            query,
            ..Self::default()
        }
    }

    /// Set whether the experiment has begun.
    pub fn with_begin(mut self, begin_expe: bool) -> Self {
        self.begin_expe = begin_expe;
        self
    }

    /// Set whether the experiment has ended.
    pub fn with_end(mut self, end_expe: bool) -> Self {
        self.end_expe = end_expe;
        self
    }

    /// Set the quit destination.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the next-trial destination.
    pub fn with_expe_url(mut self, expe_url: impl Into<String>) -> Self {
        self.expe_url = expe_url.into();
        self
    }

    /// Set the current experiment.
    pub fn with_expe_name(mut self, expe_name: impl Into<String>) -> Self {
        self.expe_name = Some(expe_name.into());
        self
    }

    /// Set the server-rendered user id.
    pub fn with_current_id(mut self, current_id: impl Into<String>) -> Self {
        self.current_id = Some(current_id.into());
        self
    }

    /// Set the statistics slug.
    pub fn with_expe_slug(mut self, expe_slug: impl Into<String>) -> Self {
        self.expe_slug = Some(expe_slug.into());
        self
    }

    /// Set the known experiments.
    pub fn with_expes(mut self, expes: Vec<String>) -> Self {
        self.expes = expes;
        self
    }

    /// Set the experiment list from its HTML-escaped JSON rendering.
    pub fn with_escaped_expes(mut self, escaped: &str) -> AppResult<Self> {
        self.expes = decode_expes(escaped)?;
        Ok(self)
    }

    /// Whether this page belongs to a running experiment.
    pub fn is_experiment_page(&self) -> bool {
        !self.expes.is_empty() || self.expe_name.is_some()
    }
}

/// Decode the HTML-entity-escaped JSON list of experiment names.
pub fn decode_expes(escaped: &str) -> AppResult<Vec<String>> {
    let json = unescape_html(escaped.trim());
    serde_json::from_str(&json).map_err(|e| AppError::InvalidPage {
        message: format!("expes is not a JSON list of names: {}", e),
    })
}

fn unescape_html(input: &str) -> String {
    // `&amp;` last so an escaped entity is not decoded twice
    input
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

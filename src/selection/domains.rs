//! Semantic domains and keyword-driven domain inference.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of semantic domains a server can declare.
///
/// Declaration order is significant: it breaks ties between equally scored
/// domains during inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerDomain {
    /// Local files and directories.
    Files,
    /// Version control and code hosting.
    Vcs,
    /// Browsing, fetching and searching the web.
    Web,
    /// Databases, spreadsheets and analytics.
    Data,
    /// Infrastructure, deployment and monitoring.
    Ops,
    /// Email, chat and notifications.
    Comm,
    /// Payments, accounting and markets.
    Finance,
    /// Secrets, scanning and access control.
    Security,
    /// Models, embeddings and inference.
    Ai,
    /// Flights, hotels, maps and weather.
    Travel,
    /// User-defined; never inferred from keywords.
    Custom,
}

impl ServerDomain {
    /// Every domain in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Files,
        Self::Vcs,
        Self::Web,
        Self::Data,
        Self::Ops,
        Self::Comm,
        Self::Finance,
        Self::Security,
        Self::Ai,
        Self::Travel,
        Self::Custom,
    ];

    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Vcs => "vcs",
            Self::Web => "web",
            Self::Data => "data",
            Self::Ops => "ops",
            Self::Comm => "comm",
            Self::Finance => "finance",
            Self::Security => "security",
            Self::Ai => "ai",
            Self::Travel => "travel",
            Self::Custom => "custom",
        }
    }

    /// Returns the curated keyword list used for inference.
    #[must_use]
    pub const fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Files => FILES_KEYWORDS,
            Self::Vcs => VCS_KEYWORDS,
            Self::Web => WEB_KEYWORDS,
            Self::Data => DATA_KEYWORDS,
            Self::Ops => OPS_KEYWORDS,
            Self::Comm => COMM_KEYWORDS,
            Self::Finance => FINANCE_KEYWORDS,
            Self::Security => SECURITY_KEYWORDS,
            Self::Ai => AI_KEYWORDS,
            Self::Travel => TRAVEL_KEYWORDS,
            Self::Custom => &[],
        }
    }
}

impl fmt::Display for ServerDomain {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Error returned when a string names no known domain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown server domain: {0}")]
pub struct ParseServerDomainError(pub String);

impl TryFrom<&str> for ServerDomain {
    type Error = ParseServerDomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|domain| domain.as_str() == normalized)
            .ok_or_else(|| ParseServerDomainError(value.to_owned()))
    }
}

const FILES_KEYWORDS: &[&str] = &[
    "file", "files", "folder", "directory", "directories", "path", "filesystem", "read", "write",
    "save", "open", "document", "documents", "pdf", "csv", "json", "yaml", "text", "copy", "move",
    "rename", "delete", "upload", "download", "archive", "zip", "extract", "disk", "storage",
    "content",
];

const VCS_KEYWORDS: &[&str] = &[
    "git", "github", "gitlab", "bitbucket", "repo", "repository", "commit", "commits", "branch",
    "merge", "pull", "push", "issue", "issues", "pullrequest", "review", "diff", "clone", "tag",
    "release", "fork", "checkout", "rebase", "blame", "changelog",
];

const WEB_KEYWORDS: &[&str] = &[
    "web", "website", "url", "http", "https", "browser", "browse", "page", "html", "scrape",
    "crawl", "fetch", "search", "google", "link", "links", "online", "internet", "site", "api",
    "request", "screenshot", "navigate",
];

const DATA_KEYWORDS: &[&str] = &[
    "data", "database", "sql", "query", "table", "tables", "postgres", "mysql", "sqlite",
    "mongodb", "redis", "spreadsheet", "excel", "analytics", "analysis", "chart", "report",
    "metrics", "dataset", "schema", "record", "records", "column", "rows",
];

const OPS_KEYWORDS: &[&str] = &[
    "deploy", "deployment", "docker", "container", "kubernetes", "k8s", "server", "servers",
    "cloud", "aws", "azure", "gcp", "terraform", "pipeline", "build", "logs", "monitor",
    "monitoring", "alert", "incident", "infrastructure", "cluster", "restart", "uptime",
];

const COMM_KEYWORDS: &[&str] = &[
    "email", "mail", "inbox", "send", "message", "messages", "slack", "discord", "teams", "chat",
    "notify", "notification", "channel", "reply", "contact", "contacts", "calendar", "meeting",
    "invite", "sms", "telegram", "post",
];

const FINANCE_KEYWORDS: &[&str] = &[
    "payment", "payments", "invoice", "invoices", "stripe", "paypal", "bank", "transaction",
    "transactions", "price", "prices", "stock", "stocks", "crypto", "bitcoin", "budget",
    "expense", "expenses", "accounting", "tax", "currency", "revenue", "billing", "refund",
];

const SECURITY_KEYWORDS: &[&str] = &[
    "security", "secure", "secret", "secrets", "password", "passwords", "vulnerability",
    "vulnerabilities", "scan", "audit", "auth", "authentication", "permission", "permissions",
    "encrypt", "encryption", "decrypt", "token", "certificate", "firewall", "cve", "malware",
];

const AI_KEYWORDS: &[&str] = &[
    "llm", "model", "models", "openai", "anthropic", "claude", "gpt", "embedding", "embeddings",
    "inference", "prompt", "completion", "generate", "summarize", "summary", "translate",
    "classify", "vector", "agent", "neural", "training", "finetune",
];

const TRAVEL_KEYWORDS: &[&str] = &[
    "travel", "trip", "flight", "flights", "hotel", "hotels", "booking", "book", "airport",
    "airline", "weather", "forecast", "map", "maps", "route", "directions", "location", "city",
    "destination", "itinerary", "vacation", "train", "restaurant",
];

/// Hit count for a domain inferred from a keyword set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainScore {
    /// Inferred domain.
    pub domain: ServerDomain,
    /// Number of keyword pairs that matched.
    pub hits: usize,
}

/// Scores every domain against `keywords`, keeping only domains with hits.
///
/// A hit is counted for each (keyword, domain keyword) pair where either
/// string contains the other. Results are sorted by descending hit count and
/// ties keep declaration order.
#[must_use]
pub fn score_domains<S: AsRef<str>>(keywords: &[S]) -> Vec<DomainScore> {
    let mut scores: Vec<DomainScore> = ServerDomain::ALL
        .into_iter()
        .map(|domain| DomainScore {
            domain,
            hits: count_hits(keywords, domain.keywords()),
        })
        .filter(|score| score.hits > 0)
        .collect();

    scores.sort_by(|left, right| right.hits.cmp(&left.hits));
    scores
}

/// Infers the ranked list of domains for `keywords`.
///
/// Domains without hits are omitted entirely, so the result may be empty.
#[must_use]
pub fn infer_domains<S: AsRef<str>>(keywords: &[S]) -> Vec<ServerDomain> {
    score_domains(keywords)
        .into_iter()
        .map(|score| score.domain)
        .collect()
}

fn count_hits<S: AsRef<str>>(keywords: &[S], domain_keywords: &[&str]) -> usize {
    keywords
        .iter()
        .map(|keyword| {
            let word = keyword.as_ref();
            domain_keywords
                .iter()
                .filter(|candidate| word.contains(**candidate) || candidate.contains(word))
                .count()
        })
        .sum()
}

/// Position of a server's domain within an inferred ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainMatch {
    rank: Option<usize>,
}

impl DomainMatch {
    /// Returns whether the domain appears in the ranking.
    #[must_use]
    pub const fn matches(self) -> bool {
        self.rank.is_some()
    }

    /// Returns the zero-based rank, or `None` when absent.
    #[must_use]
    pub const fn rank(self) -> Option<usize> {
        self.rank
    }
}

/// Locates `domain` within `inferred`.
///
/// An undefined domain never matches.
#[must_use]
pub fn domain_matches(domain: Option<ServerDomain>, inferred: &[ServerDomain]) -> DomainMatch {
    let rank = domain.and_then(|wanted| inferred.iter().position(|candidate| *candidate == wanted));
    DomainMatch { rank }
}

//! Compiled pattern tables, frozen at first use.
//!
//! Everything here is immutable after initialization and shared without
//! locks across concurrent analyses.

use std::sync::LazyLock;

use regex::{RegexSet, RegexSetBuilder};

/// SQL injection fragments, matched case-insensitively against the
/// serialized query params + body of a request.
pub static SQL_INJECTION: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSetBuilder::new([
        r"SELECT ",
        r"DROP ",
        r"INSERT ",
        r"UPDATE .*SET",
        r"DELETE FROM",
        r"'--",
        r"' OR",
        r"1\s*=\s*1",
        r"/\*",
        r"\*/",
        r"UNION SELECT",
        r"; DROP",
        r"; DELETE",
        r"EXEC(\s|\()",
        r"xp_cmdshell",
        r"WAITFOR DELAY",
        r"BENCHMARK\(",
        r"SLEEP\(",
    ])
    .case_insensitive(true)
    .build()
    .expect("SQL injection pattern set is valid")
});

/// Substrings that mark an automated client. Matched against the
/// lowercased User-Agent.
pub const BOT_INDICATORS: &[&str] = &[
    "bot", "crawler", "spider", "scraper", "python", "axios", "curl", "wget",
    "fetch", "postman", "insomnia", "httpie", "gpt", "claude", "openai",
    "anthropic", "langchain", "autogpt", "agentgpt", "selenium", "puppeteer",
    "playwright", "headless", "phantom",
];

// ── Path taxonomies ─────────────────────────────────────────────────
// Case-insensitive substring match on the full request path.

pub const DOCS_PATHS: &[&str] = &["/docs", "/documentation", "/api-docs", "/swagger"];

pub const OPENAPI_PATHS: &[&str] = &[
    "/openapi",
    "/openapi.json",
    "/openapi.yaml",
    "/swagger.json",
    "/api/schema",
];

pub const ADMIN_PATHS: &[&str] = &[
    "/admin",
    "/api/admin",
    "/dashboard",
    "/internal",
    "/debug",
    "/config",
];

pub const INTERNAL_PATHS: &[&str] = &[
    "/internal",
    "/debug",
    "/shell",
    "/exec",
    "/eval",
    "/.env",
    "/config",
];

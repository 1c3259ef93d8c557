//! Individual search providers.
//!
//! Each provider is an async fetch against a public API, returning its own
//! hits or an error the aggregator tolerates. Responses are decoded as loose
//! JSON so a provider-side schema drift degrades to zero results instead of
//! breaking the build.

use crate::{SearchError, SearchResult};
use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::Value;

type ProviderFuture<'a> = BoxFuture<'a, Result<Vec<SearchResult>, SearchError>>;

/// All live providers for one query.
pub fn all<'a>(client: &'a Client, query: &'a str) -> Vec<(&'static str, ProviderFuture<'a>)> {
    vec![
        ("DuckDuckGo", Box::pin(duckduckgo(client, query))),
        ("Stack Overflow", Box::pin(stack_overflow(client, query))),
        ("GitHub", Box::pin(github(client, query))),
        ("Hacker News", Box::pin(hacker_news(client, query))),
        ("arXiv", Box::pin(arxiv(client, query))),
        ("Open Library", Box::pin(open_library(client, query))),
        ("MDN", Box::pin(mdn(client, query))),
        ("Dictionary", Box::pin(dictionary(client, query))),
    ]
}

fn str_field<'v>(value: &'v Value, key: &str) -> &'v str {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

async fn get_json(client: &Client, url: &str, query: &[(&str, &str)]) -> Result<Value, SearchError> {
    let response = client.get(url).query(query).send().await?;
    if !response.status().is_success() {
        return Err(SearchError::Provider(format!(
            "{} returned {}",
            url,
            response.status()
        )));
    }
    Ok(response.json().await?)
}

async fn duckduckgo(client: &Client, query: &str) -> Result<Vec<SearchResult>, SearchError> {
    let json = get_json(
        client,
        "https://api.duckduckgo.com/",
        &[("q", query), ("format", "json"), ("no_html", "1")],
    )
    .await?;

    let mut results = Vec::new();
    let abstract_text = str_field(&json, "AbstractText");
    let abstract_url = str_field(&json, "AbstractURL");
    if !abstract_text.is_empty() && !abstract_url.is_empty() {
        results.push(SearchResult {
            title: str_field(&json, "Heading").to_string(),
            url: abstract_url.to_string(),
            snippet: abstract_text.to_string(),
            source: "DuckDuckGo".to_string(),
            favicon: None,
        });
    }
    if let Some(topics) = json.get("RelatedTopics").and_then(|t| t.as_array()) {
        for topic in topics.iter().take(3) {
            let text = str_field(topic, "Text");
            let url = str_field(topic, "FirstURL");
            if !text.is_empty() && !url.is_empty() {
                results.push(SearchResult {
                    title: text.chars().take(80).collect(),
                    url: url.to_string(),
                    snippet: text.to_string(),
                    source: "DuckDuckGo".to_string(),
                    favicon: None,
                });
            }
        }
    }
    Ok(results)
}

async fn stack_overflow(client: &Client, query: &str) -> Result<Vec<SearchResult>, SearchError> {
    let json = get_json(
        client,
        "https://api.stackexchange.com/2.3/search/advanced",
        &[
            ("order", "desc"),
            ("sort", "relevance"),
            ("q", query),
            ("site", "stackoverflow"),
            ("pagesize", "5"),
        ],
    )
    .await?;

    let mut results = Vec::new();
    if let Some(items) = json.get("items").and_then(|i| i.as_array()) {
        for item in items {
            let title = str_field(item, "title");
            let link = str_field(item, "link");
            if !title.is_empty() && !link.is_empty() {
                let answered = item
                    .get("is_answered")
                    .and_then(|a| a.as_bool())
                    .unwrap_or(false);
                results.push(SearchResult {
                    title: title.to_string(),
                    url: link.to_string(),
                    snippet: if answered {
                        "Answered question".to_string()
                    } else {
                        "Open question".to_string()
                    },
                    source: "Stack Overflow".to_string(),
                    favicon: Some("https://stackoverflow.com/favicon.ico".to_string()),
                });
            }
        }
    }
    Ok(results)
}

async fn github(client: &Client, query: &str) -> Result<Vec<SearchResult>, SearchError> {
    let json = get_json(
        client,
        "https://api.github.com/search/repositories",
        &[("q", query), ("sort", "stars"), ("per_page", "5")],
    )
    .await?;

    let mut results = Vec::new();
    if let Some(items) = json.get("items").and_then(|i| i.as_array()) {
        for item in items {
            let name = str_field(item, "full_name");
            let url = str_field(item, "html_url");
            if !name.is_empty() && !url.is_empty() {
                results.push(SearchResult {
                    title: name.to_string(),
                    url: url.to_string(),
                    snippet: str_field(item, "description").to_string(),
                    source: "GitHub".to_string(),
                    favicon: Some("https://github.com/favicon.ico".to_string()),
                });
            }
        }
    }
    Ok(results)
}

async fn hacker_news(client: &Client, query: &str) -> Result<Vec<SearchResult>, SearchError> {
    let json = get_json(
        client,
        "https://hn.algolia.com/api/v1/search",
        &[("query", query), ("hitsPerPage", "5")],
    )
    .await?;

    let mut results = Vec::new();
    if let Some(hits) = json.get("hits").and_then(|h| h.as_array()) {
        for hit in hits {
            let title = str_field(hit, "title");
            if title.is_empty() {
                continue;
            }
            let url = match str_field(hit, "url") {
                "" => format!(
                    "https://news.ycombinator.com/item?id={}",
                    str_field(hit, "objectID")
                ),
                url => url.to_string(),
            };
            let points = hit.get("points").and_then(|p| p.as_u64()).unwrap_or(0);
            results.push(SearchResult {
                title: title.to_string(),
                url,
                snippet: format!("{} points on Hacker News", points),
                source: "Hacker News".to_string(),
                favicon: Some("https://news.ycombinator.com/favicon.ico".to_string()),
            });
        }
    }
    Ok(results)
}

async fn arxiv(client: &Client, query: &str) -> Result<Vec<SearchResult>, SearchError> {
    let search_query = format!("all:{}", query);
    let response = client
        .get("https://export.arxiv.org/api/query")
        .query(&[("search_query", search_query.as_str()), ("max_results", "3")])
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(SearchError::Provider(format!(
            "arxiv returned {}",
            response.status()
        )));
    }
    let body = response.text().await?;

    let mut results = Vec::new();
    for entry in extract_tag_bodies(&body, "entry") {
        let title = extract_tag_bodies(&entry, "title")
            .into_iter()
            .next()
            .unwrap_or_default();
        let id = extract_tag_bodies(&entry, "id")
            .into_iter()
            .next()
            .unwrap_or_default();
        let summary = extract_tag_bodies(&entry, "summary")
            .into_iter()
            .next()
            .unwrap_or_default();
        if title.is_empty() || id.is_empty() {
            continue;
        }
        results.push(SearchResult {
            title: collapse_whitespace(&title),
            url: id.trim().to_string(),
            snippet: collapse_whitespace(&summary).chars().take(200).collect(),
            source: "arXiv".to_string(),
            favicon: None,
        });
    }
    Ok(results)
}

async fn open_library(client: &Client, query: &str) -> Result<Vec<SearchResult>, SearchError> {
    let json = get_json(
        client,
        "https://openlibrary.org/search.json",
        &[("q", query), ("limit", "3")],
    )
    .await?;

    let mut results = Vec::new();
    if let Some(docs) = json.get("docs").and_then(|d| d.as_array()) {
        for doc in docs {
            let title = str_field(doc, "title");
            let key = str_field(doc, "key");
            if title.is_empty() || key.is_empty() {
                continue;
            }
            let author = doc
                .get("author_name")
                .and_then(|a| a.as_array())
                .and_then(|a| a.first())
                .and_then(|a| a.as_str())
                .unwrap_or("Unknown author");
            results.push(SearchResult {
                title: title.to_string(),
                url: format!("https://openlibrary.org{}", key),
                snippet: format!("Book by {}", author),
                source: "Open Library".to_string(),
                favicon: None,
            });
        }
    }
    Ok(results)
}

async fn mdn(client: &Client, query: &str) -> Result<Vec<SearchResult>, SearchError> {
    let json = get_json(
        client,
        "https://developer.mozilla.org/api/v1/search",
        &[("q", query), ("locale", "en-US")],
    )
    .await?;

    let mut results = Vec::new();
    if let Some(documents) = json.get("documents").and_then(|d| d.as_array()) {
        for doc in documents.iter().take(3) {
            let title = str_field(doc, "title");
            let mdn_url = str_field(doc, "mdn_url");
            if title.is_empty() || mdn_url.is_empty() {
                continue;
            }
            results.push(SearchResult {
                title: title.to_string(),
                url: format!("https://developer.mozilla.org{}", mdn_url),
                snippet: str_field(doc, "summary").to_string(),
                source: "MDN".to_string(),
                favicon: Some("https://developer.mozilla.org/favicon.ico".to_string()),
            });
        }
    }
    Ok(results)
}

/// Dictionary lookups only make sense for single words.
async fn dictionary(client: &Client, query: &str) -> Result<Vec<SearchResult>, SearchError> {
    let word = query.trim();
    if word.contains(char::is_whitespace) {
        return Ok(Vec::new());
    }
    let url = format!("https://api.dictionaryapi.dev/api/v2/entries/en/{}", word);
    let json = get_json(client, &url, &[]).await?;

    let definition = json
        .as_array()
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.get("meanings"))
        .and_then(|m| m.as_array())
        .and_then(|m| m.first())
        .and_then(|meaning| meaning.get("definitions"))
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|def| def.get("definition"))
        .and_then(|d| d.as_str());

    Ok(match definition {
        Some(definition) => vec![SearchResult {
            title: format!("Definition of \"{}\"", word),
            url: format!("https://en.wiktionary.org/wiki/{}", word),
            snippet: definition.to_string(),
            source: "Dictionary".to_string(),
            favicon: None,
        }],
        None => Vec::new(),
    })
}

/// Static fallback links pointing at the big engines' own result pages.
pub fn direct_links(query: &str) -> Vec<SearchResult> {
    let encoded = percent_encode(query);
    vec![
        SearchResult {
            title: format!("Search Google for \"{}\"", query),
            url: format!("https://www.google.com/search?q={}", encoded),
            snippet: String::new(),
            source: "Direct".to_string(),
            favicon: None,
        },
        SearchResult {
            title: format!("Search Wikipedia for \"{}\"", query),
            url: format!(
                "https://en.wikipedia.org/w/index.php?search={}",
                encoded
            ),
            snippet: String::new(),
            source: "Direct".to_string(),
            favicon: None,
        },
        SearchResult {
            title: format!("Search YouTube for \"{}\"", query),
            url: format!("https://www.youtube.com/results?search_query={}", encoded),
            snippet: String::new(),
            source: "Direct".to_string(),
            favicon: None,
        },
    ]
}

/// Minimal percent-encoding for query strings.
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Extract the bodies of all `<tag>...</tag>` pairs. Enough XML for the
/// arXiv Atom feed; not a general parser.
fn extract_tag_bodies(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut bodies = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let after_open = &rest[start + open.len()..];
        // Skip to the end of the opening tag (attributes allowed).
        let Some(gt) = after_open.find('>') else { break };
        let body_start = &after_open[gt + 1..];
        let Some(end) = body_start.find(&close) else { break };
        bodies.push(body_start[..end].to_string());
        rest = &body_start[end + close.len()..];
    }
    bodies
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! # Publishing Sink
//!
//! Delivers a finished Content Version: a standalone HTML export on disk, or
//! a WordPress post through the REST API.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use pulldown_cmark::{html, Options, Parser};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    #[default]
    Draft,
    Publish,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Publish => "publish",
        }
    }
}

/// Where a version goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublishTarget {
    Export,
    #[serde(rename = "wordpress")]
    WordPress {
        site_url: String,
        username: String,
        app_password: String,
        #[serde(default)]
        status: PostStatus,
        #[serde(default)]
        categories: Vec<u64>,
        #[serde(default)]
        tags: Vec<u64>,
    },
}

impl PublishTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::WordPress { .. } => "wordpress",
        }
    }
}

/// Content handed to a sink
#[derive(Debug, Clone)]
pub struct PublishDocument {
    pub title: String,
    pub markdown: String,
    pub version: u32,
}

impl PublishDocument {
    /// Title is the first `# ` heading, else `fallback_title`
    pub fn new(markdown: impl Into<String>, version: u32, fallback_title: &str) -> Self {
        let markdown = markdown.into();
        let title = extract_title(&markdown).unwrap_or_else(|| fallback_title.to_string());
        Self {
            title,
            markdown,
            version,
        }
    }

    /// Markdown without the leading title heading
    pub fn body_without_title(&self) -> &str {
        let heading = format!("# {}", self.title);
        let trimmed = self.markdown.trim_start();
        trimmed
            .strip_prefix(&heading)
            .map(str::trim)
            .unwrap_or(&self.markdown)
    }

    pub fn slug(&self) -> String {
        slugify(&self.title)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublishReceipt {
    Export {
        path: PathBuf,
        title: String,
        html: String,
    },
    #[serde(rename = "wordpress")]
    WordPress {
        post_id: u64,
        url: String,
        edit_url: String,
        status: String,
    },
}

#[async_trait]
pub trait PublishingSink: Send + Sync {
    async fn publish(&self, document: &PublishDocument, target: &PublishTarget) -> Result<PublishReceipt>;
}

pub fn extract_title(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}

pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.chars().take(80).collect::<String>().trim_end_matches('-').to_string()
    }
}

pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
    let parser = Parser::new_ext(markdown, options);

    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const EXPORT_STYLE: &str = r#"
    * { box-sizing: border-box; }
    body {
        font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Ubuntu, sans-serif;
        max-width: 800px; margin: 0 auto; padding: 2rem;
        line-height: 1.7; color: #333; background: #fafafa;
    }
    article { background: white; padding: 3rem; border-radius: 8px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); }
    h1 { color: #1a1a1a; font-size: 2.5rem; margin-bottom: 1.5rem; line-height: 1.2; }
    h2 { color: #2a2a2a; font-size: 1.75rem; margin-top: 2.5rem; padding-bottom: 0.5rem; border-bottom: 2px solid #eee; }
    h3 { color: #3a3a3a; font-size: 1.35rem; margin-top: 2rem; }
    pre { background: #f4f4f4; padding: 1rem; border-radius: 4px; overflow-x: auto; }
    code { font-family: 'SF Mono', Consolas, monospace; font-size: 0.9em; }
    blockquote { border-left: 4px solid #ddd; margin-left: 0; padding-left: 1rem; color: #666; }
    table { border-collapse: collapse; width: 100%; }
    th, td { border: 1px solid #ddd; padding: 0.5rem; }
    a { color: #0066cc; }
"#;

/// Standalone HTML page for `document`
pub fn render_standalone(document: &PublishDocument) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>{}</title>\n<style>{}</style>\n</head>\n<body>\n<article>\n{}</article>\n</body>\n</html>\n",
        escape_html(&document.title),
        EXPORT_STYLE,
        markdown_to_html(&document.markdown)
    )
}

/// Disk export plus WordPress REST
pub struct HttpPublisher {
    client: reqwest::Client,
    export_dir: PathBuf,
}

impl HttpPublisher {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            export_dir: export_dir.into(),
        }
    }

    async fn export(&self, document: &PublishDocument) -> Result<PublishReceipt> {
        tokio::fs::create_dir_all(&self.export_dir)
            .await
            .with_context(|| format!("Failed to create export directory: {:?}", self.export_dir))?;

        let html = render_standalone(document);
        let path = self.export_dir.join(format!("{}.html", document.slug()));
        tokio::fs::write(&path, &html)
            .await
            .with_context(|| format!("Failed to write export: {:?}", path))?;

        tracing::info!("Exported v{} to {:?}", document.version, path);
        Ok(PublishReceipt::Export {
            path,
            title: document.title.clone(),
            html,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn post_to_wordpress(
        &self,
        document: &PublishDocument,
        site_url: &str,
        username: &str,
        app_password: &str,
        status: PostStatus,
        categories: &[u64],
        tags: &[u64],
    ) -> Result<PublishReceipt> {
        let site = site_url.trim_end_matches('/');
        let mut post = json!({
            "title": document.title,
            "content": markdown_to_html(document.body_without_title()),
            "status": status.as_str(),
        });
        if !categories.is_empty() {
            post["categories"] = json!(categories);
        }
        if !tags.is_empty() {
            post["tags"] = json!(tags);
        }

        let response = self
            .client
            .post(format!("{}/wp-json/wp/v2/posts", site))
            .basic_auth(username, Some(app_password))
            .timeout(Duration::from_secs(30))
            .json(&post)
            .send()
            .await
            .with_context(|| format!("Failed to reach WordPress at {}", site))?;

        if !response.status().is_success() {
            let code = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("WordPress returned {}: {}", code, body);
        }

        let body: Value = response.json().await?;
        let post_id = body["id"]
            .as_u64()
            .context("WordPress response has no post id")?;

        Ok(PublishReceipt::WordPress {
            post_id,
            url: body["link"].as_str().unwrap_or_default().to_string(),
            edit_url: format!("{}/wp-admin/post.php?post={}&action=edit", site, post_id),
            status: body["status"]
                .as_str()
                .unwrap_or(status.as_str())
                .to_string(),
        })
    }
}

#[async_trait]
impl PublishingSink for HttpPublisher {
    async fn publish(&self, document: &PublishDocument, target: &PublishTarget) -> Result<PublishReceipt> {
        match target {
            PublishTarget::Export => self.export(document).await,
            PublishTarget::WordPress {
                site_url,
                username,
                app_password,
                status,
                categories,
                tags,
            } => {
                self.post_to_wordpress(
                    document,
                    site_url,
                    username,
                    app_password,
                    *status,
                    categories,
                    tags,
                )
                .await
            }
        }
    }
}

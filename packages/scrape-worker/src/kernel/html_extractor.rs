//! HTML article extractor - markup to structured article fields.
//!
//! Uses the scraper crate for CSS-selector based parsing:
//! - title, description, language, top image and authors from metadata
//!   with in-document fallbacks
//! - body text from the main content container's paragraphs, skipping
//!   navigation and other boilerplate
//! - keywords and summary from the body text when NLP is enabled
//!
//! Pure and CPU bound. The processor runs it on the blocking pool.

use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

use super::nlp;
use super::BaseExtractor;
use crate::common::ArticleFields;
use crate::config::ExtractionConfig;
use crate::error::ExtractionError;

/// How much of the document is sniffed for binary content.
const SNIFF_BYTES: usize = 8 * 1024;

const MAX_AUTHORS: usize = 10;

/// Elements whose text never belongs to the article body.
const SKIP_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "form", "figcaption",
];

/// Main content containers, most specific first.
const MAIN_SELECTORS: &[&str] = &[
    "article",
    "[itemprop='articleBody']",
    "main",
    "[role='main']",
    ".post-content",
    ".entry-content",
    ".article-body",
    "#content",
    "#main",
    ".content",
];

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid built-in selector {css:?}: {e:?}"))
}

lazy_static! {
    static ref META: Selector = selector("meta");
    static ref TITLE: Selector = selector("title");
    static ref H1: Selector = selector("h1");
    static ref BODY: Selector = selector("body");
    static ref PARAGRAPH: Selector = selector("p");
    static ref IMAGE: Selector = selector("img[src]");
    static ref AUTHOR_ELEMENTS: Selector =
        selector("[rel='author'], [itemprop='author'], .byline, .author");
    static ref MAIN_CONTAINERS: Vec<Selector> =
        MAIN_SELECTORS.iter().map(|css| selector(css)).collect();
}

pub struct HtmlExtractor {
    config: ExtractionConfig,
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new(ExtractionConfig::default())
    }
}

impl HtmlExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    fn decode(raw: &[u8]) -> Result<String, ExtractionError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(ExtractionError::Empty);
        }

        let head = &raw[..raw.len().min(SNIFF_BYTES)];
        if head.contains(&0) {
            return Err(ExtractionError::Binary);
        }

        let text = String::from_utf8_lossy(raw);
        let sniffed: Vec<char> = text.chars().take(SNIFF_BYTES).collect();
        let replaced = sniffed.iter().filter(|c| **c == char::REPLACEMENT_CHARACTER).count();
        if replaced * 10 > sniffed.len() * 3 {
            return Err(ExtractionError::Binary);
        }

        Ok(text.into_owned())
    }

    fn title(document: &Html) -> Option<String> {
        meta_content(document, &["og:title", "twitter:title"])
            .or_else(|| first_text(document, &TITLE))
            .or_else(|| first_text(document, &H1))
    }

    fn language(document: &Html) -> Option<String> {
        document
            .root_element()
            .value()
            .attr("lang")
            .and_then(normalize_language)
            .or_else(|| {
                meta_content(document, &["content-language", "og:locale"])
                    .as_deref()
                    .and_then(normalize_language)
            })
    }

    fn description(document: &Html) -> Option<String> {
        meta_content(document, &["description", "og:description", "twitter:description"])
    }

    fn top_image(document: &Html, main: Option<ElementRef<'_>>, base: &Url) -> Option<String> {
        let from_meta = meta_content(document, &["og:image", "twitter:image", "twitter:image:src"])
            .and_then(|src| resolve_http(base, &src));
        if from_meta.is_some() {
            return from_meta;
        }

        let scope = main.or_else(|| document.select(&BODY).next())?;
        scope
            .select(&IMAGE)
            .filter(|img| !is_skipped(img))
            .filter_map(|img| img.value().attr("src"))
            .find_map(|src| resolve_http(base, src))
    }

    fn authors(document: &Html) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut authors = Vec::new();

        let mut push = |candidate: &str| {
            for name in split_author_names(candidate) {
                if authors.len() < MAX_AUTHORS && seen.insert(name.to_lowercase()) {
                    authors.push(name);
                }
            }
        };

        for meta in document.select(&META) {
            let key = meta_key(&meta);
            if matches!(key.as_deref(), Some("author" | "article:author")) {
                if let Some(content) = meta.value().attr("content") {
                    // article:author is often a profile URL
                    if !content.starts_with("http") {
                        push(content);
                    }
                }
            }
        }

        for element in document.select(&AUTHOR_ELEMENTS) {
            if element.value().name() == "meta" {
                continue;
            }
            let text = collapse_whitespace(&element.text().collect::<String>());
            push(&text);
        }

        authors
    }

    /// First main-content container that actually holds paragraph text.
    fn main_container(document: &Html) -> Option<ElementRef<'_>> {
        MAIN_CONTAINERS.iter().find_map(|sel| {
            document
                .select(sel)
                .find(|container| !paragraphs(*container).is_empty())
        })
    }

    fn body_text(document: &Html, main: Option<ElementRef<'_>>) -> Option<String> {
        let body = document.select(&BODY).next();

        let mut parts = main.map(paragraphs).unwrap_or_default();
        if parts.is_empty() {
            parts = body.map(paragraphs).unwrap_or_default();
        }
        if parts.is_empty() {
            // No <p> markup at all; fall back to loose text
            let loose = body.map(loose_text).unwrap_or_default();
            if !loose.is_empty() {
                parts.push(loose);
            }
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    fn keywords(&self, document: &Html, title: Option<&str>, body: Option<&str>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut keywords: Vec<String> = meta_content(document, &["keywords", "news_keywords"])
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        keywords.retain(|k| seen.insert(k.to_lowercase()));

        if self.config.nlp_enabled {
            let text = format!("{}\n\n{}", title.unwrap_or_default(), body.unwrap_or_default());
            for keyword in nlp::top_keywords(&text, self.config.keyword_count) {
                if seen.insert(keyword.clone()) {
                    keywords.push(keyword);
                }
            }
        }

        keywords.truncate(self.config.keyword_count);
        keywords
    }
}

impl BaseExtractor for HtmlExtractor {
    fn extract(&self, raw: &[u8], url: &Url) -> Result<ArticleFields, ExtractionError> {
        let html = Self::decode(raw)?;
        let document = Html::parse_document(&html);

        let main = Self::main_container(&document);
        let title = Self::title(&document);
        let body_text = Self::body_text(&document, main);

        if title.is_none() && body_text.is_none() {
            return Err(ExtractionError::NotAnArticle);
        }

        let keywords = self.keywords(&document, title.as_deref(), body_text.as_deref());
        let summary = match (&body_text, self.config.nlp_enabled) {
            (Some(body), true) => nlp::summarize(
                title.as_deref(),
                body,
                &nlp::top_keywords(body, self.config.keyword_count),
                self.config.summary_sentences,
            ),
            _ => None,
        };

        Ok(ArticleFields {
            language_code: Self::language(&document),
            description: Self::description(&document),
            top_image_url: Self::top_image(&document, main, url),
            authors: Self::authors(&document),
            title,
            body_text,
            keywords,
            summary,
        })
    }
}

/// `name`, `property` or `http-equiv` of a meta tag, lowercased.
fn meta_key(meta: &ElementRef<'_>) -> Option<String> {
    let element = meta.value();
    element
        .attr("name")
        .or_else(|| element.attr("property"))
        .or_else(|| element.attr("http-equiv"))
        .map(str::to_ascii_lowercase)
}

/// Content of the first meta tag matching any key, in key priority order.
fn meta_content(document: &Html, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        document
            .select(&META)
            .filter(|meta| meta_key(meta).as_deref() == Some(*key))
            .filter_map(|meta| meta.value().attr("content"))
            .map(collapse_whitespace)
            .find(|content| !content.is_empty())
    })
}

fn first_text(document: &Html, sel: &Selector) -> Option<String> {
    document
        .select(sel)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|text| !text.is_empty())
}

fn is_skipped(element: &ElementRef<'_>) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .is_some_and(|el| SKIP_TAGS.contains(&el.name()))
    })
}

fn paragraphs(container: ElementRef<'_>) -> Vec<String> {
    container
        .select(&PARAGRAPH)
        .filter(|p| !is_skipped(p))
        .map(|p| collapse_whitespace(&p.text().collect::<String>()))
        .filter(|text| !text.is_empty())
        .collect()
}

fn loose_text(container: ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in container.descendants() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };
        let inside_skipped = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIP_TAGS.contains(&el.name()))
        });
        if !inside_skipped {
            text.push_str(fragment);
            text.push(' ');
        }
    }
    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `en-US` / `en_GB` / `EN` -> `en`.
fn normalize_language(raw: &str) -> Option<String> {
    let primary = raw.trim().split(['-', '_']).next()?.to_ascii_lowercase();
    let valid = (2..=3).contains(&primary.len()) && primary.chars().all(|c| c.is_ascii_alphabetic());
    valid.then_some(primary)
}

fn resolve_http(base: &Url, src: &str) -> Option<String> {
    let resolved = base.join(src.trim()).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// "By Jane Doe and John Smith" -> ["Jane Doe", "John Smith"].
fn split_author_names(raw: &str) -> Vec<String> {
    let cleaned = collapse_whitespace(raw);
    let cleaned = cleaned
        .strip_prefix("By ")
        .or_else(|| cleaned.strip_prefix("by "))
        .or_else(|| cleaned.strip_prefix("BY "))
        .unwrap_or(&cleaned);

    cleaned
        .split(" and ")
        .flat_map(|part| part.split([',', '|', ';']))
        .map(str::trim)
        .filter(|name| {
            !name.is_empty()
                && name.chars().count() <= 100
                && name.chars().any(char::is_alphabetic)
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<!DOCTYPE html>
<html lang="en-US">
<head>
  <title>River Cleanup Draws Hundreds | City News</title>
  <meta name="description" content="Volunteers cleared trash from the river on Saturday.">
  <meta property="og:image" content="/images/cleanup.jpg">
  <meta name="author" content="Jane Doe">
  <meta name="keywords" content="volunteering, river, cleanup">
</head>
<body>
  <nav><p>Home | News | Sports</p></nav>
  <header><p>Subscribe today</p></header>
  <article>
    <h1>River Cleanup Draws Hundreds</h1>
    <p class="byline">By Jane Doe and John Smith</p>
    <p>Hundreds of volunteers gathered at the river on Saturday morning.</p>
    <p>The volunteers removed more than two tons of trash from the river banks.</p>
    <script>trackPageView();</script>
    <p>Organizers plan another river cleanup next spring.</p>
  </article>
  <footer><p>Copyright City News</p></footer>
</body>
</html>"#;

    fn url() -> Url {
        Url::parse("https://news.example.com/2024/river-cleanup").unwrap()
    }

    #[test]
    fn test_extracts_article_fields() {
        let fields = HtmlExtractor::default()
            .extract(ARTICLE.as_bytes(), &url())
            .unwrap();

        assert_eq!(
            fields.title.as_deref(),
            Some("River Cleanup Draws Hundreds | City News")
        );
        assert_eq!(fields.language_code.as_deref(), Some("en"));
        assert_eq!(
            fields.description.as_deref(),
            Some("Volunteers cleared trash from the river on Saturday.")
        );
        assert_eq!(
            fields.top_image_url.as_deref(),
            Some("https://news.example.com/images/cleanup.jpg")
        );
        assert_eq!(fields.authors, vec!["Jane Doe", "John Smith"]);

        let body = fields.body_text.unwrap();
        assert!(body.starts_with("By Jane Doe and John Smith\n\nHundreds of volunteers"));
        assert!(body.contains("two tons of trash"));
        assert!(!body.contains("Subscribe"));
        assert!(!body.contains("Copyright"));
        assert!(!body.contains("trackPageView"));

        assert_eq!(&fields.keywords[..3], &["volunteering", "river", "cleanup"]);
        assert!(fields.keywords.contains(&"volunteers".to_string()));
        assert!(fields.summary.is_some());
    }

    #[test]
    fn test_nlp_fields_are_optional() {
        let extractor = HtmlExtractor::new(ExtractionConfig {
            nlp_enabled: false,
            ..Default::default()
        });
        let fields = extractor.extract(ARTICLE.as_bytes(), &url()).unwrap();

        assert_eq!(fields.keywords, vec!["volunteering", "river", "cleanup"]);
        assert_eq!(fields.summary, None);
        assert!(fields.body_text.is_some());
    }

    #[test]
    fn test_keyword_count_is_respected() {
        let extractor = HtmlExtractor::new(ExtractionConfig {
            keyword_count: 2,
            ..Default::default()
        });
        let fields = extractor.extract(ARTICLE.as_bytes(), &url()).unwrap();
        assert_eq!(fields.keywords, vec!["volunteering", "river"]);
    }

    #[test]
    fn test_minimal_page_without_paragraphs() {
        let html = "<html><head><title>Plain</title></head><body><div>Just some text</div></body></html>";
        let fields = HtmlExtractor::default()
            .extract(html.as_bytes(), &url())
            .unwrap();

        assert_eq!(fields.title.as_deref(), Some("Plain"));
        assert_eq!(fields.body_text.as_deref(), Some("Just some text"));
        assert_eq!(fields.language_code, None);
        assert_eq!(fields.top_image_url, None);
        assert!(fields.authors.is_empty());
    }

    #[test]
    fn test_image_fallback_skips_navigation() {
        let html = r#"<html><body>
            <header><img src="/logo.png"></header>
            <main><p>Story text.</p><img src="photo.jpg"></main>
        </body></html>"#;
        let fields = HtmlExtractor::default()
            .extract(html.as_bytes(), &url())
            .unwrap();

        assert_eq!(
            fields.top_image_url.as_deref(),
            Some("https://news.example.com/2024/photo.jpg")
        );
    }

    #[test]
    fn test_empty_document_fails() {
        let err = HtmlExtractor::default().extract(b"", &url()).unwrap_err();
        assert!(matches!(err, ExtractionError::Empty));

        let err = HtmlExtractor::default().extract(b"  \n\t ", &url()).unwrap_err();
        assert!(matches!(err, ExtractionError::Empty));
    }

    #[test]
    fn test_binary_document_fails() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D];
        let err = HtmlExtractor::default().extract(&png, &url()).unwrap_err();
        assert!(matches!(err, ExtractionError::Binary));
    }

    #[test]
    fn test_document_without_content_fails() {
        let html = "<html><head><script>var x = 1;</script></head><body><nav>Menu</nav></body></html>";
        let err = HtmlExtractor::default()
            .extract(html.as_bytes(), &url())
            .unwrap_err();
        assert!(matches!(err, ExtractionError::NotAnArticle));
    }

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("en-US").as_deref(), Some("en"));
        assert_eq!(normalize_language("pt_BR").as_deref(), Some("pt"));
        assert_eq!(normalize_language("DE").as_deref(), Some("de"));
        assert_eq!(normalize_language("").as_deref(), None);
        assert_eq!(normalize_language("english").as_deref(), None);
    }

    #[test]
    fn test_split_author_names() {
        assert_eq!(
            split_author_names("  By  Ana Lima,  Bo Chen "),
            vec!["Ana Lima", "Bo Chen"]
        );
        assert!(split_author_names("---").is_empty());
    }
}

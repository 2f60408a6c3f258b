//! End-to-end scrape sessions against a scripted fetcher.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use pagetrawl::scrapers::{
    AbortReason, BlockVerdict, ConfigError, FetchError, Identity, PageFetcher, PageHandle,
};
use pagetrawl::{FieldSpec, ScrapeRequest, Scraper, ScraperType, SessionStatus, Settings};

type Responder = Box<dyn FnMut(&str) -> Result<PageHandle, FetchError> + Send>;

struct ScriptedFetcher {
    on_fetch: Responder,
    on_click: Option<Responder>,
    calls: Arc<Mutex<Vec<String>>>,
    identities: Arc<Mutex<Vec<Identity>>>,
    closed: Arc<AtomicBool>,
}

#[derive(Clone, Default)]
struct Probe {
    calls: Arc<Mutex<Vec<String>>>,
    identities: Arc<Mutex<Vec<Identity>>>,
    closed: Arc<AtomicBool>,
}

impl Probe {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ScriptedFetcher {
    fn new(on_fetch: Responder, probe: &Probe) -> Self {
        Self {
            on_fetch,
            on_click: None,
            calls: probe.calls.clone(),
            identities: probe.identities.clone(),
            closed: probe.closed.clone(),
        }
    }

    fn with_click(mut self, on_click: Responder) -> Self {
        self.on_click = Some(on_click);
        self
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&mut self, url: &str, identity: &Identity) -> Result<PageHandle, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.identities.lock().unwrap().push(identity.clone());
        (self.on_fetch)(url)
    }

    async fn click(&mut self, selector: &str, _identity: &Identity) -> Result<PageHandle, FetchError> {
        self.calls.lock().unwrap().push(format!("click:{}", selector));
        match self.on_click.as_mut() {
            Some(on_click) => on_click(selector),
            None => Err(FetchError::Unsupported("no click".to_string())),
        }
    }

    fn supports_click(&self) -> bool {
        self.on_click.is_some()
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn kind(&self) -> ScraperType {
        ScraperType::Static
    }
}

/// Serve queued responses per URL; the last one repeats. Unknown URLs 404.
fn scripted(pages: Vec<(&str, Vec<(u16, String)>)>) -> Responder {
    let mut queues: HashMap<String, VecDeque<(u16, String)>> = pages
        .into_iter()
        .map(|(url, responses)| (url.to_string(), responses.into_iter().collect()))
        .collect();
    Box::new(move |url: &str| {
        let queue = queues.get_mut(url);
        let next = match queue {
            Some(q) if q.len() > 1 => q.pop_front(),
            Some(q) => q.front().cloned(),
            None => None,
        };
        match next {
            Some((status, body)) => Ok(PageHandle::new(url, status, body)),
            None => Ok(PageHandle::new(url, 404, "<html><body>Not found</body></html>")),
        }
    })
}

fn listing(titles: &[String], extra: &str) -> String {
    let products: String = titles
        .iter()
        .enumerate()
        .map(|(i, title)| {
            format!(
                r#"<article class="product_pod"><h3><a href="item/{i}.html">{title}</a></h3>
                   <p class="price_color">£{i}.99</p></article>"#
            )
        })
        .collect();
    format!("<html><body><section>{}</section>{}</body></html>", products, extra)
}

fn titles(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{} {}", prefix, i)).collect()
}

fn fast_settings() -> Settings {
    Settings {
        min_delay: 0.0,
        max_delay: 0.0,
        ..Settings::default()
    }
}

fn request(url: &str) -> ScrapeRequest {
    ScrapeRequest {
        target_url: url.to_string(),
        product_selector: "article.product_pod".to_string(),
        fields: vec![
            FieldSpec::new("title", &["h3 a"]),
            FieldSpec::new("price", &[".price_color"]),
        ],
        scraper_type: ScraperType::Static,
        max_products: None,
    }
}

fn scraper(url: &str, settings: Settings, fetcher: ScriptedFetcher) -> Scraper {
    Scraper::with_fetcher(request(url), Arc::new(settings), Box::new(fetcher)).unwrap()
}

#[tokio::test]
async fn test_single_static_page() {
    let url = "http://books.toscrape.com/";
    let probe = Probe::default();
    let fetcher = ScriptedFetcher::new(
        scripted(vec![(url, vec![(200, listing(&titles("Book", 20), ""))])]),
        &probe,
    );

    let result = scraper(url, fast_settings(), fetcher).scrape().await;

    assert!(result.status.is_done());
    assert_eq!(result.records.len(), 20);
    assert_eq!(result.stats.total_pages, 1);
    for record in &result.records {
        assert!(!record.text("title").unwrap().is_empty());
        assert!(!record.text("price").unwrap().is_empty());
        assert_eq!(record.page_number, 1);
        assert_eq!(record.source_url, url);
    }
    assert_eq!(result.stats.per_field_fill_rate.get("title"), Some(&1.0));
    assert!(probe.closed());
}

#[tokio::test]
async fn test_url_increment_until_empty_page() {
    let probe = Probe::default();
    let fetcher = ScriptedFetcher::new(
        scripted(vec![
            ("https://shop.example/list?page=1", vec![(200, listing(&titles("A", 3), ""))]),
            ("https://shop.example/list?page=2", vec![(200, listing(&titles("B", 2), ""))]),
            ("https://shop.example/list?page=3", vec![(200, listing(&[], ""))]),
        ]),
        &probe,
    );

    let result = scraper("https://shop.example/list?page=1", fast_settings(), fetcher)
        .scrape()
        .await;

    assert!(result.status.is_done());
    assert_eq!(result.stats.total_pages, 2);
    assert_eq!(result.records.len(), 5);
    assert!(result.records.iter().all(|r| r.page_number <= 2));
    assert_eq!(
        probe.calls(),
        vec![
            "https://shop.example/list?page=1",
            "https://shop.example/list?page=2",
            "https://shop.example/list?page=3",
        ]
    );
}

#[tokio::test]
async fn test_rate_limited_then_clear() {
    let url = "https://shop.example/products";
    let probe = Probe::default();
    let fetcher = ScriptedFetcher::new(
        scripted(vec![(
            url,
            vec![
                (429, "<html><body>Too many requests</body></html>".to_string()),
                (200, listing(&titles("Item", 4), "")),
            ],
        )]),
        &probe,
    );

    let mut scraper = scraper(url, fast_settings(), fetcher);
    let result = scraper.scrape().await;

    assert!(result.status.is_done());
    assert_eq!(result.records.len(), 4);
    assert_eq!(result.stats.blocks, 1);
    assert_eq!(result.stats.retries, 1);
    assert_eq!(result.stats.requests, 2);
    assert_eq!(scraper.rate_controller().multiplier(), 1.0);

    let identities = probe.identities.lock().unwrap().clone();
    assert_eq!(identities.len(), 2);
    assert_ne!(identities[0].user_agent, identities[1].user_agent);
}

#[tokio::test]
async fn test_max_pages_ceiling() {
    let probe = Probe::default();
    let fetcher = ScriptedFetcher::new(
        Box::new(|url: &str| {
            let page: u32 = url.rsplit('=').next().and_then(|n| n.parse().ok()).unwrap_or(1);
            let next = format!(r#"<a rel="next" href="?p={}">Next</a>"#, page + 1);
            Ok(PageHandle::new(url, 200, listing(&titles(&format!("P{}", page), 2), &next)))
        }),
        &probe,
    );
    let settings = Settings {
        max_pages: 3,
        ..fast_settings()
    };

    let result = scraper("https://shop.example/s?p=1", settings, fetcher).scrape().await;

    assert!(result.status.is_done());
    assert_eq!(result.stats.total_pages, 3);
    assert_eq!(result.records.len(), 6);
    assert_eq!(probe.calls().len(), 3);
}

#[tokio::test]
async fn test_cancellation_keeps_partial_results() {
    let probe = Probe::default();
    let token_slot: Arc<Mutex<Option<tokio_util::sync::CancellationToken>>> = Arc::default();
    let slot = token_slot.clone();
    let fetcher = ScriptedFetcher::new(
        Box::new(move |url: &str| {
            if let Some(token) = slot.lock().unwrap().as_ref() {
                token.cancel();
            }
            let next = r#"<a rel="next" href="/list?page=2">Next</a>"#;
            Ok(PageHandle::new(url, 200, listing(&titles("C", 3), next)))
        }),
        &probe,
    );

    let mut scraper = scraper("https://shop.example/list?page=1", fast_settings(), fetcher);
    *token_slot.lock().unwrap() = Some(scraper.cancellation_token());
    let result = scraper.scrape().await;

    assert!(matches!(
        result.status,
        SessionStatus::Aborted(AbortReason::Cancelled)
    ));
    assert_eq!(result.records.len(), 3);
    assert_eq!(probe.calls().len(), 1);
    assert!(probe.closed());
}

#[tokio::test]
async fn test_fetch_failure_aborts_with_partial_records() {
    let probe = Probe::default();
    let next = r#"<a rel="next" href="/list?page=2">Next</a>"#;
    let fetcher = ScriptedFetcher::new(
        scripted(vec![
            ("https://shop.example/list?page=1", vec![(200, listing(&titles("D", 2), next))]),
            ("https://shop.example/list?page=2", vec![(500, "oops".to_string())]),
        ]),
        &probe,
    );

    let result = scraper("https://shop.example/list?page=1", fast_settings(), fetcher)
        .scrape()
        .await;

    match result.error() {
        Some(AbortReason::Fetch {
            page_number,
            attempts,
            error: FetchError::Status { status: 500, .. },
        }) => {
            assert_eq!(*page_number, 2);
            assert_eq!(*attempts, 4);
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.stats.total_pages, 1);
    assert_eq!(result.stats.retries, 3);
    assert!(probe.closed());
}

#[tokio::test]
async fn test_missing_next_page_ends_cleanly() {
    let probe = Probe::default();
    let next = r#"<a rel="next" href="/list?page=2">Next</a>"#;
    let fetcher = ScriptedFetcher::new(
        scripted(vec![(
            "https://shop.example/list?page=1",
            vec![(200, listing(&titles("E", 2), next))],
        )]),
        &probe,
    );

    let result = scraper("https://shop.example/list?page=1", fast_settings(), fetcher)
        .scrape()
        .await;

    assert!(result.status.is_done());
    assert_eq!(result.records.len(), 2);
    assert_eq!(probe.calls().len(), 2);
}

#[tokio::test]
async fn test_persistent_captcha_aborts() {
    let url = "https://shop.example/list";
    let probe = Probe::default();
    let fetcher = ScriptedFetcher::new(
        scripted(vec![(
            url,
            vec![(200, "<html><body><div class='g-recaptcha'>captcha</div></body></html>".to_string())],
        )]),
        &probe,
    );
    let settings = Settings {
        max_retries: 1,
        ..fast_settings()
    };

    let mut scraper = scraper(url, settings, fetcher);
    let result = scraper.scrape().await;

    match result.error() {
        Some(AbortReason::Blocked {
            verdict: BlockVerdict::CaptchaChallenge { .. },
            attempts,
            ..
        }) => assert_eq!(*attempts, 2),
        other => panic!("unexpected status {:?}", other),
    }
    assert!(result.records.is_empty());
    assert_eq!(result.stats.blocks, 2);
    assert!(scraper.rate_controller().multiplier() > 1.0);
    assert!(probe.closed());
}

#[tokio::test]
async fn test_max_products_truncates() {
    let probe = Probe::default();
    let next = r#"<a rel="next" href="/list?page=2">Next</a>"#;
    let fetcher = ScriptedFetcher::new(
        scripted(vec![(
            "https://shop.example/list?page=1",
            vec![(200, listing(&titles("F", 8), next))],
        )]),
        &probe,
    );
    let mut req = request("https://shop.example/list?page=1");
    req.max_products = Some(5);

    let mut scraper =
        Scraper::with_fetcher(req, Arc::new(fast_settings()), Box::new(fetcher)).unwrap();
    let result = scraper.scrape().await;

    assert!(result.status.is_done());
    assert_eq!(result.records.len(), 5);
    assert_eq!(probe.calls().len(), 1);
}

#[tokio::test]
async fn test_click_pagination_stops_on_repeated_content() {
    let url = "https://spa.example/catalog";
    let probe = Probe::default();
    let button = r#"<button class="load">Next</button>"#;
    let page_one = listing(&titles("G", 2), button);
    let page_two = listing(&titles("H", 2), button);

    let fetcher = ScriptedFetcher::new(scripted(vec![(url, vec![(200, page_one)])]), &probe)
        .with_click(Box::new(move |_selector: &str| {
            Ok(PageHandle::new("https://spa.example/catalog", 200, page_two.clone()))
        }));

    let result = scraper(url, fast_settings(), fetcher).scrape().await;

    assert!(result.status.is_done());
    assert_eq!(result.stats.total_pages, 2);
    assert_eq!(result.records.len(), 4);
    let calls = probe.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[1].starts_with("click:"));
}

#[tokio::test]
async fn test_redirect_back_to_visited_page_ends() {
    let probe = Probe::default();
    let next = r#"<a rel="next" href="/list?page=2">Next</a>"#;
    let body = listing(&titles("R", 2), next);
    let fetcher = ScriptedFetcher::new(
        Box::new(move |url: &str| {
            let mut page = PageHandle::new(url, 200, body.clone());
            page.final_url = "https://shop.example/list?page=1".to_string();
            Ok(page)
        }),
        &probe,
    );

    let result = scraper("https://shop.example/list?page=1", fast_settings(), fetcher)
        .scrape()
        .await;

    assert!(result.status.is_done());
    assert_eq!(result.stats.total_pages, 1);
    assert_eq!(probe.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_retry_after_is_capped() {
    let url = "https://shop.example/products";
    let probe = Probe::default();
    let mut served = 0;
    let fetcher = ScriptedFetcher::new(
        Box::new(move |url: &str| {
            served += 1;
            if served == 1 {
                let mut page = PageHandle::new(url, 429, "<html><body>Slow down</body></html>");
                page.headers
                    .insert("retry-after".to_string(), u64::MAX.to_string());
                Ok(page)
            } else {
                Ok(PageHandle::new(url, 200, listing(&titles("Item", 3), "")))
            }
        }),
        &probe,
    );

    let result = scraper(url, fast_settings(), fetcher).scrape().await;

    assert!(result.status.is_done());
    assert_eq!(result.records.len(), 3);
    assert_eq!(result.stats.blocks, 1);
    assert_eq!(probe.calls().len(), 2);
}

#[tokio::test]
async fn test_identity_rotates_between_pages() {
    let probe = Probe::default();
    let fetcher = ScriptedFetcher::new(
        Box::new(|url: &str| {
            let page: u32 = url.rsplit('=').next().and_then(|n| n.parse().ok()).unwrap_or(1);
            let next = format!(r#"<a rel="next" href="?p={}">Next</a>"#, page + 1);
            Ok(PageHandle::new(url, 200, listing(&titles(&format!("P{}", page), 2), &next)))
        }),
        &probe,
    );
    let settings = Settings {
        max_pages: 4,
        ..fast_settings()
    };

    let result = scraper("https://shop.example/s?p=1", settings, fetcher).scrape().await;

    assert!(result.status.is_done());
    let identities = probe.identities.lock().unwrap().clone();
    assert_eq!(identities.len(), 4);
    for pair in identities.windows(2) {
        assert_ne!(pair[0].user_agent, pair[1].user_agent);
    }
}

#[tokio::test]
async fn test_session_runs_on_spawned_task() {
    let url = "http://books.toscrape.com/";
    let probe = Probe::default();
    let fetcher = ScriptedFetcher::new(
        scripted(vec![(url, vec![(200, listing(&titles("Book", 5), ""))])]),
        &probe,
    );
    let mut scraper = scraper(url, fast_settings(), fetcher);

    let handle = tokio::spawn(async move { scraper.scrape().await });
    let result = handle.await.unwrap();

    assert!(result.status.is_done());
    assert_eq!(result.records.len(), 5);
    assert!(probe.closed());
}

#[test]
fn test_empty_selector_list_is_rejected_at_construction() {
    let mut req = request("https://shop.example/");
    req.fields.push(FieldSpec::new("brand", &[]));
    let result = Scraper::new(req, Arc::new(fast_settings()));
    assert!(matches!(result, Err(ConfigError::EmptySelectorList(name)) if name == "brand"));
}

#[test]
fn test_unknown_scraper_type_is_rejected() {
    let result = "scrapy".parse::<ScraperType>();
    assert!(matches!(result, Err(ConfigError::UnsupportedScraperType(_))));
}

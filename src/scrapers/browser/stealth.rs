//! Navigator patches installed before any page script runs.

pub const STEALTH_SCRIPTS: &[&str] = &[
    // Remove webdriver property
    r#"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });
    "#,
    // Non-empty plugin list
    r#"
    Object.defineProperty(navigator, 'plugins', {
        get: () => [1, 2, 3, 4, 5],
        configurable: true
    });
    "#,
    r#"
    Object.defineProperty(navigator, 'languages', {
        get: () => ['en-US', 'en'],
        configurable: true
    });
    "#,
    // Headless Chrome ships without window.chrome
    r#"
    if (!window.chrome) {
        window.chrome = { runtime: {} };
    }
    "#,
];

/// Chrome flags that hide the most obvious automation markers.
pub const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-extensions",
    "--no-sandbox",
    "--disable-gpu",
];

/// Navigation status of the current document, when the browser reports it.
pub const NAVIGATION_STATUS_SCRIPT: &str = r#"
    (() => {
        const entry = performance.getEntriesByType('navigation')[0];
        return entry && entry.responseStatus ? entry.responseStatus : null;
    })()
"#;

/// Smoke-test for `ChromiumRenderer`.
///
/// Launches a headless Chromium, renders <https://example.com> in one tab,
/// and runs a `SelectorExtractor` over the snapshot.
///
/// Run with:
///   cargo run -p harvest-client --example browser_smoke --features browser
use harvest_client::{ChromiumRenderer, ExtractionSpec, SelectorExtractor};
use harvest_core::models::Entity;
use harvest_core::traits::{Extractor, PageHandle, PageRenderer, RenderSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let spec: ExtractionSpec = serde_json::from_value(serde_json::json!({
        "entities": { "item": "body > div", "link": "a[href]" },
        "records": {
            "item": "body > div",
            "fields": [
                { "name": "title", "selector": "h1" },
                { "name": "links", "selector": "a", "kind": "count" }
            ]
        }
    }))?;
    let extractor = SelectorExtractor::new(&spec)?;

    println!("Launching headless browser...");
    let renderer = ChromiumRenderer::new();
    let session = renderer.open().await?;
    let page = session.new_page().await?;

    let url = "https://example.com";
    println!("Rendering {url} ...");
    let result = page.fetch(url).await;
    page.close().await;
    session.close().await?;
    let rendered = result?;

    assert!(
        rendered.html.contains("<h1>Example Domain</h1>"),
        "Expected <h1> not found in rendered HTML"
    );

    let records = extractor.extract_records(&rendered, &Entity::new("example", "Example"));
    println!("OK, {} bytes of rendered HTML", rendered.html.len());
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

/// Smoke-test for `BrowserTransport`.
///
/// Launches a headless Chromium, renders <https://example.com>, and checks
/// the rendered HTML contains the expected `<h1>`.
///
/// Run with:
///   cargo run -p gleaner-client --example browser_smoke --features browser
use gleaner_client::{BrowserOptions, BrowserTransport};
use gleaner_core::models::RequestDescriptor;
use gleaner_core::rotator::CredentialRotator;
use gleaner_core::traits::Transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let transport = BrowserTransport::launch(BrowserOptions {
        wait_for: Some("h1".into()),
        ..Default::default()
    })
    .await?;
    let credential = CredentialRotator::with_defaults().next_credential();

    let request = RequestDescriptor::get("https://example.com");
    println!("Rendering {} as {}", request.url(), credential.user_agent);
    let response = transport.send(&request, &credential).await?;

    anyhow::ensure!(response.is_success(), "HTTP {}", response.status);
    anyhow::ensure!(
        response.body.contains("Example Domain"),
        "Expected heading not found in rendered HTML"
    );

    println!("OK: {} bytes from {}", response.body.len(), response.url);
    Ok(())
}

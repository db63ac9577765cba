//! Writes the OpenAPI document for the onboarding REST routes.
//!
//! Usage: `openapi [OUTPUT]` (defaults to `openapi.json`).

use onboard_api::router::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    std::fs::write(&output, ApiDoc::openapi().to_pretty_json()?)?;
    println!("Wrote OpenAPI document to {}", output);
    Ok(())
}

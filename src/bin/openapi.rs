use anyhow::Result;

/// Print the `OpenAPI` document for the HTTP API.
fn main() -> Result<()> {
    println!("{}", custodia::api::openapi().to_pretty_json()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    gmaps_quality_fix::run().await?;
    Ok(())
}

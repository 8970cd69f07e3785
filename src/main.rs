#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mcm_agent::cli::run_cli().await
}

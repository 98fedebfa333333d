use geonode_api::setup;
use geonode_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let (state, router) = setup::initialize_app(config).await?;

    setup::server::start_server(state, router).await?;

    Ok(())
}

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use tokio::runtime::Handle;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::sync::Arc;

use powledger::blockchain::{Blockchain, Miner, TransactionPool};
use powledger::config::NodeConfig;
use powledger::node::{peers::normalize_url, NodeService, PeerNetwork};
use powledger::{api, blockchain};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_blocks,
        api::handlers::add_block,
        api::handlers::get_transactions,
        api::handlers::add_transaction,
        api::handlers::get_peers,
        api::handlers::register_peer,
        api::handlers::unregister_peer,
        api::handlers::get_caller_ip,
        api::handlers::get_balance,
        api::handlers::get_balances,
        api::handlers::start_miner,
        api::handlers::stop_miner,
        api::handlers::restart_miner
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::crypto::Address,
            blockchain::crypto::DigitalSignature,
            api::schema::ErrorResponse,
            api::schema::BalanceResponse,
            api::schema::MinerStatus
        )
    ),
    tags(
        (name = "node", description = "Proof-of-work node endpoints")
    ),
    info(
        title = "Powledger Node API",
        version = "0.1.0",
        description = "Blocks, transactions, peers and balances of a proof-of-work node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

/// Joins the network through `master` unless this node is the master itself
///
/// Every failure is logged; the node then carries on with whatever state it has.
async fn join_network(service: &NodeService, network: &PeerNetwork, master: &str) {
    let master = match normalize_url(master) {
        Ok(master) => master,
        Err(err) => {
            warn!("Ignoring master node URL: {}", err);
            return;
        }
    };

    if master == network.own_url() {
        info!("Running as master node");
        return;
    }

    if let Err(err) = network.register(&master) {
        warn!("Failed to register master {}: {}", master, err);
    }

    match service.bootstrap(network, &master).await {
        Ok(report) => {
            for peer in report.peers {
                if let Err(err) = network.register(&peer) {
                    warn!("Ignoring peer {} advertised by master: {}", peer, err);
                }
            }
        }
        Err(err) => warn!("Bootstrap from {} failed: {}", master, err),
    }

    network.announce_arrival().await;
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::load().context("failed to load node configuration")?;
    let consensus = Arc::new(config.consensus.clone());

    let pool = Arc::new(TransactionPool::new(consensus.coinbase_reward));
    let blockchain = Blockchain::new(consensus.clone(), pool);

    let public_url = config.public_url();
    let network = Arc::new(
        PeerNetwork::new(&public_url, Handle::current())
            .with_context(|| format!("invalid public URL {}", public_url))?,
    );

    let miner = Arc::new(Miner::new(blockchain.clone(), network.clone()));
    let service = web::Data::new(NodeService::new(blockchain, network.clone(), miner.clone()));

    if let Some(master) = config.network.master_node_url.as_deref() {
        join_network(&service, &network, master).await;
    }

    if consensus.mining_enabled {
        miner.start();
    }

    let peers = web::Data::from(network.clone());
    let (host, port) = (config.server.host.clone(), config.server.port);
    info!("Starting HTTP server at http://{}:{} (public URL {})", host, port, public_url);

    // Start HTTP server
    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(service.clone())
            .app_data(peers.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi()),
            )
    })
    .bind((host.as_str(), port))
    .with_context(|| format!("failed to bind {}:{}", host, port))?
    .run()
    .await?;

    info!("Shutting down");
    miner.shutdown();
    network.announce_departure().await;

    Ok(())
}

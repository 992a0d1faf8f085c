use actix_web::{web, HttpRequest, HttpResponse, Responder};
use log::{info, warn};

use std::str::FromStr;

use crate::blockchain::{Address, Block, Transaction};
use crate::node::{NodeService, PeerNetwork};

use super::schema::{BalanceResponse, ErrorResponse, MinerStatus, PropagateQuery};

/// Shared node state
pub type NodeData = web::Data<NodeService>;

/// Shared peer registry
pub type PeersData = web::Data<PeerNetwork>;

/// Get the full blockchain
///
/// Returns every accepted block, genesis first
#[utoipa::path(
    get,
    path = "/block",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = Vec<Block>)
    )
)]
pub async fn get_blocks(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.blockchain().blocks())
}

/// Submit a block
///
/// Appends the block at the tip if it passes every acceptance rule
#[utoipa::path(
    post,
    path = "/block",
    params(PropagateQuery),
    request_body = Block,
    responses(
        (status = 202, description = "Block accepted"),
        (status = 406, description = "Block rejected", body = ErrorResponse)
    )
)]
pub async fn add_block(
    node: NodeData,
    query: web::Query<PropagateQuery>,
    block: web::Json<Block>,
) -> impl Responder {
    let block = block.into_inner();
    info!("Received block {}", block.hash);

    match node.accept_block(block, query.propagate) {
        Ok(()) => HttpResponse::Accepted().finish(),
        Err(err) => HttpResponse::NotAcceptable().json(ErrorResponse::new(err)),
    }
}

/// Get the transaction pool
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/transaction",
    responses(
        (status = 200, description = "Pool retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_transactions(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.blockchain().pool().snapshot())
}

/// Submit a transaction
///
/// Adds a signed transaction to the pool
#[utoipa::path(
    post,
    path = "/transaction",
    params(PropagateQuery),
    request_body = Transaction,
    responses(
        (status = 202, description = "Transaction accepted"),
        (status = 406, description = "Transaction rejected", body = ErrorResponse)
    )
)]
pub async fn add_transaction(
    node: NodeData,
    query: web::Query<PropagateQuery>,
    transaction: web::Json<Transaction>,
) -> impl Responder {
    let transaction = transaction.into_inner();
    info!("Received transaction {}", transaction.hash);

    match node.accept_transaction(transaction, query.propagate) {
        Ok(_) => HttpResponse::Accepted().finish(),
        Err(err) => HttpResponse::NotAcceptable().json(ErrorResponse::new(err)),
    }
}

/// Peers announce themselves with either a bare URL or a JSON string
fn peer_url(body: &str) -> String {
    serde_json::from_str::<String>(body).unwrap_or_else(|_| body.trim().to_string())
}

/// Get known peers
#[utoipa::path(
    get,
    path = "/node",
    responses(
        (status = 200, description = "Peers retrieved successfully", body = Vec<String>)
    )
)]
pub async fn get_peers(peers: PeersData) -> impl Responder {
    HttpResponse::Ok().json(peers.peers())
}

/// Register a peer
#[utoipa::path(
    post,
    path = "/node",
    request_body = String,
    responses(
        (status = 200, description = "Peer registered"),
        (status = 400, description = "Malformed peer URL", body = ErrorResponse)
    )
)]
pub async fn register_peer(peers: PeersData, body: String) -> impl Responder {
    match peers.register(&peer_url(&body)) {
        Ok(_) => HttpResponse::Ok().finish(),
        Err(err) => {
            warn!("Refused peer registration: {}", err);
            HttpResponse::BadRequest().json(ErrorResponse::new(err))
        }
    }
}

/// Unregister a peer
#[utoipa::path(
    delete,
    path = "/node",
    request_body = String,
    responses(
        (status = 200, description = "Peer unregistered"),
        (status = 400, description = "Malformed peer URL", body = ErrorResponse)
    )
)]
pub async fn unregister_peer(peers: PeersData, body: String) -> impl Responder {
    match peers.unregister(&peer_url(&body)) {
        Ok(_) => HttpResponse::Ok().finish(),
        Err(err) => HttpResponse::BadRequest().json(ErrorResponse::new(err)),
    }
}

/// Get the caller's IP address
///
/// Lets a node behind NAT learn the address its peers see
#[utoipa::path(
    get,
    path = "/node/ip",
    responses(
        (status = 200, description = "Caller address", body = String),
        (status = 500, description = "Caller address unavailable", body = ErrorResponse)
    )
)]
pub async fn get_caller_ip(request: HttpRequest) -> impl Responder {
    match request.peer_addr() {
        Some(address) => HttpResponse::Ok().body(address.ip().to_string()),
        None => HttpResponse::InternalServerError()
            .json(ErrorResponse::new("caller address unavailable")),
    }
}

/// Get an account balance
#[utoipa::path(
    get,
    path = "/balance/{address}",
    params(
        ("address" = String, Path, description = "Base58 public key of the account")
    ),
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse),
        (status = 400, description = "Invalid address", body = ErrorResponse)
    )
)]
pub async fn get_balance(node: NodeData, address: web::Path<String>) -> impl Responder {
    let address = match Address::from_str(&address) {
        Ok(address) => address,
        Err(err) => return HttpResponse::BadRequest().json(ErrorResponse::new(err)),
    };

    HttpResponse::Ok().json(BalanceResponse {
        balance: node.blockchain().balance_of(&address),
        address: address.0,
    })
}

/// Get all balances
///
/// Returns every account that ever received funds
#[utoipa::path(
    get,
    path = "/balances",
    responses(
        (status = 200, description = "Balances retrieved successfully", body = Vec<BalanceResponse>)
    )
)]
pub async fn get_balances(node: NodeData) -> impl Responder {
    let balances: Vec<BalanceResponse> = node
        .blockchain()
        .balances()
        .into_iter()
        .map(|(address, balance)| BalanceResponse {
            address: address.0,
            balance,
        })
        .collect();

    HttpResponse::Ok().json(balances)
}

/// Runs a miner control call off the async workers, since it may join a thread
async fn control_miner<F>(node: NodeData, control: F) -> HttpResponse
where
    F: FnOnce(&NodeService) + Send + 'static,
{
    let result = web::block(move || {
        control(&node);
        node.miner().is_running()
    })
    .await;

    match result {
        Ok(running) => HttpResponse::Ok().json(MinerStatus { running }),
        Err(err) => HttpResponse::InternalServerError().json(ErrorResponse::new(err)),
    }
}

/// Start mining
#[utoipa::path(
    post,
    path = "/miner/start",
    responses(
        (status = 200, description = "Miner state", body = MinerStatus)
    )
)]
pub async fn start_miner(node: NodeData) -> impl Responder {
    control_miner(node, |node| {
        node.miner().start();
    })
    .await
}

/// Stop mining
#[utoipa::path(
    post,
    path = "/miner/stop",
    responses(
        (status = 200, description = "Miner state", body = MinerStatus)
    )
)]
pub async fn stop_miner(node: NodeData) -> impl Responder {
    control_miner(node, |node| node.miner().shutdown()).await
}

/// Restart mining on a fresh candidate
#[utoipa::path(
    post,
    path = "/miner/restart",
    responses(
        (status = 200, description = "Miner state", body = MinerStatus)
    )
)]
pub async fn restart_miner(node: NodeData) -> impl Responder {
    control_miner(node, |node| {
        node.miner().restart();
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::blockchain::chain::tests::{chain_with, mine};
    use crate::blockchain::{Blockchain, Miner, Wallet};
    use crate::node::peers::RecordingBroadcaster;

    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::sync::Arc;

    fn state(blockchain: &Blockchain) -> (NodeData, PeersData, Arc<RecordingBroadcaster>) {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let miner = Arc::new(Miner::new(blockchain.clone(), broadcaster.clone()));
        let node = web::Data::new(NodeService::new(blockchain.clone(), broadcaster.clone(), miner));
        let peers = web::Data::new(
            PeerNetwork::new("http://127.0.0.1:8080", tokio::runtime::Handle::current()).unwrap(),
        );
        (node, peers, broadcaster)
    }

    #[actix_web::test]
    async fn test_block_submission() {
        let (chain, miner) = chain_with(0, 10);
        let (node, peers, broadcaster) = state(&chain);
        let app = test::init_service(
            App::new()
                .app_data(node.clone())
                .app_data(peers.clone())
                .configure(configure_routes),
        )
        .await;

        let genesis = mine(None, vec![Transaction::new_coinbase(miner.address().clone(), 50.0)], 0);
        let request = test::TestRequest::post()
            .uri("/block?propagate=true")
            .set_json(&genesis)
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(broadcaster.sent().len(), 1);

        let request = test::TestRequest::post()
            .uri("/block")
            .set_json(&genesis)
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        let body: ErrorResponse = test::read_body_json(response).await;
        assert!(body.error.contains("previous hash"));

        let request = test::TestRequest::get().uri("/block").to_request();
        let blocks: Vec<Block> = test::call_and_read_body_json(&app, request).await;
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].hash, genesis.hash);
    }

    #[actix_web::test]
    async fn test_transaction_submission() {
        let (chain, _) = chain_with(0, 10);
        let (node, peers, broadcaster) = state(&chain);
        let app = test::init_service(
            App::new()
                .app_data(node.clone())
                .app_data(peers.clone())
                .configure(configure_routes),
        )
        .await;

        let sender = Wallet::generate();
        let transaction = Transaction::signed(&sender, Wallet::generate().address().clone(), 4.0);
        let request = test::TestRequest::post()
            .uri("/transaction?propagate=false")
            .set_json(&transaction)
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(broadcaster.sent().is_empty());

        let negative = Transaction::signed(&sender, Wallet::generate().address().clone(), -5.0);
        let request = test::TestRequest::post()
            .uri("/transaction")
            .set_json(&negative)
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);

        let request = test::TestRequest::get().uri("/transaction").to_request();
        let pool: Vec<Transaction> = test::call_and_read_body_json(&app, request).await;
        assert_eq!(pool, vec![transaction]);
    }

    #[actix_web::test]
    async fn test_peer_registry() {
        let (chain, _) = chain_with(0, 10);
        let (node, peers, _) = state(&chain);
        let app = test::init_service(
            App::new()
                .app_data(node.clone())
                .app_data(peers.clone())
                .configure(configure_routes),
        )
        .await;

        let request = test::TestRequest::post()
            .uri("/node")
            .set_payload("http://10.0.0.5:8080")
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::OK);

        let request = test::TestRequest::post()
            .uri("/node")
            .set_json("http://10.0.0.6:8080/")
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::OK);

        let request = test::TestRequest::post()
            .uri("/node")
            .set_payload("not a url")
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::BAD_REQUEST);

        let request = test::TestRequest::delete()
            .uri("/node")
            .set_payload("http://10.0.0.5:8080")
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::OK);

        let request = test::TestRequest::get().uri("/node").to_request();
        let listed: Vec<String> = test::call_and_read_body_json(&app, request).await;
        assert_eq!(listed, vec!["http://10.0.0.6:8080"]);

        let request = test::TestRequest::get()
            .uri("/node/ip")
            .peer_addr("10.1.2.3:4567".parse().unwrap())
            .to_request();
        let body = test::call_and_read_body(&app, request).await;
        assert_eq!(body, web::Bytes::from_static(b"10.1.2.3"));
    }

    #[actix_web::test]
    async fn test_balances_and_miner_control() {
        let (chain, miner) = chain_with(0, 10);
        let genesis = mine(None, vec![Transaction::new_coinbase(miner.address().clone(), 50.0)], 0);
        chain.append(genesis).unwrap();

        let (node, peers, _) = state(&chain);
        let app = test::init_service(
            App::new()
                .app_data(node.clone())
                .app_data(peers.clone())
                .configure(configure_routes),
        )
        .await;

        let request = test::TestRequest::get()
            .uri(&format!("/balance/{}", miner.address()))
            .to_request();
        let balance: BalanceResponse = test::call_and_read_body_json(&app, request).await;
        assert_eq!(balance.balance, 50.0);

        let request = test::TestRequest::get().uri("/balance/xyz").to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::BAD_REQUEST);

        let request = test::TestRequest::get().uri("/balances").to_request();
        let balances: Vec<BalanceResponse> = test::call_and_read_body_json(&app, request).await;
        assert_eq!(balances.len(), 1);

        let request = test::TestRequest::post().uri("/miner/start").to_request();
        let status: MinerStatus = test::call_and_read_body_json(&app, request).await;
        assert!(status.running);

        let request = test::TestRequest::post().uri("/miner/restart").to_request();
        let status: MinerStatus = test::call_and_read_body_json(&app, request).await;
        assert!(status.running);

        let request = test::TestRequest::post().uri("/miner/stop").to_request();
        let status: MinerStatus = test::call_and_read_body_json(&app, request).await;
        assert!(!status.running);
        assert_eq!(node.miner().active_loops(), 0);
    }
}

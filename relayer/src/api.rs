//! The HTTP surface over C11 and read-only views into C1, C3, C4 (C12). Thin
//! `warp` handlers: decode the body, call the FSM/store/treasury/pool,
//! map the result to a status code and a JSON body.

use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use warp::{http::StatusCode, reject::Reject, Filter, Rejection, Reply};

use crate::chains::SourceChain;
use crate::errors::RelayerError;
use crate::presign_pool::PresignPool;
use crate::session_fsm::SessionFsm;
use crate::treasury::Treasury;

/// Wraps [`RelayerError`] so it can be carried through `warp`'s rejection
/// machinery and mapped back to a status code in [`handle_rejection`].
#[derive(Debug)]
struct ApiError(RelayerError);

impl Reject for ApiError {}

fn reject(error: RelayerError) -> Rejection {
    warp::reject::custom(ApiError(error))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(ApiError(error)) = rejection.find() {
        (error.status_code(), error.to_string())
    } else if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if rejection.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "malformed request body".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };
    Ok(warp::reply::with_status(warp::reply::json(&ErrorBody { error: message }), status))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    receiver_address: String,
    source_chain: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    session_id: String,
    payment_address: String,
    fee_amount: u64,
}

async fn start_handler(fsm: Arc<SessionFsm>, body: StartRequest) -> Result<impl Reply, Rejection> {
    let source_chain = SourceChain::parse(&body.source_chain)
        .ok_or_else(|| reject(RelayerError::ValidationFailure(format!("unknown sourceChain {:?}", body.source_chain))))?;
    let result = fsm.start(&body.receiver_address, source_chain).await.map_err(reject)?;
    Ok(warp::reply::json(&StartResponse {
        session_id: result.session_id,
        payment_address: result.payment_address,
        fee_amount: result.fee_amount,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmPaymentRequest {
    session_id: String,
    payment_tx_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmPaymentResponse {
    deposit_wallet_id: String,
    deposit_address: String,
}

async fn confirm_payment_handler(
    fsm: Arc<SessionFsm>,
    body: ConfirmPaymentRequest,
) -> Result<impl Reply, Rejection> {
    let result = fsm
        .confirm_payment(&body.session_id, &body.payment_tx_id)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&ConfirmPaymentResponse {
        deposit_wallet_id: result.deposit_wallet_id,
        deposit_address: format!("0x{}", hex::encode(result.deposit_address)),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmDepositRequest {
    session_id: String,
    nft_contract: String,
    token_id: String,
    #[allow(dead_code)]
    tx_hash: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmDepositResponse {
    status: &'static str,
}

async fn confirm_deposit_handler(
    fsm: Arc<SessionFsm>,
    body: ConfirmDepositRequest,
) -> Result<impl Reply, Rejection> {
    fsm.confirm_deposit(body.session_id, body.nft_contract, body.token_id)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&ConfirmDepositResponse { status: "processing" }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RebornNftResponse {
    mint: String,
    name: Option<String>,
    image: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    session_id: String,
    status: crate::model::SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    deposit_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_chain: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nft_contract: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reborn_nft: Option<RebornNftResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn status_handler(fsm: Arc<SessionFsm>, session_id: String) -> Result<impl Reply, Rejection> {
    let session = fsm
        .status(&session_id)
        .map_err(reject)?
        .ok_or_else(|| reject(RelayerError::NotFound(format!("session {session_id} not found"))))?;

    Ok(warp::reply::json(&StatusResponse {
        session_id: session.session_id.clone(),
        status: session.status,
        deposit_address: session.deposit_address.as_ref().map(|a| format!("0x{}", hex::encode(a))),
        source_chain: Some(session.source_chain.as_str()),
        nft_contract: session.nft_contract.clone(),
        token_id: session.token_id.clone(),
        token_uri: session.token_uri.clone(),
        reborn_nft: session.reborn_nft().map(|nft| RebornNftResponse {
            mint: nft.mint,
            name: nft.name,
            image: nft.image,
        }),
        error: session.error_message.clone(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TreasuryBalancesResponse {
    fee_token: String,
    gas_token: String,
}

async fn treasury_balances_handler(treasury: Option<Arc<Treasury>>) -> Result<Box<dyn Reply>, Rejection> {
    let Some(treasury) = treasury else {
        return Ok(Box::new(warp::reply::with_status(
            warp::reply::json(&ErrorBody { error: "treasury disabled".into() }),
            StatusCode::SERVICE_UNAVAILABLE,
        )));
    };
    let (fee, gas) = treasury.balances().await.map_err(reject)?;
    Ok(Box::new(warp::reply::json(&TreasuryBalancesResponse {
        fee_token: fee.to_string(),
        gas_token: gas.to_string(),
    })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PresignStatsResponse {
    available: u64,
    leased: u64,
    consumed: u64,
    total: u64,
}

async fn presign_stats_handler(pool: Option<Arc<PresignPool>>) -> Result<Box<dyn Reply>, Rejection> {
    let Some(pool) = pool else {
        return Ok(Box::new(warp::reply::with_status(
            warp::reply::json(&ErrorBody { error: "presign pool disabled".into() }),
            StatusCode::SERVICE_UNAVAILABLE,
        )));
    };
    let stats = pool.stats().map_err(reject)?;
    Ok(Box::new(warp::reply::json(&PresignStatsResponse {
        available: stats.available,
        leased: stats.leased,
        consumed: stats.consumed,
        total: stats.total,
    })))
}

fn with<T: Clone + Send>(value: T) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

pub fn routes(
    fsm: Arc<SessionFsm>,
    treasury: Option<Arc<Treasury>>,
    presign_pool: Option<Arc<PresignPool>>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let api = warp::path("api");

    let start = api
        .and(warp::path("seal"))
        .and(warp::path("start"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with(fsm.clone()))
        .and(warp::body::json())
        .and_then(start_handler);

    let confirm_payment = api
        .and(warp::path("seal"))
        .and(warp::path("confirm-payment"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with(fsm.clone()))
        .and(warp::body::json())
        .and_then(confirm_payment_handler);

    let confirm_deposit = api
        .and(warp::path("seal"))
        .and(warp::path("confirm-deposit"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with(fsm.clone()))
        .and(warp::body::json())
        .and_then(confirm_deposit_handler);

    let status = api
        .and(warp::path("seal"))
        .and(warp::path::param::<String>())
        .and(warp::path("status"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with(fsm.clone()))
        .and_then(|session_id: String, fsm: Arc<SessionFsm>| status_handler(fsm, session_id));

    let treasury_balances = api
        .and(warp::path("treasury"))
        .and(warp::path("balances"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with(treasury))
        .and_then(treasury_balances_handler);

    let presign_stats = api
        .and(warp::path("presign"))
        .and(warp::path("stats"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with(presign_pool))
        .and_then(presign_stats_handler);

    start
        .or(confirm_payment)
        .unify()
        .or(confirm_deposit)
        .unify()
        .or(status)
        .unify()
        .or(treasury_balances)
        .unify()
        .or(presign_stats)
        .unify()
        .recover(handle_rejection)
}

#[tracing::instrument(name = "api-server", skip_all)]
pub async fn serve(
    hostname: &str,
    port: u16,
    fsm: Arc<SessionFsm>,
    treasury: Option<Arc<Treasury>>,
    presign_pool: Option<Arc<PresignPool>>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!(hostname, port, "starting API server");
    let route = routes(fsm, treasury, presign_pool);
    let (_, future) = warp::serve(route)
        .bind_with_graceful_shutdown((hostname.parse::<IpAddr>()?, port), async move {
            shutdown.cancelled().await;
        });
    future.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deposit_verifier::{DepositVerification, DepositVerifier};
    use crate::external::fakes::{FakeCoordinationChain, FakeContentStore, FakeMpcService, FakeTargetChainSubmitter};
    use crate::metadata_pipeline::MetadataPipeline;
    use crate::presign_pool::PresignPool;
    use crate::sequencer::TxSequencer;
    use crate::store::Store;
    use chrono::Duration as ChronoDuration;

    struct AlwaysVerifiedDepositVerifier;

    #[async_trait::async_trait]
    impl DepositVerifier for AlwaysVerifiedDepositVerifier {
        async fn verify_deposit(
            &self,
            _source_chain: SourceChain,
            _nft_contract: &str,
            _token_id: &str,
            _deposit_address: &[u8],
        ) -> Result<DepositVerification, RelayerError> {
            Ok(DepositVerification {
                verified: true,
                token_uri: Some("https://example.test/1.json".into()),
                name: Some("Reborn #1".into()),
                description: Some("desc".into()),
                image_url: Some("https://example.test/1.png".into()),
                collection_name: Some("Reborn".into()),
                error: None,
            })
        }
    }

    fn harness() -> (Arc<SessionFsm>, Option<Arc<Treasury>>, Option<Arc<PresignPool>>) {
        let (store, _dir) = Store::open_temp();
        let chain = Arc::new(FakeCoordinationChain::default());
        let shutdown = CancellationToken::new();
        let sequencer = TxSequencer::spawn(chain.clone(), shutdown);
        let treasury = Arc::new(Treasury::new(chain, sequencer.clone(), 0, 0));
        let mpc = Arc::new(FakeMpcService);
        let pool = Arc::new(PresignPool::new(
            store.clone(),
            sequencer.clone(),
            mpc,
            treasury.clone(),
            ChronoDuration::seconds(120),
        ));
        let target_chain = Arc::new(FakeTargetChainSubmitter::default());
        let metadata_pipeline = Arc::new(
            MetadataPipeline::new(Some(Arc::new(FakeContentStore::default())), vec![]).unwrap(),
        );
        let fsm = SessionFsm::new(
            store,
            sequencer,
            target_chain,
            Arc::new(AlwaysVerifiedDepositVerifier),
            metadata_pipeline,
            "11111111111111111111111111111111".into(),
            10_000_000,
        );
        (fsm, Some(treasury), Some(pool))
    }

    #[tokio::test]
    async fn start_returns_a_session_id() {
        let (fsm, treasury, pool) = harness();
        let filter = routes(fsm, treasury, pool);

        let response = warp::test::request()
            .method("POST")
            .path("/api/seal/start")
            .json(&serde_json::json!({"receiverAddress": "22222222222222222222222222222222", "sourceChain": "ethereum-sepolia"}))
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert!(body["sessionId"].is_string());
        assert_eq!(body["feeAmount"], 10_000_000);
    }

    #[tokio::test]
    async fn start_rejects_an_unknown_source_chain() {
        let (fsm, treasury, pool) = harness();
        let filter = routes(fsm, treasury, pool);

        let response = warp::test::request()
            .method("POST")
            .path("/api/seal/start")
            .json(&serde_json::json!({"receiverAddress": "2", "sourceChain": "dogecoin"}))
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn confirm_payment_for_unknown_session_is_404() {
        let (fsm, treasury, pool) = harness();
        let filter = routes(fsm, treasury, pool);

        let response = warp::test::request()
            .method("POST")
            .path("/api/seal/confirm-payment")
            .json(&serde_json::json!({"sessionId": "does-not-exist", "paymentTxId": "tx1"}))
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn confirm_deposit_on_a_session_not_awaiting_deposit_is_409() {
        let (fsm, treasury, pool) = harness();
        let filter = routes(fsm.clone(), treasury, pool);

        let start = warp::test::request()
            .method("POST")
            .path("/api/seal/start")
            .json(&serde_json::json!({"receiverAddress": "22222222222222222222222222222222", "sourceChain": "ethereum-sepolia"}))
            .reply(&filter)
            .await;
        let body: serde_json::Value = serde_json::from_slice(start.body()).unwrap();
        let session_id = body["sessionId"].as_str().unwrap().to_string();

        let response = warp::test::request()
            .method("POST")
            .path("/api/seal/confirm-deposit")
            .json(&serde_json::json!({"sessionId": session_id, "nftContract": "0xC3f5B155ce06c7cBC470B4e8603AB00a65f1fDc7", "tokenId": "1"}))
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn status_of_unknown_session_is_404() {
        let (fsm, treasury, pool) = harness();
        let filter = routes(fsm, treasury, pool);

        let response = warp::test::request()
            .method("GET")
            .path("/api/seal/does-not-exist/status")
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn presign_stats_reports_zeroed_pool() {
        let (fsm, treasury, pool) = harness();
        let filter = routes(fsm, treasury, pool);

        let response = warp::test::request().method("GET").path("/api/presign/stats").reply(&filter).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["available"], 0);
    }

    #[tokio::test]
    async fn presign_stats_is_503_when_pool_disabled() {
        let (fsm, treasury, _pool) = harness();
        let filter = routes(fsm, treasury, None);

        let response = warp::test::request().method("GET").path("/api/presign/stats").reply(&filter).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn treasury_balances_is_503_when_disabled() {
        let (fsm, _treasury, pool) = harness();
        let filter = routes(fsm, None, pool);

        let response = warp::test::request().method("GET").path("/api/treasury/balances").reply(&filter).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

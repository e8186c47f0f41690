//! Wallet read queries and registration.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use wallet_indexer::db::codec::{WalletRow, WalletStatus};
use wallet_indexer::db::{LedgerSnapshot, StoreError};
use wallet_indexer::event::NATIVE_TOKEN_ID;
use wallet_indexer::materializer::MaterializeError;

use crate::error::ErrorKind;
use crate::ApiContext;

#[derive(Serialize)]
struct AddressEntry {
    address: String,
    index: u32,
    transactions: u32,
}

#[derive(Serialize)]
pub(crate) struct AddressesResponse {
    success: bool,
    addresses: Vec<AddressEntry>,
}

#[derive(Serialize)]
struct BalancePayload {
    unlocked: u64,
    locked: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceEntry {
    token_id: String,
    transactions: u32,
    balance: BalancePayload,
}

#[derive(Serialize)]
pub(crate) struct BalancesResponse {
    success: bool,
    balances: Vec<BalanceEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEntry {
    tx_id: String,
    timestamp: u32,
    balance: i64,
}

#[derive(Serialize)]
pub(crate) struct HistoryResponse {
    success: bool,
    history: Vec<HistoryEntry>,
    skip: usize,
    count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WalletStatusPayload {
    wallet_id: String,
    xpubkey: String,
    status: WalletStatus,
    max_gap: u16,
    created_at: u64,
    ready_at: Option<u64>,
}

#[derive(Serialize)]
pub(crate) struct WalletStatusResponse {
    success: bool,
    status: WalletStatusPayload,
}

#[derive(Deserialize)]
pub(crate) struct RegisterRequest {
    xpubkey: Option<String>,
}

pub(crate) async fn wallet_addresses(
    State(context): State<ApiContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<AddressesResponse>, ErrorKind> {
    let id = require(&params, "id")?;
    let snapshot = context.ledger.begin_read().map_err(storage)?;
    ready_wallet(&snapshot, id)?;
    let addresses = snapshot
        .wallet_addresses(id)
        .map_err(storage)?
        .into_iter()
        .map(|entry| AddressEntry {
            address: entry.address,
            index: entry.index,
            transactions: entry.transactions,
        })
        .collect();
    Ok(Json(AddressesResponse { success: true, addresses }))
}

pub(crate) async fn wallet_balances(
    State(context): State<ApiContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<BalancesResponse>, ErrorKind> {
    let id = require(&params, "id")?;
    let token_id = params.get("token_id").map(String::as_str);
    let snapshot = context.ledger.begin_read().map_err(storage)?;
    ready_wallet(&snapshot, id)?;
    let balances = snapshot
        .wallet_balances(id, token_id)
        .map_err(storage)?
        .into_iter()
        .map(|entry| BalanceEntry {
            token_id: entry.token_id,
            transactions: entry.transactions,
            balance: BalancePayload { unlocked: entry.unlocked, locked: entry.locked },
        })
        .collect();
    Ok(Json(BalancesResponse { success: true, balances }))
}

pub(crate) async fn wallet_history(
    State(context): State<ApiContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<HistoryResponse>, ErrorKind> {
    let id = require(&params, "id")?;
    let token_id = params
        .get("token_id")
        .map(String::as_str)
        .unwrap_or(NATIVE_TOKEN_ID);
    let skip = optional_usize(&params, "skip")?.unwrap_or(0);
    let count =
        optional_usize(&params, "count")?.unwrap_or(context.config.history_page_size as usize);
    let snapshot = context.ledger.begin_read().map_err(storage)?;
    ready_wallet(&snapshot, id)?;
    let history = snapshot
        .wallet_history(id, token_id, skip, count)
        .map_err(storage)?
        .into_iter()
        .map(|entry| HistoryEntry {
            tx_id: entry.tx_id.to_string(),
            timestamp: entry.timestamp,
            balance: entry.balance,
        })
        .collect();
    Ok(Json(HistoryResponse { success: true, history, skip, count }))
}

pub(crate) async fn wallet_status(
    State(context): State<ApiContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<WalletStatusResponse>, ErrorKind> {
    let id = require(&params, "id")?;
    let snapshot = context.ledger.begin_read().map_err(storage)?;
    let wallet = snapshot
        .wallet(id)
        .map_err(storage)?
        .ok_or(ErrorKind::WalletNotFound)?;
    Ok(Json(status_response(id, wallet)))
}

/// Register a new wallet and dispatch its materialization. The response is
/// the freshly created `creating` row; clients poll `GET /wallet` for the
/// `ready` transition.
pub(crate) async fn register_wallet(
    State(context): State<ApiContext>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<Json<WalletStatusResponse>, ErrorKind> {
    let Some(Json(request)) = payload else {
        return Err(ErrorKind::InvalidBody);
    };
    let xpubkey = request
        .xpubkey
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ErrorKind::MissingParameter("xpubkey"))?;

    let wallet_id = context
        .materializer
        .register(xpubkey, context.config.max_gap, unix_now())
        .map_err(register_error)?;

    let materializer = context.materializer.clone();
    let dispatched_id = wallet_id.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(err) = materializer.materialize(&dispatched_id, unix_now()) {
            error!(wallet_id = %dispatched_id, error = %err, "wallet materialization failed");
        }
    });

    let snapshot = context.ledger.begin_read().map_err(storage)?;
    let wallet = snapshot
        .wallet(&wallet_id)
        .map_err(storage)?
        .ok_or(ErrorKind::StorageUnavailable)?;
    Ok(Json(status_response(&wallet_id, wallet)))
}

fn status_response(wallet_id: &str, wallet: WalletRow) -> WalletStatusResponse {
    WalletStatusResponse {
        success: true,
        status: WalletStatusPayload {
            wallet_id: wallet_id.to_string(),
            xpubkey: wallet.xpubkey,
            status: wallet.status,
            max_gap: wallet.max_gap,
            created_at: wallet.created_at,
            ready_at: wallet.ready_at,
        },
    }
}

fn require<'a>(
    params: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, ErrorKind> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or(ErrorKind::MissingParameter(name))
}

fn optional_usize(
    params: &HashMap<String, String>,
    name: &'static str,
) -> Result<Option<usize>, ErrorKind> {
    match params.get(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ErrorKind::InvalidParameter(name)),
    }
}

/// Read queries require a materialized wallet.
fn ready_wallet(snapshot: &LedgerSnapshot, id: &str) -> Result<WalletRow, ErrorKind> {
    let wallet = snapshot
        .wallet(id)
        .map_err(storage)?
        .ok_or(ErrorKind::WalletNotFound)?;
    if wallet.status != WalletStatus::Ready {
        return Err(ErrorKind::WalletNotReady);
    }
    Ok(wallet)
}

fn storage(err: StoreError) -> ErrorKind {
    error!(error = %err, "storage failure serving wallet request");
    ErrorKind::StorageUnavailable
}

fn register_error(err: MaterializeError) -> ErrorKind {
    match err {
        MaterializeError::AlreadyCreated => ErrorKind::WalletAlreadyCreated,
        MaterializeError::Derive(_) => ErrorKind::InvalidParameter("xpubkey"),
        other => {
            error!(error = %other, "wallet registration failed");
            ErrorKind::StorageUnavailable
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

//! Plate API Handlers

use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use shared::plate::{MenuCount, PlateDocument, PlateReport, PlateState};
use tokio::sync::broadcast::error::RecvError;

use crate::core::{Plates, ServerState};
use crate::plates::PlateResult;
use crate::utils::validation::{
    MAX_HOSTNAME_LEN, MAX_QR_ID_LEN, validate_optional_text, validate_required_text,
};
use crate::utils::{AppError, AppResult, ErrorCode};

/// Collector report body
///
/// Every field is optional at the parsing stage so that all missing fields
/// can be reported at once.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlateReportBody {
    pub qr_id: Option<String>,
    pub shop_number: Option<i64>,
    pub pop_number: Option<i16>,
    pub state: Option<u8>,
    /// Collector host, logged only
    pub hostname: Option<String>,
}

impl PlateReportBody {
    /// Check the body and split it into shop number and report
    pub fn into_report(self) -> AppResult<(i64, PlateReport)> {
        validate_optional_text(&self.hostname, "hostname", MAX_HOSTNAME_LEN)?;

        let (Some(qr_id), Some(shop_number), Some(pop_number), Some(state)) =
            (self.qr_id.as_ref(), self.shop_number, self.pop_number, self.state)
        else {
            let missing: Vec<&str> = [
                ("qrId", self.qr_id.is_none()),
                ("shopNumber", self.shop_number.is_none()),
                ("popNumber", self.pop_number.is_none()),
                ("state", self.state.is_none()),
            ]
            .into_iter()
            .filter_map(|(field, absent)| absent.then_some(field))
            .collect();
            return Err(AppError::with_message(
                ErrorCode::RequiredField,
                format!("Missing required fields: {}", missing.join(", ")),
            )
            .with_detail("fields", missing));
        };

        validate_required_text(qr_id, "qrId", MAX_QR_ID_LEN)?;
        if shop_number <= 0 {
            return Err(AppError::with_message(
                ErrorCode::ValueOutOfRange,
                format!("shopNumber must be positive (got {shop_number})"),
            )
            .with_detail("field", "shopNumber"));
        }
        let state = PlateState::try_from(state).map_err(|e| {
            AppError::with_message(ErrorCode::PlateStateInvalid, e.to_string())
                .with_detail("field", "state")
        })?;

        Ok((shop_number, PlateReport::new(qr_id.clone(), pop_number, state)))
    }
}

/// Run a store-bound plate operation on the blocking pool under the request timeout
///
/// On timeout the client gets 503; the operation itself may still complete,
/// which is harmless because reports are idempotent.
async fn run_blocking<T, F>(state: &ServerState, op: &'static str, f: F) -> AppResult<T>
where
    F: FnOnce(&Plates) -> PlateResult<T> + Send + 'static,
    T: Send + 'static,
{
    let plates = state.plates.clone();
    let task = tokio::task::spawn_blocking(move || f(&plates));

    match tokio::time::timeout(state.config.request_timeout(), task).await {
        Ok(Ok(result)) => result.map_err(AppError::from),
        Ok(Err(e)) => Err(AppError::internal(format!("{op} task failed: {e}"))),
        Err(_) => {
            tracing::warn!(op, timeout_ms = state.config.request_timeout_ms, "Plate operation timed out");
            Err(AppError::timeout(format!("{op} timed out")))
        }
    }
}

/// Accept one plate report from a collector
pub async fn collect(
    State(state): State<ServerState>,
    payload: Result<Json<PlateReportBody>, JsonRejection>,
) -> AppResult<(StatusCode, Json<PlateDocument>)> {
    let Json(body) = payload.map_err(|rejection| {
        AppError::with_message(ErrorCode::InvalidFormat, rejection.body_text())
    })?;
    let hostname = body.hostname.clone();
    let (shop_number, report) = body.into_report()?;

    tracing::debug!(
        shop_number,
        qr_id = %report.qr_id,
        hostname = hostname.as_deref().unwrap_or("unknown"),
        "Plate report received"
    );

    let document = run_blocking(&state, "apply report", move |plates| {
        plates.apply(shop_number, report)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// List all plates of a shop
pub async fn list_plates(
    State(state): State<ServerState>,
    Path(shop): Path<i64>,
) -> AppResult<Json<Vec<PlateDocument>>> {
    let documents =
        run_blocking(&state, "list plates", move |plates| plates.list_plates(shop)).await?;
    Ok(Json(documents))
}

/// Get one plate by qrId
pub async fn get_plate(
    State(state): State<ServerState>,
    Path((shop, qr_id)): Path<(i64, String)>,
) -> AppResult<Json<PlateDocument>> {
    let lookup = qr_id.clone();
    let document = run_blocking(&state, "get plate", move |plates| {
        plates.get_plate(shop, &lookup)
    })
    .await?
    .ok_or_else(|| {
        AppError::with_message(ErrorCode::PlateNotFound, format!("Plate {qr_id} not found"))
            .with_detail("qrId", qr_id)
    })?;
    Ok(Json(document))
}

/// List item counters of a shop
pub async fn list_counters(
    State(state): State<ServerState>,
    Path(shop): Path<i64>,
) -> AppResult<Json<Vec<MenuCount>>> {
    let counts =
        run_blocking(&state, "list counters", move |plates| plates.list_counters(shop)).await?;
    Ok(Json(counts))
}

/// Get the counter of one menu item
pub async fn get_counter(
    State(state): State<ServerState>,
    Path((shop, pop_number)): Path<(i64, i16)>,
) -> AppResult<Json<MenuCount>> {
    let counter = run_blocking(&state, "get counter", move |plates| {
        plates.get_counter(shop, pop_number)
    })
    .await?;
    Ok(Json(MenuCount {
        pop_number,
        count: counter.count,
    }))
}

/// Server-Sent Events feed of committed plate updates for one shop
pub async fn events(
    State(state): State<ServerState>,
    Path(shop): Path<i64>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.plates.subscribe();
    tracing::debug!(shop_number = shop, "Display feed subscribed");

    let stream = stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(update) if update.shop_number == shop => {
                    let event = match Event::default().event("plate").json_data(&update) {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to encode plate update");
                            continue;
                        }
                    };
                    return Some((Ok(event), rx));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(shop_number = shop, skipped, "Display feed lagged, updates dropped");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

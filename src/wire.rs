use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::auth::MasterKeyAuth;
use crate::engine::Engine;
use crate::limits::MAX_LINE_LEN;
use crate::model::CallerContext;
use crate::observability;
use crate::rpc::{self, Command, RpcError};

/// Serve one client: read request lines, answer each with one response line.
///
/// Returns when the peer hangs up. Per-request failures become error
/// responses; only socket errors end the connection early.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    auth: Arc<MasterKeyAuth>,
) -> io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(frame) = framed.next().await {
        let response = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&engine, &auth, &line).await,
            // The codec skips to the next newline, so the connection stays usable.
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                rpc::error_response(Value::Null, &RpcError::bad_request("request too large"))
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        framed.send(response.to_string()).await.map_err(codec_err)?;
    }
    Ok(())
}

async fn handle_line(engine: &Engine, auth: &MasterKeyAuth, line: &str) -> Value {
    let request = match rpc::parse_request(line) {
        Ok(r) => r,
        Err(e) => {
            debug!("rejecting malformed request: {e}");
            return rpc::error_response(Value::Null, &e);
        }
    };
    let id = request.id;

    let ctx = match auth.authorize(request.master_key.as_deref()) {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!("wrong master key on {}", request.function);
            return rpc::error_response(id, &e);
        }
    };

    let cmd = match rpc::parse_command(&request.function, request.params) {
        Ok(cmd) => cmd,
        Err(e) => return rpc::error_response(id, &e),
    };

    let label = observability::command_label(&cmd);
    let start = Instant::now();
    let result = execute_command(engine, &ctx, cmd).await;
    metrics::histogram!(observability::CALL_DURATION_SECONDS, "function" => label)
        .record(start.elapsed().as_secs_f64());

    match result {
        Ok(value) => {
            metrics::counter!(observability::CALLS_TOTAL, "function" => label, "status" => "ok")
                .increment(1);
            rpc::ok_response(id, value)
        }
        Err(e) => {
            metrics::counter!(observability::CALLS_TOTAL, "function" => label, "status" => "error")
                .increment(1);
            if e.code >= 500 {
                warn!("{label} failed: {e}");
            } else {
                debug!("{label} rejected: {e}");
            }
            rpc::error_response(id, &e)
        }
    }
}

pub async fn execute_command(
    engine: &Engine,
    ctx: &CallerContext,
    cmd: Command,
) -> Result<Value, RpcError> {
    match cmd {
        Command::BulkUpdateRackingOccupied { updates } => {
            let report = engine.bulk_update_occupied(ctx, updates.as_ref()).await?;
            to_json(&report)
        }
        Command::GetTodayHistory => to_json(&engine.today_history().await),
        Command::CreateRacking {
            position,
            active,
            occupied,
            label,
        } => {
            let rack = engine
                .create_rack(ctx, position, active, occupied, label)
                .await?;
            to_json(&rack)
        }
        Command::UpdateRacking { position, occupied } => {
            to_json(&engine.update_rack(ctx, position, occupied).await?)
        }
        Command::GetRacking { position } => to_json(&engine.get_rack(position).await?),
        Command::ListRacking => to_json(&engine.list_racks().await),
        Command::CreateHistory { action, position } => {
            to_json(&engine.create_history(ctx, action, position).await?)
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new(500, format!("encode error: {e}")))
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => io::Error::other("response line too long"),
    }
}
